// attention_engine: sustained-attention tracking for the browser extension.
// The content script forwards DOM and media events in batches; every decision
// (what is being read, for how long, whether to report it) is made here.

mod attention;
mod audio;
mod dedup;
mod error;
mod image;
mod locator;
mod message;
mod overlay;
mod relay;
mod text;
mod tracker;
mod types;

use log::{debug, warn};
use wasm_bindgen::prelude::*;

pub use attention::{
    AttentionEvent, AttentionThresholds, Phase, SustainedAttentionMachine,
    SustainedAttentionSnapshot, Transition,
};
pub use audio::AudioTracker;
pub use dedup::{hash_text, SourceSet, TextDelta, WatermarkCache};
pub use error::EngineError;
pub use image::ImageTracker;
pub use locator::{AttentionCandidate, CandidateLocator, ElementHandle, ElementTable};
pub use message::*;
pub use overlay::{
    AudioIndicators, ImageHighlight, OverlayKind, OverlayLayer, OverlayNode, OverlayOp,
    TelemetryFrame, TelemetryPanel, TextHighlight,
};
pub use relay::{
    CredentialStore, Relay, RelayOutcome, StoredCredential, Transport, UploadRequest, WasmRelay,
};
pub use text::TextTracker;
pub use tracker::AttentionTracker;
pub use types::*;

/// Initialize panic hook and console logger for the browser.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "console_log")]
    if console_log::init_with_level(log::Level::Info).is_err() {
        log::debug!("logger already installed");
    }
}

/// Main engine interface exposed to JavaScript.
/// One instance per page; events go in as batches, messages and overlay work come out.
#[wasm_bindgen]
pub struct Engine {
    text: TextTracker,
    image: ImageTracker,
    audio: AudioTracker,
    destroyed: bool,
}

impl Engine {
    pub fn from_config(config: EngineConfig) -> Result<Engine, EngineError> {
        config.validate()?;
        debug!(
            "engine started for {} (threshold {}ms, {} wpm)",
            config.page_url, config.cognitive_attention_threshold, config.words_per_minute
        );
        Ok(Engine {
            text: TextTracker::new(&config),
            image: ImageTracker::new(&config),
            audio: AudioTracker::new(&config),
            destroyed: false,
        })
    }

    fn trackers(&mut self) -> [&mut dyn AttentionTracker; 3] {
        [&mut self.text, &mut self.image, &mut self.audio]
    }

    /// Route every event to every tracker. A failing event is logged and skipped.
    pub fn process_batch(&mut self, batch: &SignalBatch) -> EngineOutput {
        let mut output = EngineOutput {
            active: !self.destroyed,
            ..Default::default()
        };
        if self.destroyed {
            return output;
        }

        for event in &batch.events {
            for tracker in self.trackers() {
                match tracker.handle(event) {
                    Ok(messages) => output.messages.extend(messages),
                    Err(e) => warn!("event at {} skipped: {e}", event.timestamp.as_millis()),
                }
            }
        }
        for tracker in self.trackers() {
            output.overlay.extend(tracker.take_overlay_ops());
        }
        output
    }

    /// Tear down all trackers, returning the removals the host must apply.
    pub fn shutdown(&mut self) -> Vec<OverlayOp> {
        if self.destroyed {
            return Vec::new();
        }
        self.destroyed = true;
        self.trackers()
            .into_iter()
            .flat_map(|tracker| {
                tracker.destroy();
                tracker.take_overlay_ops()
            })
            .collect()
    }

    pub fn text_tracker(&self) -> &TextTracker {
        &self.text
    }

    pub fn image_tracker(&self) -> &ImageTracker {
        &self.image
    }

    pub fn audio_tracker(&self) -> &AudioTracker {
        &self.audio
    }
}

#[wasm_bindgen]
impl Engine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<Engine, JsValue> {
        let config: EngineConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;

        Engine::from_config(config).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Process a batch of input signals.
    /// Returns JSON `{ messages, overlay, active }`.
    pub fn process_signals(&mut self, signals_json: &str) -> Result<String, JsValue> {
        let signals: SignalBatch = serde_json::from_str(signals_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid signals: {}", e)))?;

        let output = self.process_batch(&signals);

        serde_json::to_string(&output)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn set_debug_mode(&mut self, debug_mode: bool) {
        if !self.destroyed {
            self.text.set_debug_mode(debug_mode);
        }
    }

    pub fn set_show_overlay(&mut self, show: bool) {
        for tracker in self.trackers() {
            tracker.set_show_overlay(show);
        }
    }

    /// The host could not insert an overlay node. Tracking continues without it.
    pub fn report_overlay_failure(&mut self, node_id: u32, message: &str) -> bool {
        let node = OverlayNodeId::new(node_id);
        self.trackers()
            .into_iter()
            .any(|tracker| tracker.report_overlay_failure(node, message))
    }

    /// Overlay work queued by toggles since the last batch, as JSON.
    pub fn take_overlay_ops(&mut self) -> Result<String, JsValue> {
        let ops: Vec<OverlayOp> = self
            .trackers()
            .into_iter()
            .flat_map(|tracker| tracker.take_overlay_ops())
            .collect();
        serde_json::to_string(&ops)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Stop tracking and return the overlay removals as JSON. Safe to call twice.
    pub fn destroy(&mut self) -> Result<String, JsValue> {
        let ops = self.shutdown();
        serde_json::to_string(&ops)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn overlay_node_count(&self) -> usize {
        self.text.overlay_node_count()
            + self.image.overlay_node_count()
            + self.audio.overlay_node_count()
    }
}
