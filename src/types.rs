// Strong typing over strings. Newtypes for timestamps and node handles,
// plus the JSON shapes exchanged with the content script.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EngineError;
use crate::message::AttentionMessage;
use crate::overlay::OverlayOp;

/// Host timestamp in milliseconds (`Date.now()` on the JS side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, zero if the clock went backwards.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Host-assigned key for a page node. The host keeps the node; we keep the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Key for a node the engine asked the host to inject (panel, highlight, indicator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayNodeId(u32);

impl OverlayNodeId {
    pub fn new(id: u32) -> Self {
        OverlayNodeId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Rectangle in CSS pixels, viewport coordinates unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Rect {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center_y(&self) -> f64 {
        self.top + self.height / 2.0
    }

    /// Area of the overlap between two rectangles.
    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let w = self.right().min(other.right()) - self.left.max(other.left);
        let h = self.bottom().min(other.bottom()) - self.top.max(other.top);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Same rectangle moved by the given offset.
    pub fn translated(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.width, self.height)
    }
}

/// Viewport size and scroll offset at the time of a layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
}

impl Viewport {
    /// The visible area in viewport coordinates.
    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Engine configuration passed from JS. Keys follow the extension settings names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// URL of the page being tracked, stamped into every payload.
    #[serde(default)]
    pub page_url: String,
    /// Render the telemetry panel.
    #[serde(default)]
    pub debug_mode: bool,
    /// Render highlights over the attended element.
    #[serde(default)]
    pub show_overlay: bool,
    /// Milliseconds of continuous engagement before attention counts as sustained.
    #[serde(default = "default_attention_threshold")]
    pub cognitive_attention_threshold: u64,
    /// Milliseconds between ticks after which accumulated duration resets.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: u64,
    /// Baseline reading speed.
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,
    /// Milliseconds of audio playback before it counts as sustained.
    #[serde(default = "default_playback_threshold")]
    pub playback_threshold: u64,
}

fn default_attention_threshold() -> u64 {
    3_000
}

fn default_idle_threshold() -> u64 {
    5_000
}

fn default_words_per_minute() -> u32 {
    250
}

fn default_playback_threshold() -> u64 {
    3_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            page_url: String::new(),
            debug_mode: false,
            show_overlay: false,
            cognitive_attention_threshold: default_attention_threshold(),
            idle_threshold: default_idle_threshold(),
            words_per_minute: default_words_per_minute(),
            playback_threshold: default_playback_threshold(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cognitive_attention_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "cognitiveAttentionThreshold must be positive".to_string(),
            ));
        }
        if self.idle_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "idleThreshold must be positive".to_string(),
            ));
        }
        if self.words_per_minute == 0 {
            return Err(EngineError::InvalidConfig(
                "wordsPerMinute must be positive".to_string(),
            ));
        }
        if self.playback_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "playbackThreshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A block-level text element observed during a layout pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub node: NodeId,
    pub text: String,
    pub bounds: Rect,
}

/// An `<img>` element the pointer interacted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub node: NodeId,
    pub src: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub bounds: Rect,
}

/// An `<audio>` element that started playing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub node: NodeId,
    pub src: String,
    #[serde(default)]
    pub title: String,
    /// Total length in seconds; NaN/infinite for unknown or live streams.
    /// `JSON.stringify` sends those as `null`.
    #[serde(default, deserialize_with = "nan_if_null")]
    pub duration: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub current_time: f64,
}

fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn zero_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

/// What caused the content script to run a layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutTrigger {
    Init,
    Scroll,
    Mutation,
    Resize,
}

/// Batch of input signals from JS (minimizes JS↔WASM crossings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    pub events: Vec<InputEvent>,
}

/// Single input event from the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub timestamp: Timestamp,
    pub event_type: EventType,
}

/// Type of input event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    /// Low-frequency timer tick driving duration accumulation.
    Tick,
    /// Page visibility or window focus changed.
    Visibility { visible: bool, focused: bool },
    /// Page scrolled to the given offset.
    Scroll { scroll_x: f64, scroll_y: f64 },
    /// Fresh DOM read of block-level text, in document order.
    Layout {
        trigger: LayoutTrigger,
        viewport: Viewport,
        blocks: Vec<TextBlock>,
    },
    /// A page node was detached from the document.
    NodeRemoved { node: NodeId },
    PointerEnter { image: ImageInfo },
    PointerLeave { node: NodeId },
    MediaPlay { media: AudioInfo },
    MediaPause { node: NodeId },
    /// Playback stalled waiting for data.
    MediaWaiting { node: NodeId },
    MediaTimeUpdate {
        node: NodeId,
        #[serde(default, deserialize_with = "zero_if_null")]
        current_time: f64,
        #[serde(default, deserialize_with = "nan_if_null")]
        duration: f64,
    },
    MediaEnded { node: NodeId },
}

/// Everything produced by one batch: messages for the relay and DOM work for the host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineOutput {
    pub messages: Vec<AttentionMessage>,
    pub overlay: Vec<OverlayOp>,
    /// False once the engine is destroyed; the host should clear its timers.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_elapsed_saturates() {
        let a = Timestamp::from_millis(1_500);
        let b = Timestamp::from_millis(1_000);
        assert_eq!(a.millis_since(b), 500);
        assert_eq!(b.millis_since(a), 0);
    }

    #[test]
    fn rect_intersection() {
        let viewport = Rect::new(0.0, 0.0, 100.0, 100.0);
        let half_out = Rect::new(50.0, 50.0, 100.0, 100.0);
        assert_eq!(viewport.intersection_area(&half_out), 2_500.0);

        let outside = Rect::new(0.0, 200.0, 10.0, 10.0);
        assert_eq!(viewport.intersection_area(&outside), 0.0);
    }

    #[test]
    fn null_media_times_mean_unknown() {
        let event: InputEvent = serde_json::from_str(
            r#"{"timestamp":5,"event_type":{"type":"MediaPlay","media":{"node":1,"src":"a.mp3","duration":null,"current_time":null}}}"#,
        )
        .unwrap();
        let EventType::MediaPlay { media } = event.event_type else {
            panic!("expected MediaPlay");
        };
        assert!(media.duration.is_nan());
        assert_eq!(media.current_time, 0.0);

        let event: InputEvent = serde_json::from_str(
            r#"{"timestamp":6,"event_type":{"type":"MediaTimeUpdate","node":1,"current_time":2.5,"duration":null}}"#,
        )
        .unwrap();
        let EventType::MediaTimeUpdate { duration, current_time, .. } = event.event_type else {
            panic!("expected MediaTimeUpdate");
        };
        assert!(duration.is_nan());
        assert_eq!(current_time, 2.5);
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cognitive_attention_threshold, 3_000);
        assert_eq!(config.words_per_minute, 250);
        assert!(!config.debug_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_reads_camel_case_keys() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"debugMode":true,"showOverlay":true,"idleThreshold":1000,"pageUrl":"https://a.test/x"}"#,
        )
        .unwrap();
        assert!(config.debug_mode);
        assert!(config.show_overlay);
        assert_eq!(config.idle_threshold, 1_000);
        assert_eq!(config.page_url, "https://a.test/x");
    }

    #[test]
    fn zero_reading_speed_is_rejected() {
        let config = EngineConfig {
            words_per_minute: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn event_tag_parses() {
        let event: InputEvent = serde_json::from_str(
            r#"{"timestamp":10,"event_type":{"type":"Visibility","visible":true,"focused":false}}"#,
        )
        .unwrap();
        assert!(matches!(
            event.event_type,
            EventType::Visibility {
                visible: true,
                focused: false
            }
        ));
    }
}
