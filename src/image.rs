// Image hover tracker.
// One hover session at a time. A session that lasts past the attention threshold
// reports its image once; the source set keeps it from being reported again.

use log::{debug, info, warn};

use crate::dedup::SourceSet;
use crate::error::EngineError;
use crate::message::{AttentionMessage, ImageAttentionPayload};
use crate::overlay::{ImageHighlight, OverlayLayer, OverlayOp};
use crate::tracker::AttentionTracker;
use crate::types::*;

const IMAGE_OVERLAY_ID_BASE: u32 = 0x0200_0000;
/// Hover time that maps to full confidence.
pub const HOVER_CONFIDENCE_REFERENCE_MS: u64 = 6_000;

#[derive(Debug)]
struct HoverSession {
    image: ImageInfo,
    started: Timestamp,
    hovered_ms: u64,
    reported: bool,
}

pub fn hover_confidence(hovered_ms: u64) -> u8 {
    (hovered_ms as f64 / HOVER_CONFIDENCE_REFERENCE_MS as f64 * 100.0)
        .round()
        .min(100.0) as u8
}

pub struct ImageTracker {
    page_url: String,
    threshold: u64,
    show_overlay: bool,
    session: Option<HoverSession>,
    sources: SourceSet,
    layer: OverlayLayer,
    highlight: ImageHighlight,
    scroll: (f64, f64),
    destroyed: bool,
}

impl ImageTracker {
    pub fn new(config: &EngineConfig) -> Self {
        ImageTracker {
            page_url: config.page_url.clone(),
            threshold: config.cognitive_attention_threshold,
            show_overlay: config.show_overlay,
            session: None,
            sources: SourceSet::new(),
            layer: OverlayLayer::with_id_base(IMAGE_OVERLAY_ID_BASE),
            highlight: ImageHighlight::default(),
            scroll: (0.0, 0.0),
            destroyed: false,
        }
    }

    /// The image currently under the pointer.
    pub fn hovered(&self) -> Option<NodeId> {
        self.session.as_ref().map(|s| s.image.node)
    }

    /// Hover progress toward the threshold, 0-100. Cosmetic only.
    pub fn progress(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| {
            (s.hovered_ms as f64 / self.threshold as f64 * 100.0).min(100.0)
        })
    }

    /// Bring the session's duration up to `now` and report it if it qualifies.
    fn advance(&mut self, now: Timestamp) -> Option<AttentionMessage> {
        let session = self.session.as_mut()?;
        session.hovered_ms = now.millis_since(session.started);
        if session.reported || session.hovered_ms < self.threshold {
            return None;
        }
        session.reported = true;

        if !self.sources.first_sighting(&session.image.src) {
            debug!("image {} already reported on this page", session.image.src);
            return None;
        }

        let confidence = hover_confidence(session.hovered_ms);
        info!(
            "image attention: {} after {}ms ({}% confidence)",
            session.image.src, session.hovered_ms, confidence
        );
        Some(AttentionMessage::Image(ImageAttentionPayload {
            url: self.page_url.clone(),
            src: session.image.src.clone(),
            alt: session.image.alt.clone(),
            title: session.image.title.clone(),
            width: session.image.width,
            height: session.image.height,
            hover_duration: session.hovered_ms,
            confidence,
            timestamp: now,
        }))
    }

    fn end_session(&mut self) {
        self.session = None;
        self.highlight.hide(&mut self.layer);
    }

    fn render(&mut self) {
        if !self.show_overlay || self.destroyed {
            return;
        }
        let progress = self.progress();
        match self.session.as_ref() {
            Some(session) => self
                .highlight
                .render(&mut self.layer, session.image.bounds, progress),
            None => self.highlight.hide(&mut self.layer),
        }
    }
}

impl AttentionTracker for ImageTracker {
    fn handle(&mut self, event: &InputEvent) -> Result<Vec<AttentionMessage>, EngineError> {
        if self.destroyed {
            return Ok(Vec::new());
        }

        let now = event.timestamp;
        let mut messages = Vec::new();
        match &event.event_type {
            EventType::PointerEnter { image } => {
                if image.src.is_empty() {
                    return Err(EngineError::InvalidSignal(format!(
                        "image {} has no src",
                        image.node.as_u32()
                    )));
                }
                if self.hovered() == Some(image.node) {
                    return Ok(messages);
                }
                messages.extend(self.advance(now));
                self.session = Some(HoverSession {
                    image: image.clone(),
                    started: now,
                    hovered_ms: 0,
                    reported: false,
                });
            }
            EventType::PointerLeave { node } => {
                if self.hovered() != Some(*node) {
                    return Ok(messages);
                }
                messages.extend(self.advance(now));
                self.end_session();
            }
            EventType::Tick => {
                messages.extend(self.advance(now));
            }
            EventType::Visibility { visible, focused } => {
                // no pointerleave fires when the tab goes away mid-hover
                if *visible && *focused {
                    return Ok(messages);
                }
                messages.extend(self.advance(now));
                self.end_session();
            }
            EventType::Scroll { scroll_x, scroll_y } => {
                let (dx, dy) = (scroll_x - self.scroll.0, scroll_y - self.scroll.1);
                self.scroll = (*scroll_x, *scroll_y);
                if let Some(session) = self.session.as_mut() {
                    session.image.bounds = session.image.bounds.translated(-dx, -dy);
                }
            }
            EventType::Layout { viewport, .. } => {
                self.scroll = (viewport.scroll_x, viewport.scroll_y);
                return Ok(messages);
            }
            EventType::NodeRemoved { node } => {
                if self.hovered() == Some(*node) {
                    self.end_session();
                }
            }
            _ => return Ok(messages),
        }

        self.render();
        Ok(messages)
    }

    fn take_overlay_ops(&mut self) -> Vec<OverlayOp> {
        self.layer.drain_ops()
    }

    fn set_show_overlay(&mut self, show: bool) {
        if self.destroyed {
            return;
        }
        self.show_overlay = show;
        if show {
            self.render();
        } else {
            self.highlight.hide(&mut self.layer);
        }
    }

    fn report_overlay_failure(&mut self, node: OverlayNodeId, message: &str) -> bool {
        if !self.layer.forget(node) {
            return false;
        }
        warn!("image overlay node {} failed to render: {message}", node.as_u32());
        true
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.end_session();
        self.layer.clear();
        self.destroyed = true;
        debug!("image tracker destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn overlay_node_count(&self) -> usize {
        self.layer.live_count()
    }
}
