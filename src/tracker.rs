// Common surface of the per-modality trackers, so the engine can route events
// and tear everything down without knowing which tracker it holds.

use crate::error::EngineError;
use crate::message::AttentionMessage;
use crate::overlay::OverlayOp;
use crate::types::{InputEvent, OverlayNodeId};

pub trait AttentionTracker {
    /// Handle one event. Events arrive strictly in order.
    /// After `destroy` this must return `Ok` with no messages.
    fn handle(&mut self, event: &InputEvent) -> Result<Vec<AttentionMessage>, EngineError>;

    /// Overlay work produced since the last call.
    fn take_overlay_ops(&mut self) -> Vec<OverlayOp>;

    /// Takes effect immediately; turning it off removes the highlights.
    fn set_show_overlay(&mut self, show: bool);

    /// Host failed to insert `node`. Returns true if this tracker owned it.
    fn report_overlay_failure(&mut self, node: OverlayNodeId, message: &str) -> bool;

    /// Remove everything injected and stop emitting. Idempotent.
    fn destroy(&mut self);

    fn is_destroyed(&self) -> bool;

    /// Injected nodes still alive.
    fn overlay_node_count(&self) -> usize;
}
