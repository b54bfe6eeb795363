// Debug telemetry and overlay rendering.
// Retained model of every node the engine asked the host to inject. Renderers
// only read engine state; the host applies the emitted ops to the real DOM.
// Rule: whatever is created here must be removable from here, including on destroy.

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::attention::SustainedAttentionSnapshot;
use crate::error::EngineError;
use crate::types::*;

const PREVIEW_CHARS: usize = 50;
const PROGRESS_CELLS: usize = 10;

/// What an injected node is for. The host maps these to class names and CSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverlayKind {
    DebugPanel,
    TextHighlight,
    ReadingProgress,
    ProgressLabel,
    ImageFrame,
    ImageProgress,
    AudioIndicator,
}

/// Where the host should append the node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "to")]
pub enum Anchor {
    Body,
    /// Appended next to a page node (inside its parent).
    Element { node: NodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Positioning {
    /// Viewport coordinates.
    Fixed,
    /// Document coordinates.
    Absolute,
    /// Laid out by the anchor's parent.
    Relative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    pub positioning: Positioning,
    pub rect: Option<Rect>,
    /// Fill fraction 0-100 for progress-like nodes.
    pub progress: Option<f64>,
    /// Full-strength rendering once the threshold is met.
    pub complete: bool,
}

impl OverlayStyle {
    fn at(positioning: Positioning, rect: Rect) -> Self {
        OverlayStyle {
            positioning,
            rect: Some(rect),
            progress: None,
            complete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayNode {
    pub id: OverlayNodeId,
    pub kind: OverlayKind,
    pub anchor: Anchor,
    pub style: OverlayStyle,
    pub text: Option<String>,
}

/// DOM work for the host, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OverlayOp {
    Create { node: OverlayNode },
    Update { node: OverlayNode },
    Remove { id: OverlayNodeId },
}

/// Every node currently injected on behalf of one tracker.
#[derive(Debug)]
pub struct OverlayLayer {
    next_id: u32,
    nodes: BTreeMap<OverlayNodeId, OverlayNode>,
    pending: Vec<OverlayOp>,
}

impl OverlayLayer {
    /// Ids are allocated from `id_base` so layers of different trackers never collide.
    pub fn with_id_base(id_base: u32) -> Self {
        OverlayLayer {
            next_id: id_base,
            nodes: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn create(
        &mut self,
        kind: OverlayKind,
        anchor: Anchor,
        style: OverlayStyle,
        text: Option<String>,
    ) -> OverlayNodeId {
        let id = OverlayNodeId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let node = OverlayNode {
            id,
            kind,
            anchor,
            style,
            text,
        };
        self.pending.push(OverlayOp::Create { node: node.clone() });
        self.nodes.insert(id, node);
        id
    }

    pub fn update(
        &mut self,
        id: OverlayNodeId,
        style: OverlayStyle,
        text: Option<String>,
    ) -> Result<(), EngineError> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| EngineError::Overlay {
            node: id,
            message: "update of a node that is not injected".to_string(),
        })?;
        if node.style == style && node.text == text {
            return Ok(());
        }
        node.style = style;
        node.text = text;
        self.pending.push(OverlayOp::Update { node: node.clone() });
        Ok(())
    }

    pub fn remove(&mut self, id: OverlayNodeId) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        self.pending.push(OverlayOp::Remove { id });
        true
    }

    /// The host could not insert this node. Drop it without emitting a remove.
    pub fn forget(&mut self, id: OverlayNodeId) -> bool {
        self.pending.retain(|op| match op {
            OverlayOp::Create { node } | OverlayOp::Update { node } => node.id != id,
            OverlayOp::Remove { .. } => true,
        });
        self.nodes.remove(&id).is_some()
    }

    /// Remove every node this layer created.
    pub fn clear(&mut self) {
        let ids: Vec<OverlayNodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }

    pub fn drain_ops(&mut self) -> Vec<OverlayOp> {
        std::mem::take(&mut self.pending)
    }

    pub fn contains(&self, id: OverlayNodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: OverlayNodeId) -> Option<&OverlayNode> {
        self.nodes.get(&id)
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn count_kind(&self, kind: OverlayKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }
}

/// Update `slot` in place, or (re)create it if the host lost it.
fn ensure(
    layer: &mut OverlayLayer,
    slot: &mut Option<OverlayNodeId>,
    kind: OverlayKind,
    anchor: Anchor,
    style: OverlayStyle,
    text: Option<String>,
) {
    if let Some(id) = *slot {
        match layer.update(id, style.clone(), text.clone()) {
            Ok(()) => return,
            Err(err) => warn!("recreating overlay node: {err}"),
        }
    }
    *slot = Some(layer.create(kind, anchor, style, text));
}

fn drop_slot(layer: &mut OverlayLayer, slot: &mut Option<OverlayNodeId>) {
    if let Some(id) = slot.take() {
        layer.remove(id);
    }
}

// ---------------------------------------------------------------------------
// Telemetry panel
// ---------------------------------------------------------------------------

/// One line of the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub score: f64,
    pub reasons: Vec<&'static str>,
    pub preview: String,
    pub attended: bool,
}

impl CandidateSummary {
    pub fn new(score: f64, reasons: &[&'static str], text: &str, attended: bool) -> Self {
        let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
        if text.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        CandidateSummary {
            score,
            reasons: reasons.to_vec(),
            preview,
            attended,
        }
    }
}

/// Coarse page state shown in the panel footer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PageState {
    pub scroll_velocity: f64,
    pub is_page_active: bool,
    pub text_elements_count: usize,
}

/// Everything the panel shows for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub message: String,
    pub top_candidates: Vec<CandidateSummary>,
    pub sustained: Option<SustainedAttentionSnapshot>,
    pub page: PageState,
}

/// Plain-text body of the panel.
pub fn format_panel(frame: &TelemetryFrame) -> String {
    let mut out = String::from("COGNITIVE TELEMETRY\n");
    out.push_str(&format!("STATUS: {}\n", frame.message));

    let sustained = frame
        .sustained
        .as_ref()
        .filter(|_| !frame.top_candidates.is_empty());
    if let Some(s) = sustained {
        let progress =
            (s.duration as f64 / s.cognitive_attention_threshold as f64 * 100.0).min(100.0);
        let filled = (progress / 10.0).floor() as usize;
        let bar = format!(
            "{}{}",
            "█".repeat(filled),
            "░".repeat(PROGRESS_CELLS.saturating_sub(filled))
        );
        let icon = if s.threshold_met() { '●' } else { '○' };

        out.push_str(&format!(
            "{icon} SUSTAINED_ATTN: {:.1}S / {:.0}S\n",
            s.duration as f64 / 1000.0,
            s.cognitive_attention_threshold as f64 / 1000.0
        ));
        out.push_str(&format!("[{bar}] {progress:.0}%\n"));
        out.push_str(&format!("CONFIDENCE_SCORE: {}%\n", s.confidence));
        out.push_str(&format!(
            "READ_PROGRESS: {}/{} WDS ({:.0}%)\n",
            s.words_read, s.total_words, s.reading_progress
        ));
        out.push_str(&format!("VELOCITY: {} WPM\n", s.words_per_minute));
        if s.threshold_met() {
            out.push_str("✓ Threshold reached. Context locked.\n");
        }

        out.push_str("TOP_CANDIDATES:\n");
        for (idx, c) in frame.top_candidates.iter().enumerate() {
            let badge = if c.attended { " [🧠]" } else { "" };
            out.push_str(&format!("#{} // SCR: {:.0}{}\n", idx + 1, c.score, badge));
            out.push_str(&format!("SIG: {}\n", c.reasons.join(" + ")));
            out.push_str(&format!("\"{}\"\n", c.preview));
        }
    }

    out.push_str(&format!(
        "VEL: {:.0} PX/S  ACT: {}  NODE: {}",
        frame.page.scroll_velocity,
        if frame.page.is_page_active { "TRUE" } else { "FALSE" },
        frame.page.text_elements_count
    ));
    out
}

/// Fixed-position panel in the top-right corner.
#[derive(Debug, Default)]
pub struct TelemetryPanel {
    panel: Option<OverlayNodeId>,
}

impl TelemetryPanel {
    pub fn render(&mut self, layer: &mut OverlayLayer, frame: &TelemetryFrame) {
        let style = OverlayStyle {
            positioning: Positioning::Fixed,
            rect: None,
            progress: None,
            complete: frame.sustained.as_ref().is_some_and(|s| s.threshold_met()),
        };
        ensure(
            layer,
            &mut self.panel,
            OverlayKind::DebugPanel,
            Anchor::Body,
            style,
            Some(format_panel(frame)),
        );
    }

    pub fn remove(&mut self, layer: &mut OverlayLayer) {
        drop_slot(layer, &mut self.panel);
    }

    pub fn is_shown(&self) -> bool {
        self.panel.is_some()
    }
}

// ---------------------------------------------------------------------------
// Text highlight
// ---------------------------------------------------------------------------

/// Box around the active text candidate plus a reading-progress fill and label.
#[derive(Debug, Default)]
pub struct TextHighlight {
    frame: Option<OverlayNodeId>,
    fill: Option<OverlayNodeId>,
    label: Option<OverlayNodeId>,
}

impl TextHighlight {
    /// `bounds` are viewport coordinates; `scroll` converts them to document ones.
    pub fn render(
        &mut self,
        layer: &mut OverlayLayer,
        bounds: Rect,
        scroll: (f64, f64),
        sustained: Option<&SustainedAttentionSnapshot>,
    ) {
        let doc = bounds.translated(scroll.0, scroll.1);
        ensure(
            layer,
            &mut self.frame,
            OverlayKind::TextHighlight,
            Anchor::Body,
            OverlayStyle::at(Positioning::Absolute, doc),
            None,
        );

        let progress = sustained
            .filter(|s| s.threshold_met() && s.reading_progress > 0.0)
            .map(|s| s.reading_progress.min(100.0));
        let Some(progress) = progress else {
            drop_slot(layer, &mut self.fill);
            drop_slot(layer, &mut self.label);
            return;
        };

        let fill_height = doc.height * progress / 100.0;
        let mut fill_style =
            OverlayStyle::at(Positioning::Absolute, Rect::new(doc.left, doc.top, doc.width, fill_height));
        fill_style.progress = Some(progress);
        ensure(
            layer,
            &mut self.fill,
            OverlayKind::ReadingProgress,
            Anchor::Body,
            fill_style,
            None,
        );

        if progress < 100.0 {
            let label_rect = Rect::new(doc.right() - 60.0, doc.top + fill_height - 20.0, 60.0, 20.0);
            ensure(
                layer,
                &mut self.label,
                OverlayKind::ProgressLabel,
                Anchor::Body,
                OverlayStyle::at(Positioning::Absolute, label_rect),
                Some(format!("{progress:.0}% read")),
            );
        } else {
            drop_slot(layer, &mut self.label);
        }
    }

    pub fn clear(&mut self, layer: &mut OverlayLayer) {
        drop_slot(layer, &mut self.frame);
        drop_slot(layer, &mut self.fill);
        drop_slot(layer, &mut self.label);
    }
}

// ---------------------------------------------------------------------------
// Image hover highlight
// ---------------------------------------------------------------------------

/// Frame over the hovered image with a border that fills clockwise.
#[derive(Debug, Default)]
pub struct ImageHighlight {
    frame: Option<OverlayNodeId>,
    border: Option<OverlayNodeId>,
}

impl ImageHighlight {
    pub fn render(&mut self, layer: &mut OverlayLayer, bounds: Rect, progress: f64) {
        let progress = progress.clamp(0.0, 100.0);
        ensure(
            layer,
            &mut self.frame,
            OverlayKind::ImageFrame,
            Anchor::Body,
            OverlayStyle::at(Positioning::Fixed, bounds),
            None,
        );

        let mut border = OverlayStyle::at(Positioning::Fixed, bounds);
        border.progress = Some(progress);
        border.complete = progress >= 100.0;
        ensure(
            layer,
            &mut self.border,
            OverlayKind::ImageProgress,
            Anchor::Body,
            border,
            None,
        );
    }

    pub fn hide(&mut self, layer: &mut OverlayLayer) {
        drop_slot(layer, &mut self.frame);
        drop_slot(layer, &mut self.border);
    }

    pub fn is_shown(&self) -> bool {
        self.frame.is_some()
    }
}

// ---------------------------------------------------------------------------
// Audio indicators
// ---------------------------------------------------------------------------

/// Thin progress bar under each playing audio element.
#[derive(Debug, Default)]
pub struct AudioIndicators {
    by_node: HashMap<NodeId, OverlayNodeId>,
}

impl AudioIndicators {
    pub fn render(&mut self, layer: &mut OverlayLayer, node: NodeId, progress: f64) {
        let progress = progress.clamp(0.0, 100.0);
        let style = OverlayStyle {
            positioning: Positioning::Relative,
            rect: None,
            progress: Some(progress),
            complete: progress >= 100.0,
        };
        let mut slot = self.by_node.get(&node).copied();
        ensure(
            layer,
            &mut slot,
            OverlayKind::AudioIndicator,
            Anchor::Element { node },
            style,
            None,
        );
        if let Some(id) = slot {
            self.by_node.insert(node, id);
        }
    }

    pub fn hide(&mut self, layer: &mut OverlayLayer, node: NodeId) {
        if let Some(id) = self.by_node.remove(&node) {
            layer.remove(id);
        }
    }

    pub fn clear(&mut self, layer: &mut OverlayLayer) {
        for (_, id) in self.by_node.drain() {
            layer.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}
