// Text attention tracker.
// Layout passes feed the locator, the top candidate drives the state machine,
// and sustained updates go through the watermark cache as word deltas.

use log::{debug, info, warn};

use crate::attention::{
    AttentionEvent, AttentionThresholds, Focus, Phase, SustainedAttentionMachine,
};
use crate::dedup::WatermarkCache;
use crate::error::EngineError;
use crate::locator::{AttentionCandidate, CandidateLocator, ElementHandle};
use crate::message::{AttentionMessage, TextAttentionPayload};
use crate::overlay::*;
use crate::tracker::AttentionTracker;
use crate::types::*;

/// Overlay ids for this tracker start here.
const TEXT_OVERLAY_ID_BASE: u32 = 0x0100_0000;
/// Candidates listed in the telemetry panel.
const PANEL_CANDIDATES: usize = 3;
/// Scroll velocity decays to zero after this long without a scroll event.
const SCROLL_SETTLE_MS: u64 = 1_000;

pub struct TextTracker {
    page_url: String,
    debug_mode: bool,
    show_overlay: bool,
    locator: CandidateLocator,
    machine: SustainedAttentionMachine,
    watermarks: WatermarkCache,
    layer: OverlayLayer,
    panel: TelemetryPanel,
    highlight: TextHighlight,
    last_tick: Option<Timestamp>,
    scroll: (f64, f64),
    last_scroll_at: Option<Timestamp>,
    scroll_velocity: f64,
    foreground: bool,
    destroyed: bool,
}

impl TextTracker {
    pub fn new(config: &EngineConfig) -> Self {
        TextTracker {
            page_url: config.page_url.clone(),
            debug_mode: config.debug_mode,
            show_overlay: config.show_overlay,
            locator: CandidateLocator::new(),
            machine: SustainedAttentionMachine::new(AttentionThresholds::from(config)),
            watermarks: WatermarkCache::new(),
            layer: OverlayLayer::with_id_base(TEXT_OVERLAY_ID_BASE),
            panel: TelemetryPanel::default(),
            highlight: TextHighlight::default(),
            last_tick: None,
            scroll: (0.0, 0.0),
            last_scroll_at: None,
            scroll_velocity: 0.0,
            foreground: true,
            destroyed: false,
        }
    }

    pub fn set_debug_mode(&mut self, debug_mode: bool) {
        if self.destroyed {
            return;
        }
        self.debug_mode = debug_mode;
        if debug_mode {
            self.render();
        } else {
            self.panel.remove(&mut self.layer);
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn top_candidate(&self) -> Option<&AttentionCandidate> {
        self.locator.top()
    }

    pub fn candidates(&self) -> &[AttentionCandidate] {
        self.locator.candidates()
    }

    /// Point the machine at whatever the locator ranks first now.
    fn reselect(&mut self) {
        let next = self.locator.top().map(|c| Focus {
            key: c.element,
            total_words: c.total_words,
            attended: c.cognitively_attended,
        });
        self.machine.on_candidate_changed(next);
    }

    fn on_tick(&mut self, now: Timestamp) -> Option<AttentionMessage> {
        if self
            .last_scroll_at
            .is_some_and(|at| now.millis_since(at) > SCROLL_SETTLE_MS)
        {
            self.scroll_velocity = 0.0;
        }

        if !self.foreground {
            return None;
        }
        let elapsed = self.last_tick.map_or(0, |last| now.millis_since(last));
        self.last_tick = Some(now);

        let transition = self.machine.on_tick(elapsed);
        let focus = *self.machine.focus()?;
        let duration = self.machine.duration();
        if let Some(candidate) = self.locator.candidate_mut(focus.key) {
            candidate.sustained_duration = duration;
            candidate.cognitively_attended |= focus.attended;
        }

        let event = transition.event?;
        self.report(focus.key, &event, now)
    }

    /// Turn a sustained update into a text delta, if anything new was read.
    fn report(
        &mut self,
        element: ElementHandle,
        event: &AttentionEvent,
        now: Timestamp,
    ) -> Option<AttentionMessage> {
        if self.locator.resolve(element).is_none() {
            debug!("sustained update for a detached element, skipping");
            return None;
        }
        let text = self
            .locator
            .candidates()
            .iter()
            .find(|c| c.element == element)
            .map(|c| c.text.clone())?;

        let snapshot = event.snapshot();
        let delta = self.watermarks.advance(&text, snapshot.words_read)?;
        info!(
            "text attention: {} new words ({}% confidence)",
            delta.words, snapshot.confidence
        );

        Some(AttentionMessage::Text(TextAttentionPayload {
            url: self.page_url.clone(),
            text: delta.text,
            words_read: delta.words,
            timestamp: now,
        }))
    }

    fn on_scroll(&mut self, now: Timestamp, scroll_x: f64, scroll_y: f64) {
        let dx = scroll_x - self.scroll.0;
        let dy = scroll_y - self.scroll.1;
        if let Some(at) = self.last_scroll_at {
            let dt = now.millis_since(at);
            if dt > 0 {
                self.scroll_velocity = dy.abs() / dt as f64 * 1000.0;
            }
        }
        self.last_scroll_at = Some(now);
        self.scroll = (scroll_x, scroll_y);
        self.locator.scroll_by(dx, dy);
    }

    fn status(&self) -> &'static str {
        if !self.foreground {
            return "page inactive";
        }
        match (self.locator.top(), self.machine.phase()) {
            (None, _) => "no reading candidates",
            (Some(_), Phase::Idle) => "waiting",
            (Some(_), Phase::Accumulating) => "accumulating attention",
            (Some(_), Phase::Sustained) => "sustained attention",
        }
    }

    fn render(&mut self) {
        if self.destroyed {
            return;
        }
        let sustained = self.machine.snapshot();

        if self.debug_mode {
            let frame = TelemetryFrame {
                message: self.status().to_string(),
                top_candidates: self
                    .locator
                    .candidates()
                    .iter()
                    .take(PANEL_CANDIDATES)
                    .map(|c| CandidateSummary::new(c.score, &c.reasons, &c.text, c.cognitively_attended))
                    .collect(),
                sustained: sustained.clone(),
                page: PageState {
                    scroll_velocity: self.scroll_velocity,
                    is_page_active: self.foreground,
                    text_elements_count: self.locator.candidates().len(),
                },
            };
            self.panel.render(&mut self.layer, &frame);
        }

        if self.show_overlay {
            match self.locator.top().map(|c| c.bounds) {
                Some(bounds) => {
                    self.highlight
                        .render(&mut self.layer, bounds, self.scroll, sustained.as_ref())
                }
                None => self.highlight.clear(&mut self.layer),
            }
        }
    }
}

impl AttentionTracker for TextTracker {
    fn handle(&mut self, event: &InputEvent) -> Result<Vec<AttentionMessage>, EngineError> {
        if self.destroyed {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();
        match &event.event_type {
            EventType::Tick => {
                messages.extend(self.on_tick(event.timestamp));
            }
            EventType::Visibility { visible, focused } => {
                self.foreground = *visible && *focused;
                self.machine.on_visibility_changed(self.foreground);
            }
            EventType::Scroll { scroll_x, scroll_y } => {
                self.on_scroll(event.timestamp, *scroll_x, *scroll_y);
            }
            EventType::Layout {
                trigger,
                viewport,
                blocks,
            } => {
                if !viewport.width.is_finite() || !viewport.height.is_finite() {
                    return Err(EngineError::InvalidSignal(format!(
                        "non-finite viewport in {trigger:?} layout pass"
                    )));
                }
                self.scroll = (viewport.scroll_x, viewport.scroll_y);
                let count = self.locator.locate(viewport, blocks).len();
                debug!("{trigger:?} layout pass: {count} of {} blocks eligible", blocks.len());
                self.reselect();
            }
            EventType::NodeRemoved { node } => {
                if self.locator.remove_node(*node) {
                    self.reselect();
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
            self.highlight.clear(&mut self.layer);
        }
    }

    fn report_overlay_failure(&mut self, node: OverlayNodeId, message: &str) -> bool {
        if !self.layer.forget(node) {
            return false;
        }
        warn!("text overlay node {} failed to render: {message}", node.as_u32());
        true
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.panel.remove(&mut self.layer);
        self.highlight.clear(&mut self.layer);
        self.layer.clear();
        self.locator.clear();
        self.machine.on_candidate_changed(None);
        self.destroyed = true;
        debug!("text tracker destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn overlay_node_count(&self) -> usize {
        self.layer.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            page_url: "https://blog.test/post".to_string(),
            debug_mode: true,
            show_overlay: true,
            cognitive_attention_threshold: 3_000,
            idle_threshold: 5_000,
            words_per_minute: 600,
            ..Default::default()
        }
    }

    fn at(ms: u64, event_type: EventType) -> InputEvent {
        InputEvent {
            timestamp: Timestamp::from_millis(ms),
            event_type,
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn layout(ms: u64, blocks: Vec<TextBlock>) -> InputEvent {
        at(
            ms,
            EventType::Layout {
                trigger: LayoutTrigger::Init,
                viewport: Viewport {
                    width: 1_000.0,
                    height: 800.0,
                    scroll_x: 0.0,
                    scroll_y: 0.0,
                },
                blocks,
            },
        )
    }

    fn paragraph(id: u32, words: usize) -> TextBlock {
        TextBlock {
            node: NodeId::new(id),
            text: numbered(words),
            bounds: Rect::new(50.0, 350.0, 600.0, 100.0),
        }
    }

    fn run(tracker: &mut TextTracker, events: &[InputEvent]) -> Vec<AttentionMessage> {
        events
            .iter()
            .flat_map(|e| tracker.handle(e).unwrap())
            .collect()
    }

    #[test]
    fn sustained_reading_emits_incremental_deltas() {
        let mut tracker = TextTracker::new(&config());
        let mut events = vec![layout(0, vec![paragraph(1, 200)])];
        for i in 0..=5 {
            events.push(at(i * 1_000, EventType::Tick));
        }
        let messages = run(&mut tracker, &events);

        // 600 wpm = 10 words/s; crossing at 3s, then 4s and 5s
        let words: Vec<usize> = messages
            .iter()
            .map(|m| match m {
                AttentionMessage::Text(p) => p.words_read,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(words, vec![30, 10, 10]);

        let AttentionMessage::Text(second) = &messages[1] else {
            unreachable!()
        };
        assert_eq!(second.text, (31..=40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" "));
        assert_eq!(second.url, "https://blog.test/post");
        assert_eq!(second.timestamp, Timestamp::from_millis(4_000));
        assert!(tracker.top_candidate().unwrap().cognitively_attended);
    }

    #[test]
    fn hidden_page_does_not_accumulate() {
        let mut tracker = TextTracker::new(&config());
        let events = vec![
            layout(0, vec![paragraph(1, 200)]),
            at(0, EventType::Tick),
            at(500, EventType::Visibility { visible: false, focused: false }),
            at(1_000, EventType::Tick),
            at(9_000, EventType::Tick),
            at(10_000, EventType::Visibility { visible: true, focused: true }),
            at(10_500, EventType::Tick),
        ];
        assert!(run(&mut tracker, &events).is_empty());
        // the first visible tick came after a gap longer than the idle threshold
        assert_eq!(tracker.top_candidate().unwrap().sustained_duration, 0);
    }

    #[test]
    fn removing_the_active_node_abandons_it() {
        let mut tracker = TextTracker::new(&config());
        let events = vec![
            layout(0, vec![paragraph(1, 200)]),
            at(0, EventType::Tick),
            at(2_000, EventType::Tick),
            at(2_100, EventType::NodeRemoved { node: NodeId::new(1) }),
            at(4_000, EventType::Tick),
        ];
        assert!(run(&mut tracker, &events).is_empty());
        assert!(tracker.top_candidate().is_none());
        assert_eq!(tracker.phase(), Phase::Idle);
    }

    #[test]
    fn short_paragraphs_never_report() {
        let mut tracker = TextTracker::new(&config());
        let mut events = vec![layout(0, vec![paragraph(1, 5)])];
        for i in 0..10 {
            events.push(at(i * 1_000, EventType::Tick));
        }
        assert!(run(&mut tracker, &events).is_empty());
    }

    #[test]
    fn overlay_toggles_take_effect_immediately() {
        let mut tracker = TextTracker::new(&config());
        run(&mut tracker, &[layout(0, vec![paragraph(1, 200)])]);
        assert_eq!(tracker.layer.count_kind(OverlayKind::DebugPanel), 1);
        assert_eq!(tracker.layer.count_kind(OverlayKind::TextHighlight), 1);

        tracker.set_debug_mode(false);
        assert_eq!(tracker.layer.count_kind(OverlayKind::DebugPanel), 0);
        tracker.set_show_overlay(false);
        assert_eq!(tracker.overlay_node_count(), 0);

        tracker.set_debug_mode(true);
        assert_eq!(tracker.layer.count_kind(OverlayKind::DebugPanel), 1);
    }

    #[test]
    fn scroll_refreshes_highlight_position() {
        let mut tracker = TextTracker::new(&config());
        run(&mut tracker, &[layout(0, vec![paragraph(1, 200)])]);
        tracker.take_overlay_ops();

        run(&mut tracker, &[at(100, EventType::Scroll { scroll_x: 0.0, scroll_y: 40.0 })]);
        assert_eq!(tracker.top_candidate().unwrap().bounds.top, 310.0);
        // document position is unchanged, so the highlight box itself needs no update
        let ops = tracker.take_overlay_ops();
        assert!(ops.iter().all(|op| !matches!(
            op,
            OverlayOp::Update { node } if node.kind == OverlayKind::TextHighlight
        )));
    }

    #[test]
    fn destroy_removes_nodes_and_silences_events() {
        let mut tracker = TextTracker::new(&config());
        run(&mut tracker, &[layout(0, vec![paragraph(1, 200)]), at(0, EventType::Tick)]);
        assert!(tracker.overlay_node_count() > 0);

        tracker.destroy();
        tracker.destroy();
        assert_eq!(tracker.overlay_node_count(), 0);
        let ops = tracker.take_overlay_ops();
        assert!(ops.iter().any(|op| matches!(op, OverlayOp::Remove { .. })));

        let late = run(
            &mut tracker,
            &[
                layout(1_000, vec![paragraph(1, 200)]),
                at(4_000, EventType::Tick),
                at(5_000, EventType::Tick),
            ],
        );
        assert!(late.is_empty());
        assert!(tracker.take_overlay_ops().is_empty());
        assert_eq!(tracker.overlay_node_count(), 0);
    }

    #[test]
    fn failed_overlay_node_is_forgotten() {
        let mut tracker = TextTracker::new(&config());
        run(&mut tracker, &[layout(0, vec![paragraph(1, 200)])]);
        let created: Vec<OverlayNodeId> = tracker
            .take_overlay_ops()
            .into_iter()
            .filter_map(|op| match op {
                OverlayOp::Create { node } => Some(node.id),
                _ => None,
            })
            .collect();
        assert!(tracker.report_overlay_failure(created[0], "appendChild threw"));
        assert!(!tracker.report_overlay_failure(OverlayNodeId::new(1), "not ours"));

        // tracking keeps working
        let messages = run(
            &mut tracker,
            &[at(0, EventType::Tick), at(1_500, EventType::Tick), at(3_000, EventType::Tick)],
        );
        assert_eq!(messages.len(), 1);
    }
}
