// Audio playback tracker.
// Counts playback time per element only while it is actually playing, and
// reports an element once its cumulative playback crosses the threshold.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::dedup::SourceSet;
use crate::error::EngineError;
use crate::message::{AttentionMessage, AudioAttentionPayload};
use crate::overlay::{AudioIndicators, OverlayLayer, OverlayOp};
use crate::tracker::AttentionTracker;
use crate::types::*;

const AUDIO_OVERLAY_ID_BASE: u32 = 0x0300_0000;

/// How much of the track was heard, 0-100. Zero when the length is unknown.
pub fn playback_confidence(playback_ms: u64, total_secs: f64) -> u8 {
    if !total_secs.is_finite() || total_secs <= 0.0 {
        return 0;
    }
    (playback_ms as f64 / 1000.0 / total_secs * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

#[derive(Debug)]
struct Playback {
    info: AudioInfo,
    playing_since: Option<Timestamp>,
    played_ms: u64,
    reported: bool,
}

impl Playback {
    /// Fold time since the last checkpoint into `played_ms`.
    fn checkpoint(&mut self, now: Timestamp) {
        if let Some(since) = self.playing_since {
            self.played_ms += now.millis_since(since);
            self.playing_since = Some(now);
        }
    }

    fn stop(&mut self, now: Timestamp) {
        self.checkpoint(now);
        self.playing_since = None;
    }
}

pub struct AudioTracker {
    page_url: String,
    threshold: u64,
    show_overlay: bool,
    players: BTreeMap<NodeId, Playback>,
    active: Option<NodeId>,
    sources: SourceSet,
    layer: OverlayLayer,
    indicators: AudioIndicators,
    destroyed: bool,
}

impl AudioTracker {
    pub fn new(config: &EngineConfig) -> Self {
        AudioTracker {
            page_url: config.page_url.clone(),
            threshold: config.playback_threshold,
            show_overlay: config.show_overlay,
            players: BTreeMap::new(),
            active: None,
            sources: SourceSet::new(),
            layer: OverlayLayer::with_id_base(AUDIO_OVERLAY_ID_BASE),
            indicators: AudioIndicators::default(),
            destroyed: false,
        }
    }

    /// The element that most recently started playing.
    pub fn active(&self) -> Option<NodeId> {
        self.active
    }

    pub fn played_ms(&self, node: NodeId) -> Option<u64> {
        self.players.get(&node).map(|p| p.played_ms)
    }

    pub fn is_playing(&self, node: NodeId) -> bool {
        self.players
            .get(&node)
            .is_some_and(|p| p.playing_since.is_some())
    }

    fn progress(&self, playback: &Playback) -> f64 {
        (playback.played_ms as f64 / self.threshold as f64 * 100.0).min(100.0)
    }

    /// Report `node` if it just crossed the threshold.
    fn check(&mut self, node: NodeId, now: Timestamp) -> Option<AttentionMessage> {
        let playback = self.players.get_mut(&node)?;
        if playback.reported || playback.played_ms < self.threshold {
            return None;
        }
        playback.reported = true;

        if !self.sources.first_sighting(&playback.info.src) {
            debug!("audio {} already reported on this page", playback.info.src);
            return None;
        }

        let confidence = playback_confidence(playback.played_ms, playback.info.duration);
        info!(
            "audio attention: {} after {}ms of playback ({}% confidence)",
            playback.info.src, playback.played_ms, confidence
        );
        Some(AttentionMessage::Audio(AudioAttentionPayload {
            url: self.page_url.clone(),
            src: playback.info.src.clone(),
            title: playback.info.title.clone(),
            duration: if playback.info.duration.is_finite() {
                playback.info.duration
            } else {
                0.0
            },
            playback_duration: playback.played_ms,
            current_time: playback.info.current_time,
            confidence,
            timestamp: now,
        }))
    }

    fn render(&mut self, node: NodeId) {
        if !self.show_overlay || self.destroyed {
            return;
        }
        let Some(progress) = self.players.get(&node).map(|p| self.progress(p)) else {
            return;
        };
        self.indicators.render(&mut self.layer, node, progress);
    }

    fn stop(&mut self, node: NodeId, now: Timestamp) -> Option<AttentionMessage> {
        self.players.get_mut(&node)?.stop(now);
        let message = self.check(node, now);
        self.render(node);
        message
    }
}

impl AttentionTracker for AudioTracker {
    fn handle(&mut self, event: &InputEvent) -> Result<Vec<AttentionMessage>, EngineError> {
        if self.destroyed {
            return Ok(Vec::new());
        }

        let now = event.timestamp;
        let mut messages = Vec::new();
        match &event.event_type {
            EventType::MediaPlay { media } => {
                if media.src.is_empty() {
                    return Err(EngineError::InvalidSignal(format!(
                        "audio {} has no src",
                        media.node.as_u32()
                    )));
                }
                let playback = self.players.entry(media.node).or_insert_with(|| Playback {
                    info: media.clone(),
                    playing_since: None,
                    played_ms: 0,
                    reported: false,
                });
                if playback.info.src != media.src {
                    // element was pointed at a new source; start over
                    playback.played_ms = 0;
                    playback.reported = false;
                }
                playback.info = media.clone();
                if playback.playing_since.is_none() {
                    playback.playing_since = Some(now);
                }
                self.active = Some(media.node);
                self.render(media.node);
            }
            EventType::MediaPause { node }
            | EventType::MediaWaiting { node }
            | EventType::MediaEnded { node } => {
                messages.extend(self.stop(*node, now));
            }
            EventType::MediaTimeUpdate {
                node,
                current_time,
                duration,
            } => {
                if let Some(playback) = self.players.get_mut(node) {
                    playback.info.current_time = *current_time;
                    playback.info.duration = *duration;
                    playback.checkpoint(now);
                    messages.extend(self.check(*node, now));
                    self.render(*node);
                }
            }
            EventType::Tick => {
                let playing: Vec<NodeId> = self
                    .players
                    .iter()
                    .filter(|(_, p)| p.playing_since.is_some())
                    .map(|(node, _)| *node)
                    .collect();
                for node in playing {
                    if let Some(playback) = self.players.get_mut(&node) {
                        playback.checkpoint(now);
                    }
                    messages.extend(self.check(node, now));
                    self.render(node);
                }
            }
            EventType::NodeRemoved { node } => {
                if self.players.remove(node).is_some() {
                    self.indicators.hide(&mut self.layer, *node);
                    if self.active == Some(*node) {
                        self.active = None;
                    }
                }
            }
            _ => {}
        }

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
            let nodes: Vec<NodeId> = self.players.keys().copied().collect();
            for node in nodes {
                self.render(node);
            }
        } else {
            self.indicators.clear(&mut self.layer);
        }
    }

    fn report_overlay_failure(&mut self, node: OverlayNodeId, message: &str) -> bool {
        if !self.layer.forget(node) {
            return false;
        }
        warn!("audio overlay node {} failed to render: {message}", node.as_u32());
        true
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.indicators.clear(&mut self.layer);
        self.layer.clear();
        self.players.clear();
        self.active = None;
        self.destroyed = true;
        debug!("audio tracker destroyed");
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
            page_url: "https://podcast.test/ep1".to_string(),
            show_overlay: true,
            playback_threshold: 3_000,
            ..Default::default()
        }
    }

    fn at(ms: u64, event_type: EventType) -> InputEvent {
        InputEvent {
            timestamp: Timestamp::from_millis(ms),
            event_type,
        }
    }

    fn track(id: u32, src: &str, duration: f64) -> AudioInfo {
        AudioInfo {
            node: NodeId::new(id),
            src: src.to_string(),
            title: "Episode 1".to_string(),
            duration,
            current_time: 0.0,
        }
    }

    fn run(tracker: &mut AudioTracker, events: &[InputEvent]) -> Vec<AttentionMessage> {
        events
            .iter()
            .flat_map(|e| tracker.handle(e).unwrap())
            .collect()
    }

    #[test]
    fn playback_past_threshold_reports_once() {
        let mut tracker = AudioTracker::new(&config());
        let messages = run(
            &mut tracker,
            &[
                at(0, EventType::MediaPlay { media: track(1, "https://cdn.test/ep1.mp3", 60.0) }),
                at(1_000, EventType::Tick),
                at(
                    3_000,
                    EventType::MediaTimeUpdate {
                        node: NodeId::new(1),
                        current_time: 3.0,
                        duration: 60.0,
                    },
                ),
                at(4_000, EventType::Tick),
            ],
        );
        assert_eq!(messages.len(), 1);
        let AttentionMessage::Audio(payload) = &messages[0] else {
            panic!("expected audio payload");
        };
        assert_eq!(payload.playback_duration, 3_000);
        assert_eq!(payload.current_time, 3.0);
        assert_eq!(payload.duration, 60.0);
        assert_eq!(payload.confidence, 5);
        assert_eq!(payload.title, "Episode 1");
    }

    #[test]
    fn paused_time_does_not_count() {
        let mut tracker = AudioTracker::new(&config());
        let node = NodeId::new(1);
        let messages = run(
            &mut tracker,
            &[
                at(0, EventType::MediaPlay { media: track(1, "https://cdn.test/a.mp3", 30.0) }),
                at(1_000, EventType::MediaPause { node }),
                at(20_000, EventType::Tick),
                at(21_000, EventType::MediaPlay { media: track(1, "https://cdn.test/a.mp3", 30.0) }),
                at(22_000, EventType::MediaWaiting { node }),
                at(40_000, EventType::Tick),
            ],
        );
        assert!(messages.is_empty());
        assert_eq!(tracker.played_ms(node), Some(2_000));
        assert!(!tracker.is_playing(node));

        let messages = run(
            &mut tracker,
            &[
                at(41_000, EventType::MediaPlay { media: track(1, "https://cdn.test/a.mp3", 30.0) }),
                at(42_500, EventType::MediaEnded { node }),
            ],
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(tracker.played_ms(node), Some(3_500));
    }

    #[test]
    fn same_source_on_two_elements_reports_once() {
        let mut tracker = AudioTracker::new(&config());
        let src = "https://cdn.test/theme.mp3";
        let messages = run(
            &mut tracker,
            &[
                at(0, EventType::MediaPlay { media: track(1, src, 10.0) }),
                at(5_000, EventType::MediaPause { node: NodeId::new(1) }),
                at(6_000, EventType::MediaPlay { media: track(2, src, 10.0) }),
                at(12_000, EventType::Tick),
            ],
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(tracker.active(), Some(NodeId::new(2)));
    }

    #[test]
    fn confidence_tracks_listened_share() {
        assert_eq!(playback_confidence(3_000, 300.0), 1);
        assert_eq!(playback_confidence(150_000, 300.0), 50);
        assert_eq!(playback_confidence(900_000, 300.0), 100);
        assert_eq!(playback_confidence(3_000, f64::INFINITY), 0);
        assert_eq!(playback_confidence(3_000, f64::NAN), 0);
    }

    #[test]
    fn indicators_follow_elements_and_destroy_clears_them() {
        let mut tracker = AudioTracker::new(&config());
        run(
            &mut tracker,
            &[
                at(0, EventType::MediaPlay { media: track(1, "https://cdn.test/a.mp3", 30.0) }),
                at(0, EventType::MediaPlay { media: track(2, "https://cdn.test/b.mp3", 30.0) }),
            ],
        );
        assert_eq!(tracker.overlay_node_count(), 2);

        run(&mut tracker, &[at(10, EventType::NodeRemoved { node: NodeId::new(1) })]);
        assert_eq!(tracker.overlay_node_count(), 1);

        tracker.destroy();
        assert_eq!(tracker.overlay_node_count(), 0);
        let late = run(
            &mut tracker,
            &[
                at(20, EventType::MediaPlay { media: track(3, "https://cdn.test/c.mp3", 30.0) }),
                at(9_000, EventType::Tick),
            ],
        );
        assert!(late.is_empty());
        assert_eq!(tracker.overlay_node_count(), 0);
    }

    #[test]
    fn overlay_toggle_hides_indicators() {
        let mut tracker = AudioTracker::new(&config());
        run(
            &mut tracker,
            &[at(0, EventType::MediaPlay { media: track(1, "https://cdn.test/a.mp3", 30.0) })],
        );
        tracker.set_show_overlay(false);
        assert_eq!(tracker.overlay_node_count(), 0);
        tracker.set_show_overlay(true);
        assert_eq!(tracker.overlay_node_count(), 1);
    }
}
