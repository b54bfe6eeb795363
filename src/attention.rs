// Sustained-attention state machine for the text modality.
// Pure transition functions driven by the host event loop: every call returns
// the next phase plus at most one event, so it can be tested without a DOM or timer.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::locator::ElementHandle;
use crate::types::EngineConfig;

const MS_PER_MINUTE: f64 = 60_000.0;

/// Phase of the machine for the current candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Accumulating,
    Sustained,
}

/// Thresholds the machine runs against. Copied out of the engine config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttentionThresholds {
    pub cognitive_attention_threshold: u64,
    pub idle_threshold: u64,
    pub words_per_minute: u32,
}

impl From<&EngineConfig> for AttentionThresholds {
    fn from(config: &EngineConfig) -> Self {
        AttentionThresholds {
            cognitive_attention_threshold: config.cognitive_attention_threshold,
            idle_threshold: config.idle_threshold,
            words_per_minute: config.words_per_minute,
        }
    }
}

/// Point-in-time view of sustained attention on the active candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SustainedAttentionSnapshot {
    pub confidence: u8, // 0-100
    pub words_read: usize,
    pub total_words: usize,
    pub reading_progress: f64, // 0-100
    pub duration: u64,
    pub cognitive_attention_threshold: u64,
    pub words_per_minute: u32,
}

impl SustainedAttentionSnapshot {
    pub fn threshold_met(&self) -> bool {
        self.duration >= self.cognitive_attention_threshold
    }
}

/// Emitted while the machine is sustained.
#[derive(Debug, Clone, PartialEq)]
pub enum AttentionEvent {
    /// First threshold crossing for this candidate.
    Crossed(SustainedAttentionSnapshot),
    /// Any later sustained update.
    Progress(SustainedAttentionSnapshot),
}

impl AttentionEvent {
    pub fn snapshot(&self) -> &SustainedAttentionSnapshot {
        match self {
            AttentionEvent::Crossed(s) | AttentionEvent::Progress(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: Phase,
    pub event: Option<AttentionEvent>,
}

/// The element that became top-ranked, with what the locator already knows about it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Focus<K> {
    pub key: K,
    pub total_words: usize,
    pub attended: bool,
}

/// One machine per modality; a new candidate restarts it at `Idle`.
#[derive(Debug)]
pub struct SustainedAttentionMachine<K = ElementHandle> {
    thresholds: AttentionThresholds,
    focus: Option<Focus<K>>,
    phase: Phase,
    duration: u64,
    words_read: usize,
    foreground: bool,
}

impl<K: Copy + PartialEq + std::fmt::Debug> SustainedAttentionMachine<K> {
    pub fn new(thresholds: AttentionThresholds) -> Self {
        SustainedAttentionMachine {
            thresholds,
            focus: None,
            phase: Phase::Idle,
            duration: 0,
            words_read: 0,
            foreground: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn focus(&self) -> Option<&Focus<K>> {
        self.focus.as_ref()
    }

    pub fn is_attended(&self) -> bool {
        self.focus.is_some_and(|f| f.attended)
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    fn settle(&self, event: Option<AttentionEvent>) -> Transition {
        Transition {
            phase: self.phase,
            event,
        }
    }

    /// The top-ranked candidate changed (or disappeared).
    pub fn on_candidate_changed(&mut self, next: Option<Focus<K>>) -> Transition {
        let same = match (&self.focus, &next) {
            (Some(current), Some(next)) => current.key == next.key,
            (None, None) => true,
            _ => false,
        };
        if same {
            if let (Some(current), Some(next)) = (self.focus.as_mut(), next) {
                current.total_words = next.total_words;
                self.words_read = self.words_read.min(next.total_words);
            }
            return self.settle(None);
        }

        if let Some(previous) = &self.focus {
            if self.phase == Phase::Accumulating && self.duration > 0 {
                debug!(
                    "abandoning {:?} after {}ms without sustained attention",
                    previous.key, self.duration
                );
            }
        }

        self.focus = next;
        self.duration = 0;
        self.words_read = 0;
        self.phase = if self.focus.is_some() && self.foreground {
            Phase::Accumulating
        } else {
            Phase::Idle
        };
        self.settle(None)
    }

    /// Page became visible+focused (`true`) or backgrounded (`false`).
    pub fn on_visibility_changed(&mut self, foreground: bool) -> Transition {
        self.foreground = foreground;
        if foreground && self.phase == Phase::Idle && self.focus.is_some() {
            self.phase = Phase::Accumulating;
        }
        self.settle(None)
    }

    /// Timer tick; `elapsed_ms` is the gap since the previous tick.
    pub fn on_tick(&mut self, elapsed_ms: u64) -> Transition {
        if !self.foreground || self.phase == Phase::Idle {
            return self.settle(None);
        }
        let Some(focus) = self.focus else {
            return self.settle(None);
        };

        if elapsed_ms > self.thresholds.idle_threshold {
            debug!(
                "idle gap of {}ms on {:?}, resetting {}ms of accumulated attention",
                elapsed_ms, focus.key, self.duration
            );
            self.duration = 0;
            self.phase = Phase::Accumulating;
            return self.settle(None);
        }

        self.duration = self.duration.saturating_add(elapsed_ms);
        if self.duration < self.thresholds.cognitive_attention_threshold {
            return self.settle(None);
        }

        self.phase = Phase::Sustained;
        let implied = (self.duration as f64 * self.thresholds.words_per_minute as f64
            / MS_PER_MINUTE)
            .floor() as usize;
        self.words_read = self.words_read.max(implied).min(focus.total_words);

        let snapshot = self.snapshot_for(&focus);
        let event = if focus.attended {
            AttentionEvent::Progress(snapshot)
        } else {
            if let Some(current) = self.focus.as_mut() {
                current.attended = true;
            }
            debug!("sustained attention reached on {:?}", focus.key);
            AttentionEvent::Crossed(snapshot)
        };
        self.settle(Some(event))
    }

    /// Current snapshot for telemetry, if there is an active candidate.
    pub fn snapshot(&self) -> Option<SustainedAttentionSnapshot> {
        self.focus.as_ref().map(|f| self.snapshot_for(f))
    }

    fn snapshot_for(&self, focus: &Focus<K>) -> SustainedAttentionSnapshot {
        let reading_progress = if focus.total_words == 0 {
            0.0
        } else {
            self.words_read as f64 / focus.total_words as f64 * 100.0
        };

        SustainedAttentionSnapshot {
            confidence: self.confidence(),
            words_read: self.words_read,
            total_words: focus.total_words,
            reading_progress,
            duration: self.duration,
            cognitive_attention_threshold: self.thresholds.cognitive_attention_threshold,
            words_per_minute: self.thresholds.words_per_minute,
        }
    }

    /// How closely the implied reading pace matches the configured one.
    fn confidence(&self) -> u8 {
        if self.duration == 0 || self.words_read == 0 {
            return 0;
        }
        let minutes = self.duration as f64 / MS_PER_MINUTE;
        let pace = self.words_read as f64 / minutes;
        let expected = self.thresholds.words_per_minute as f64;
        let ratio = pace.min(expected) / pace.max(expected);
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}
