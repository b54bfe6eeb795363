// Candidate location for text attention.
// Scores visible block-level text from a layout pass. Candidates never hold
// page nodes, only generational handles into the element table.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::types::*;

/// Blocks with fewer words cannot represent reading and are never candidates.
pub const MIN_WORD_COUNT: usize = 10;

const VISIBLE_WEIGHT: f64 = 40.0;
const DENSITY_WEIGHT: f64 = 20.0;
const CENTER_WEIGHT: f64 = 30.0;
const WORDS_WEIGHT: f64 = 10.0;

/// Characters per square pixel of ordinary body copy.
const REFERENCE_DENSITY: f64 = 0.01;
/// Word count at which the word bonus saturates.
const FULL_WORDS: f64 = 100.0;

/// Weak reference to a page node: slot index plus the generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    node: Option<NodeId>,
    generation: u32,
}

/// Table of attached page nodes. Detaching bumps the slot generation so stale
/// handles stop resolving.
#[derive(Debug, Default)]
pub struct ElementTable {
    slots: Vec<Slot>,
    by_node: HashMap<NodeId, u32>,
    free: Vec<u32>,
}

impl ElementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `node`, reusing the live one if it is already attached.
    pub fn attach(&mut self, node: NodeId) -> ElementHandle {
        if let Some(&index) = self.by_node.get(&node) {
            return ElementHandle {
                index,
                generation: self.slots[index as usize].generation,
            };
        }

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    node: Some(node),
                    generation: 0,
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.by_node.insert(node, index);

        ElementHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Forget `node`. Returns false if it was not attached.
    pub fn detach(&mut self, node: NodeId) -> bool {
        let Some(index) = self.by_node.remove(&node) else {
            return false;
        };
        let slot = &mut self.slots[index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        true
    }

    /// The node behind `handle`, if it is still attached.
    pub fn resolve(&self, handle: ElementHandle) -> Option<NodeId> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node)
    }

    pub fn is_attached(&self, handle: ElementHandle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Detach every node for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        let gone: Vec<NodeId> = self
            .by_node
            .keys()
            .copied()
            .filter(|node| !keep(*node))
            .collect();
        for node in gone {
            self.detach(node);
        }
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// A scored element under consideration.
#[derive(Debug, Clone)]
pub struct AttentionCandidate {
    pub element: ElementHandle,
    pub text: String,
    pub total_words: usize,
    pub score: f64,
    /// Signals that contributed to `score`, in evaluation order.
    pub reasons: Vec<&'static str>,
    /// Last-known viewport rectangle.
    pub bounds: Rect,
    /// On-screen area in square pixels, used for tie-breaks.
    pub visible_area: f64,
    /// Position in document order within the pass that produced it.
    pub doc_order: usize,
    pub cognitively_attended: bool,
    pub sustained_duration: u64,
}

/// Result of scoring a single block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockScore {
    pub score: f64,
    pub reasons: Vec<&'static str>,
    pub visible_area: f64,
    pub total_words: usize,
}

/// Score one block against the viewport. `None` if it cannot be a reading target.
pub fn score_block(block: &TextBlock, viewport: &Viewport) -> Option<BlockScore> {
    let total_words = block.text.split_whitespace().count();
    if total_words < MIN_WORD_COUNT {
        return None;
    }

    let area = block.bounds.area();
    if area <= 0.0 || viewport.height <= 0.0 {
        return None;
    }

    let visible_area = block.bounds.intersection_area(&viewport.rect());
    if visible_area <= 0.0 {
        return None;
    }

    let mut score = 0.0;
    let mut reasons = Vec::with_capacity(4);

    let visible_fraction = (visible_area / area).min(1.0);
    score += visible_fraction * VISIBLE_WEIGHT;
    reasons.push("visible");

    let chars = block.text.chars().filter(|c| !c.is_whitespace()).count() as f64;
    let density = (chars / area / REFERENCE_DENSITY).min(1.0);
    if density > 0.0 {
        score += density * DENSITY_WEIGHT;
        reasons.push("dense");
    }

    let midpoint = viewport.height / 2.0;
    let offset = (block.bounds.center_y() - midpoint).abs() / midpoint;
    let centering = 1.0 - offset.min(1.0);
    if centering > 0.0 {
        score += centering * CENTER_WEIGHT;
        reasons.push("centered");
    }

    let words = (total_words as f64 / FULL_WORDS).min(1.0);
    score += words * WORDS_WEIGHT;
    reasons.push("words");

    Some(BlockScore {
        score,
        reasons,
        visible_area,
        total_words,
    })
}

/// Highest score first; then larger on-screen area; then earlier in the document.
fn rank(a: &AttentionCandidate, b: &AttentionCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.visible_area.total_cmp(&a.visible_area))
        .then_with(|| a.doc_order.cmp(&b.doc_order))
}

/// Maintains the element table and the ranked candidates of the latest pass.
pub struct CandidateLocator {
    table: ElementTable,
    candidates: Vec<AttentionCandidate>,
}

impl CandidateLocator {
    pub fn new() -> Self {
        CandidateLocator {
            table: ElementTable::new(),
            candidates: Vec::new(),
        }
    }

    /// Re-score every block of a layout pass. Blocks must be in document order.
    pub fn locate(&mut self, viewport: &Viewport, blocks: &[TextBlock]) -> &[AttentionCandidate] {
        let present: HashSet<NodeId> = blocks.iter().map(|b| b.node).collect();
        self.table.retain(|node| present.contains(&node));

        let previous = std::mem::take(&mut self.candidates);
        let mut ranked = Vec::with_capacity(blocks.len());

        for (doc_order, block) in blocks.iter().enumerate() {
            let Some(scored) = score_block(block, viewport) else {
                continue;
            };

            let element = self.table.attach(block.node);
            let carried = previous.iter().find(|c| c.element == element);

            ranked.push(AttentionCandidate {
                element,
                text: block.text.clone(),
                total_words: scored.total_words,
                score: scored.score,
                reasons: scored.reasons,
                bounds: block.bounds,
                visible_area: scored.visible_area,
                doc_order,
                cognitively_attended: carried.is_some_and(|c| c.cognitively_attended),
                sustained_duration: carried.map_or(0, |c| c.sustained_duration),
            });
        }

        ranked.sort_by(rank);
        self.candidates = ranked;
        &self.candidates
    }

    /// A node left the document: drop it and anything that refers to it.
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        if !self.table.detach(node) {
            return false;
        }
        let table = &self.table;
        self.candidates.retain(|c| table.is_attached(c.element));
        true
    }

    /// Shift cached bounds after a scroll so overlays don't render stale rects.
    pub fn scroll_by(&mut self, dx: f64, dy: f64) {
        for candidate in &mut self.candidates {
            candidate.bounds = candidate.bounds.translated(-dx, -dy);
        }
    }

    pub fn top(&self) -> Option<&AttentionCandidate> {
        self.candidates.first()
    }

    pub fn candidates(&self) -> &[AttentionCandidate] {
        &self.candidates
    }

    pub fn candidate_mut(&mut self, element: ElementHandle) -> Option<&mut AttentionCandidate> {
        self.candidates.iter_mut().find(|c| c.element == element)
    }

    pub fn resolve(&self, element: ElementHandle) -> Option<NodeId> {
        self.table.resolve(element)
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.table = ElementTable::new();
    }
}

impl Default for CandidateLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn viewport() -> Viewport {
        Viewport {
            width: 1000.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn block(id: u32, text: String, bounds: Rect) -> TextBlock {
        TextBlock {
            node: NodeId::new(id),
            text,
            bounds,
        }
    }

    #[test]
    fn short_blocks_are_excluded() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![block(1, words(MIN_WORD_COUNT - 1), Rect::new(0.0, 300.0, 600.0, 100.0))];
        assert!(locator.locate(&viewport(), &blocks).is_empty());
    }

    #[test]
    fn offscreen_blocks_are_excluded() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![block(1, words(40), Rect::new(0.0, 2_000.0, 600.0, 100.0))];
        assert!(locator.locate(&viewport(), &blocks).is_empty());
    }

    #[test]
    fn centered_block_beats_edge_block() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![
            block(1, words(40), Rect::new(0.0, 0.0, 600.0, 100.0)),
            block(2, words(40), Rect::new(0.0, 350.0, 600.0, 100.0)),
        ];
        let (len, top, centered) = {
            let ranked = locator.locate(&viewport(), &blocks);
            (ranked.len(), ranked[0].element, ranked[0].reasons.contains(&"centered"))
        };
        assert_eq!(len, 2);
        assert_eq!(locator.resolve(top), Some(NodeId::new(2)));
        assert!(centered);
    }

    #[test]
    fn removed_node_stops_resolving() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![block(1, words(40), Rect::new(0.0, 350.0, 600.0, 100.0))];
        let handle = locator.locate(&viewport(), &blocks)[0].element;

        assert!(locator.remove_node(NodeId::new(1)));
        assert_eq!(locator.resolve(handle), None);
        assert!(locator.top().is_none());
        assert!(!locator.remove_node(NodeId::new(1)));
    }

    #[test]
    fn reused_slot_does_not_revive_old_handle() {
        let mut table = ElementTable::new();
        let old = table.attach(NodeId::new(1));
        table.detach(NodeId::new(1));
        let new = table.attach(NodeId::new(2));

        assert_eq!(table.resolve(old), None);
        assert_eq!(table.resolve(new), Some(NodeId::new(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn nodes_missing_from_pass_are_detached() {
        let mut locator = CandidateLocator::new();
        let first = vec![block(1, words(40), Rect::new(0.0, 350.0, 600.0, 100.0))];
        let handle = locator.locate(&viewport(), &first)[0].element;

        let second = vec![block(2, words(40), Rect::new(0.0, 350.0, 600.0, 100.0))];
        locator.locate(&viewport(), &second);
        assert_eq!(locator.resolve(handle), None);
    }

    #[test]
    fn attended_flag_carries_across_passes() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![block(1, words(40), Rect::new(0.0, 350.0, 600.0, 100.0))];
        let handle = locator.locate(&viewport(), &blocks)[0].element;
        locator.candidate_mut(handle).unwrap().cognitively_attended = true;

        let again = locator.locate(&viewport(), &blocks);
        assert!(again[0].cognitively_attended);
    }

    #[test]
    fn scroll_shifts_bounds() {
        let mut locator = CandidateLocator::new();
        let blocks = vec![block(1, words(40), Rect::new(0.0, 350.0, 600.0, 100.0))];
        locator.locate(&viewport(), &blocks);
        locator.scroll_by(0.0, 50.0);
        assert_eq!(locator.top().unwrap().bounds.top, 300.0);
    }

    #[test]
    fn equal_scores_prefer_larger_visible_area() {
        let a = AttentionCandidate {
            element: ElementHandle {
                index: 0,
                generation: 0,
            },
            text: String::new(),
            total_words: 20,
            score: 50.0,
            reasons: vec![],
            bounds: Rect::default(),
            visible_area: 100.0,
            doc_order: 0,
            cognitively_attended: false,
            sustained_duration: 0,
        };
        let b = AttentionCandidate {
            visible_area: 200.0,
            doc_order: 1,
            ..a.clone()
        };
        assert_eq!(rank(&a, &b), Ordering::Greater);
    }

    proptest! {
        /// Identical blocks score identically; the earliest in the document wins every time.
        #[test]
        fn tie_break_picks_first_in_document_order(
            copies in 2usize..6,
            word_count in MIN_WORD_COUNT..80,
            top in 0.0f64..700.0,
        ) {
            let text = words(word_count);
            let blocks: Vec<TextBlock> = (0..copies)
                .map(|i| block(100 + i as u32, text.clone(), Rect::new(0.0, top, 500.0, 80.0)))
                .collect();

            for _ in 0..3 {
                let mut locator = CandidateLocator::new();
                let (len, first) = {
                    let ranked = locator.locate(&viewport(), &blocks);
                    (ranked.len(), ranked[0].element)
                };
                prop_assert_eq!(len, copies);
                prop_assert_eq!(locator.resolve(first), Some(NodeId::new(100)));
                prop_assert_eq!(locator.top().map(|c| c.doc_order), Some(0));
            }
        }

        #[test]
        fn scores_are_non_negative(
            word_count in MIN_WORD_COUNT..200,
            top in -200.0f64..900.0,
            height in 1.0f64..600.0,
        ) {
            let blocks = vec![block(1, words(word_count), Rect::new(0.0, top, 400.0, height))];
            let mut locator = CandidateLocator::new();
            for candidate in locator.locate(&viewport(), &blocks) {
                prop_assert!(candidate.score >= 0.0);
                prop_assert!(!candidate.reasons.is_empty());
            }
        }
    }
}
