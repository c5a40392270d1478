//! Search-graph vertices and their per-guess edges.
//!
//! Both live in the arena. Identity fields (hash, bitmap, chain link) are
//! written once at creation under the bucket lock; the edge array is published
//! once by `expand` under the node lock. Mutable statistics sit behind each
//! object's own `parking_lot::Mutex`, which is rebuilt after a restore. An
//! edge's class slots are plain atomics written under the edge's lock.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::arena::{Arena, Persistable};
use crate::bitmap::{words_for, StateBitmap};
use crate::handle::RelHandle;

/// Marker for "no action recorded yet".
pub const NO_ACTION: u32 = u32::MAX;

/// Value of a belief-state nobody has refined yet.
///
/// Guessing the candidates one by one in a fixed order needs `(n + 1) / 2`
/// guesses on average, so this is an upper bound on the optimal cost, exact
/// for `n <= 2`.
#[inline]
pub fn initial_value(candidates: usize) -> f64 {
    (candidates as f64 + 1.0) / 2.0
}

/// Lifecycle of a node. Transitions only move forward.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeStatus {
    /// Created while stepping from a parent, never expanded
    #[default]
    None = 0,
    /// Edges allocated, value under refinement
    Init = 1,
    /// Value is final
    Solved = 2,
}

/// Fields guarded by the node lock.
#[derive(Clone, Copy, Debug)]
pub struct NodeStats {
    /// Best known expected number of guesses from this state
    pub v: f64,
    /// Edge index achieving `v` (NO_ACTION if none)
    pub best_action: u32,
    /// Guess index achieving `v` (set by DP and by edge updates)
    pub best_guess: u32,
    pub status: NodeStatus,
}

/// Search-graph vertex for one belief-state.
#[repr(C)]
pub struct StateNode {
    hash: u64,
    candidates: u32,
    num_words: u32,
    bits: RelHandle<u64>,
    pub(crate) next: RelHandle<StateNode>,
    pub(crate) edges: RelHandle<ActionEdge>,
    pub(crate) num_edges: AtomicU32,
    pub(crate) stats: Mutex<NodeStats>,
}

unsafe impl Persistable for StateNode {}

impl StateNode {
    /// A fresh node; `bits` and `next` are linked once it is in the arena.
    pub(crate) fn new(hash: u64, candidates: usize, num_words: usize) -> Self {
        Self {
            hash,
            candidates: candidates as u32,
            num_words: num_words as u32,
            bits: RelHandle::null(),
            next: RelHandle::null(),
            edges: RelHandle::null(),
            num_edges: AtomicU32::new(0),
            stats: Mutex::new(NodeStats {
                v: initial_value(candidates),
                best_action: NO_ACTION,
                best_guess: NO_ACTION,
                status: NodeStatus::None,
            }),
        }
    }

    pub(crate) fn link_bits(&self, words: &[u64]) {
        debug_assert_eq!(words.len(), self.num_words as usize);
        self.bits.set(words.first());
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Number of secrets still possible.
    #[inline]
    pub fn candidate_count(&self) -> usize {
        self.candidates as usize
    }

    /// The node's bitmap words as stored in the arena.
    pub fn bitmap_words(&self) -> &[u64] {
        // SAFETY: `bits` was linked at creation to an arena copy of exactly
        // `num_words` words.
        unsafe { self.bits.slice(self.num_words as usize) }.unwrap_or(&[])
    }

    /// Owned copy of the belief-state.
    pub fn bitmap(&self, num_answers: usize) -> StateBitmap {
        StateBitmap::from_words(self.bitmap_words(), num_answers)
    }

    pub fn next_in_bucket(&self) -> Option<&StateNode> {
        self.next.get()
    }

    /// Edges published by `expand`; empty before that.
    pub fn edges(&self) -> &[ActionEdge] {
        let len = self.num_edges.load(Ordering::Acquire) as usize;
        if len == 0 {
            return &[];
        }
        // SAFETY: `num_edges` is stored (Release) only after `edges` points
        // at a fully written arena array of that length.
        unsafe { self.edges.slice(len) }.unwrap_or(&[])
    }

    pub(crate) fn publish_edges(&self, edges: &[ActionEdge]) {
        self.edges.set(edges.first());
        self.num_edges.store(edges.len() as u32, Ordering::Release);
    }

    /// Lock the node's statistics.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, NodeStats> {
        self.stats.lock()
    }

    /// Snapshot of the node's statistics.
    #[inline]
    pub fn stats(&self) -> NodeStats {
        *self.stats.lock()
    }

    #[inline]
    pub fn status(&self) -> NodeStatus {
        self.stats.lock().status
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.stats.lock().v
    }

    pub fn is_solved(&self) -> bool {
        self.status() == NodeStatus::Solved
    }
}

/// Restore-time checks. Everything here reads raw bytes through the arena;
/// no reference to a node or edge is formed until the whole image passed.
impl StateNode {
    /// Byte offset of the status discriminant inside a node.
    pub(crate) fn status_offset() -> usize {
        let template = StateNode::new(0, 0, 0);
        let start = &template as *const StateNode as usize;
        template.stats.data_ptr() as usize - start + std::mem::offset_of!(NodeStats, status)
    }

    /// Check the node stored at byte `at`, its bitmap and its edges.
    ///
    /// Returns the offset of the next node in the chain.
    pub(crate) fn check_image(
        arena: &Arena,
        at: usize,
        num_answers: usize,
        num_guesses: usize,
    ) -> std::result::Result<Option<usize>, String> {
        use std::mem::offset_of;

        if !arena.holds::<StateNode>(at, 1) {
            return Err(format!("node at byte {at} is misaligned or truncated"));
        }
        let read_u32 = |offset: usize| arena.read_at::<u32>(at + offset).unwrap_or(u32::MAX);

        let num_words = read_u32(offset_of!(StateNode, num_words)) as usize;
        if num_words != words_for(num_answers) {
            return Err(format!("node at byte {at} has {num_words} bitmap words"));
        }
        let candidates = read_u32(offset_of!(StateNode, candidates));
        let bits = RelHandle::<u64>::target_in(arena, at + offset_of!(StateNode, bits), num_words)?
            .ok_or_else(|| format!("node at byte {at} has no bitmap"))?;
        let members: u32 = (0..num_words)
            .filter_map(|i| arena.read_at::<u64>(bits + 8 * i))
            .map(u64::count_ones)
            .sum();
        if members != candidates {
            return Err(format!(
                "node at byte {at} claims {candidates} candidates, bitmap holds {members}"
            ));
        }

        let status = arena.read_at::<u8>(at + Self::status_offset()).unwrap_or(u8::MAX);
        if status > NodeStatus::Solved as u8 {
            return Err(format!("node at byte {at} has status byte {status}"));
        }

        let num_edges = read_u32(offset_of!(StateNode, num_edges)) as usize;
        if num_edges > 0 {
            let edges = RelHandle::<ActionEdge>::target_in(
                arena,
                at + offset_of!(StateNode, edges),
                num_edges,
            )?
            .ok_or_else(|| format!("node at byte {at} lists {num_edges} edges but has none"))?;
            for i in 0..num_edges {
                let edge = edges + i * std::mem::size_of::<ActionEdge>();
                ActionEdge::check_image(arena, edge, candidates, num_guesses)?;
            }
        }

        RelHandle::<StateNode>::target_in(arena, at + offset_of!(StateNode, next), 1)
    }
}

impl std::fmt::Debug for StateNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateNode")
            .field("hash", &format_args!("{:#018x}", self.hash))
            .field("candidates", &self.candidates)
            .field("edges", &self.num_edges.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}

/// Fields guarded by the edge lock.
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeStats {
    /// Cached cost estimate, `1 + sum_value`
    pub q: f64,
    /// Size-weighted sum of the class values held in the edge's slots
    pub sum_value: f64,
    pub visit_count: u32,
    /// Feedback classes whose value is final, winning class included
    pub solved_children: u32,
}

/// One non-winning feedback class of an edge.
///
/// Slots are written only while the owning edge's lock is held.
#[repr(C)]
pub struct ClassSlot {
    /// Candidates in the class
    size: u32,
    /// Nonzero once the class's node is known to be solved
    solved: AtomicU32,
    /// Lowest child value folded into the edge so far (f64 bits)
    value: AtomicU64,
}

unsafe impl Persistable for ClassSlot {}

impl ClassSlot {
    pub(crate) fn seeded(size: u32) -> Self {
        Self {
            size,
            solved: AtomicU32::new(0),
            value: AtomicU64::new(initial_value(size as usize).to_bits()),
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_solved(&self) -> bool {
        self.solved.load(Ordering::Relaxed) != 0
    }
}

impl std::fmt::Debug for ClassSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassSlot")
            .field("size", &self.size)
            .field("value", &self.value())
            .field("solved", &self.is_solved())
            .finish()
    }
}

/// Statistics for one guess at a node.
#[repr(C)]
pub struct ActionEdge {
    guess: u32,
    total_children: u32,
    /// Candidates of the owning node
    parent_size: u32,
    num_classes: u32,
    classes: RelHandle<ClassSlot>,
    pub(crate) stats: Mutex<EdgeStats>,
}

unsafe impl Persistable for ActionEdge {}

impl ActionEdge {
    /// An edge over `parent_size` candidates whose classes start at their
    /// seed values. Slots are linked once the edge is in the arena.
    pub(crate) fn seeded(guess: u32, parent_size: u32, class_sizes: &[u32], wins: bool) -> Self {
        let inv_n = 1.0 / f64::from(parent_size.max(1));
        let sum_value: f64 = class_sizes
            .iter()
            .map(|&m| f64::from(m) * inv_n * initial_value(m as usize))
            .sum();
        Self {
            guess,
            total_children: class_sizes.len() as u32 + u32::from(wins),
            parent_size,
            num_classes: class_sizes.len() as u32,
            classes: RelHandle::null(),
            stats: Mutex::new(EdgeStats {
                q: 1.0 + sum_value,
                sum_value,
                visit_count: 0,
                solved_children: u32::from(wins),
            }),
        }
    }

    pub(crate) fn link_classes(&self, slots: &[ClassSlot]) {
        debug_assert_eq!(slots.len(), self.num_classes as usize);
        self.classes.set(slots.first());
    }

    #[inline]
    pub fn guess(&self) -> u32 {
        self.guess
    }

    /// Distinct feedback classes reachable through this guess.
    #[inline]
    pub fn total_children(&self) -> u32 {
        self.total_children
    }

    /// Whether one class is the guess being the secret.
    #[inline]
    pub fn wins(&self) -> bool {
        self.total_children > self.num_classes
    }

    /// Non-winning classes in first-occurrence order.
    pub fn classes(&self) -> &[ClassSlot] {
        if self.num_classes == 0 {
            return &[];
        }
        // SAFETY: linked before the edge was published to an arena array of
        // exactly `num_classes` slots.
        unsafe { self.classes.slice(self.num_classes as usize) }.unwrap_or(&[])
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, EdgeStats> {
        self.stats.lock()
    }

    #[inline]
    pub fn stats(&self) -> EdgeStats {
        *self.stats.lock()
    }

    pub fn is_solved(&self) -> bool {
        self.stats().is_solved(self.total_children)
    }

    #[inline]
    fn weight(&self, slot: &ClassSlot) -> f64 {
        f64::from(slot.size) / f64::from(self.parent_size.max(1))
    }

    /// Fold a child value into class `class`.
    ///
    /// A slot only ever moves down and only flips to solved once, so
    /// reporting the same observation twice changes nothing. `stats` must
    /// be this edge's own guard.
    pub(crate) fn observe(&self, stats: &mut EdgeStats, class: usize, value: f64, solved: bool) {
        stats.visit_count = stats.visit_count.saturating_add(1);
        let Some(slot) = self.classes().get(class) else {
            return;
        };
        let old = slot.value();
        if value < old {
            stats.sum_value += self.weight(slot) * (value - old);
            slot.value.store(value.to_bits(), Ordering::Relaxed);
        }
        if solved && !slot.is_solved() {
            slot.solved.store(1, Ordering::Relaxed);
            stats.solved_children += 1;
            if stats.is_solved(self.total_children) {
                stats.sum_value = self.classes().iter().map(|s| self.weight(s) * s.value()).sum();
            }
        }
        stats.q = 1.0 + stats.sum_value;
    }

    /// Count a visit that ended in the winning class.
    pub(crate) fn observe_win(stats: &mut EdgeStats) {
        stats.visit_count = stats.visit_count.saturating_add(1);
    }
}

impl ActionEdge {
    /// Check the edge stored at byte `at` (already known to be in bounds)
    /// and its class slots.
    fn check_image(
        arena: &Arena,
        at: usize,
        parent_size: u32,
        num_guesses: usize,
    ) -> std::result::Result<(), String> {
        use std::mem::offset_of;

        let read_u32 = |offset: usize| arena.read_at::<u32>(at + offset).unwrap_or(u32::MAX);
        let guess = read_u32(offset_of!(ActionEdge, guess)) as usize;
        let total = read_u32(offset_of!(ActionEdge, total_children));
        let num_classes = read_u32(offset_of!(ActionEdge, num_classes));
        if guess >= num_guesses
            || read_u32(offset_of!(ActionEdge, parent_size)) != parent_size
            || total == 0
            || total < num_classes
            || total > num_classes.saturating_add(1)
        {
            return Err(format!("edge at byte {at} is inconsistent with its node"));
        }
        if num_classes == 0 {
            return Ok(());
        }
        let slots = RelHandle::<ClassSlot>::target_in(
            arena,
            at + offset_of!(ActionEdge, classes),
            num_classes as usize,
        )?
        .ok_or_else(|| format!("edge at byte {at} has no class slots"))?;
        let sized: u64 = (0..num_classes as usize)
            .filter_map(|i| {
                arena.read_at::<u32>(
                    slots + i * std::mem::size_of::<ClassSlot>() + offset_of!(ClassSlot, size),
                )
            })
            .map(u64::from)
            .sum();
        if sized > u64::from(parent_size) {
            return Err(format!("edge at byte {at} has classes larger than its node"));
        }
        Ok(())
    }
}

impl EdgeStats {
    #[inline]
    pub fn is_solved(&self, total_children: u32) -> bool {
        total_children > 0 && self.solved_children == total_children
    }
}

impl std::fmt::Debug for ActionEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEdge")
            .field("guess", &self.guess)
            .field("total_children", &self.total_children)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn test_node_creation() {
        let node = StateNode::new(0xfeed, 9, 1);
        let stats = node.stats();
        assert_eq!(stats.status, NodeStatus::None);
        assert_eq!(stats.v, 5.0);
        assert_eq!(stats.best_action, NO_ACTION);
        assert!(node.edges().is_empty());
        assert!(node.next_in_bucket().is_none());
    }

    #[test]
    fn test_initial_value() {
        assert_eq!(initial_value(1), 1.0);
        assert_eq!(initial_value(2), 1.5);
        assert_eq!(initial_value(5), 3.0);
    }

    #[test]
    fn test_bits_in_arena() {
        let arena = Arena::with_capacity(4096).unwrap();
        let words = arena.allocate_copy(&[0b1011u64]).unwrap();
        let node = arena.allocate(StateNode::new(1, 3, 1)).unwrap();
        node.link_bits(words);
        assert_eq!(node.bitmap_words(), &[0b1011]);
        assert_eq!(node.bitmap(4).iter_ones().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    /// An arena edge over `parent_size` candidates with linked slots.
    fn edge_in<'a>(arena: &'a Arena, parent_size: u32, sizes: &[u32], wins: bool) -> &'a ActionEdge {
        let edge = arena
            .allocate(ActionEdge::seeded(7, parent_size, sizes, wins))
            .unwrap();
        let slots = arena
            .allocate_iter(sizes.iter().map(|&m| ClassSlot::seeded(m)))
            .unwrap();
        edge.link_classes(slots);
        edge
    }

    #[test]
    fn test_edge_seeding_is_size_weighted() {
        let arena = Arena::with_capacity(4096).unwrap();
        // One winner, a pair and a singleton out of four candidates.
        let edge = edge_in(&arena, 4, &[2, 1], true);
        let stats = edge.stats();
        assert_eq!(edge.total_children(), 3);
        assert!(edge.wins());
        assert_eq!(stats.solved_children, 1);
        // 2/4 * 1.5 + 1/4 * 1.0
        assert!((stats.sum_value - 1.0).abs() < 1e-12);
        assert!((stats.q - 2.0).abs() < 1e-12);
        assert_eq!(edge.classes().len(), 2);
        assert_eq!(edge.classes()[0].size(), 2);
        assert!(!edge.is_solved());
    }

    #[test]
    fn test_observe_lowers_and_ignores_repeats() {
        let arena = Arena::with_capacity(4096).unwrap();
        let edge = edge_in(&arena, 4, &[2, 1], true);
        {
            let mut stats = edge.lock();
            edge.observe(&mut stats, 0, 1.25, false);
        }
        let once = edge.stats();
        assert!((once.sum_value - 0.875).abs() < 1e-12);
        assert_eq!(once.visit_count, 1);

        // The same or a worse value leaves the estimate alone.
        {
            let mut stats = edge.lock();
            edge.observe(&mut stats, 0, 1.25, false);
            edge.observe(&mut stats, 0, 1.4, false);
        }
        let again = edge.stats();
        assert_eq!(again.sum_value, once.sum_value);
        assert_eq!(again.visit_count, 3);
        assert_eq!(edge.classes()[0].value(), 1.25);
    }

    #[test]
    fn test_solved_classes_count_once() {
        let arena = Arena::with_capacity(4096).unwrap();
        let edge = edge_in(&arena, 4, &[2, 1], true);
        {
            let mut stats = edge.lock();
            for _ in 0..3 {
                edge.observe(&mut stats, 1, 1.0, true);
            }
        }
        assert_eq!(edge.stats().solved_children, 2);
        assert!(!edge.is_solved());

        {
            let mut stats = edge.lock();
            edge.observe(&mut stats, 0, 1.5, true);
            ActionEdge::observe_win(&mut stats);
        }
        let stats = edge.stats();
        assert!(edge.is_solved());
        assert_eq!(stats.solved_children, 3);
        assert_eq!(stats.visit_count, 5);
        // 1 + 2/4 * 1.5 + 1/4 * 1.0
        assert!((stats.q - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_solved() {
        let arena = Arena::with_capacity(4096).unwrap();
        // A guess that wins on one of two candidates and isolates the other.
        let edge = edge_in(&arena, 2, &[1], true);
        assert!(!edge.is_solved());
        {
            let mut stats = edge.lock();
            edge.observe(&mut stats, 0, 1.0, true);
        }
        assert!(edge.is_solved());
        assert!((edge.stats().q - 1.5).abs() < 1e-12);

        let stats = EdgeStats::default();
        assert!(!stats.is_solved(0));
    }

    #[test]
    fn test_publish_edges() {
        let arena = Arena::with_capacity(4096).unwrap();
        let node = arena.allocate(StateNode::new(1, 4, 1)).unwrap();
        let edges = arena
            .allocate_iter((0..3).map(|g| ActionEdge::seeded(g, 4, &[2, 2], false)))
            .unwrap();
        node.publish_edges(edges);
        assert_eq!(node.edges().len(), 3);
        assert_eq!(node.edges()[2].guess(), 2);
        assert!(node.edges()[0].classes().is_empty());
    }

    #[test]
    fn test_status_offset_points_at_status() {
        let arena = Arena::with_capacity(4096).unwrap();
        let node = arena.allocate(StateNode::new(1, 4, 1)).unwrap();
        node.lock().status = NodeStatus::Solved;
        let at = node as *const StateNode as usize - arena.base_address();
        assert_eq!(
            arena.read_at::<u8>(at + StateNode::status_offset()),
            Some(NodeStatus::Solved as u8)
        );
    }
}
