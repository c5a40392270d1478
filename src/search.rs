//! Episode engine: expansion, selection and backup.
//!
//! An episode walks from the root, sampling a guess by softmin over edge costs
//! and a secret uniformly among the remaining candidates, until it reaches a
//! solved node, a state small enough for exact DP, a node whose edges are all
//! solved, or a winning guess. The observed value then flows back up the
//! trajectory, stopping at the first node it fails to improve.

use rand::Rng;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::bitmap::{ActionSet, StateBitmap};
use crate::context::SearchContext;
use crate::dp;
use crate::error::Result;
use crate::game::{PatternCode, PatternSource};
use crate::math::{cost_weights, sample_weighted};
use crate::node::{ActionEdge, ClassSlot, NodeStatus, StateNode};

/// Typical episode length (for stack allocation)
const INLINE_DEPTH: usize = 16;

/// Signature label reserved for the winning class.
///
/// Pattern codes are bytes and one of them is the solved pattern, so at most
/// 255 non-winning classes exist and their labels stay below this value.
pub const WIN_LABEL: u8 = u8::MAX;

const _: () = assert!(std::mem::size_of::<PatternCode>() == 1);

/// One step taken during an episode.
#[derive(Clone, Copy, Debug)]
pub struct Step<'a> {
    pub node: &'a StateNode,
    /// Index into `node.edges()`
    pub edge: usize,
    /// Class of the sampled secret under the edge's guess; `None` when the
    /// guess was the secret
    pub class: Option<usize>,
}

/// Steps from root to leaf.
pub type Trajectory<'a> = SmallVec<[Step<'a>; INLINE_DEPTH]>;

/// Why an episode stopped descending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// Reached a node whose value is already final
    Solved,
    /// Candidate count at or below the DP threshold; solved exactly
    Cutover,
    /// Every edge of the node was solved, so the node settled
    Exhausted,
    /// The sampled guess was the secret
    Won,
}

/// Summary of one episode.
#[derive(Clone, Copy, Debug)]
pub struct EpisodeOutcome {
    /// Guesses sampled before stopping
    pub depth: usize,
    pub terminal: Terminal,
    /// Value propagated from the leaf
    pub value: f64,
    /// Whether this episode moved the leaf to `Solved`
    pub newly_solved: bool,
}

/// How one guess splits a set of candidates.
#[derive(Clone, Debug)]
pub struct Partition {
    pub guess: u32,
    /// Class label per candidate in ascending candidate order. Labels are
    /// assigned in first-occurrence order; the winning class is `WIN_LABEL`.
    signature: Vec<u8>,
    /// Sizes of the non-winning classes, indexed by label
    class_sizes: SmallVec<[u32; 16]>,
    /// Candidates the guess wins outright
    win_size: u32,
}

impl Partition {
    /// Distinct feedback classes, winning class included.
    pub fn num_classes(&self) -> u32 {
        self.class_sizes.len() as u32 + u32::from(self.wins())
    }

    pub fn wins(&self) -> bool {
        self.win_size > 0
    }

    pub fn class_sizes(&self) -> &[u32] {
        &self.class_sizes
    }

    /// One class that is the whole parent set, and not a win.
    pub fn is_useless(&self) -> bool {
        !self.wins() && self.class_sizes.len() == 1
    }

    /// Candidates split by this partition.
    pub fn parent_size(&self) -> u32 {
        self.signature.len() as u32
    }

    fn to_edge(&self) -> ActionEdge {
        ActionEdge::seeded(self.guess, self.parent_size(), &self.class_sizes, self.wins())
    }

    /// Bitmaps of the non-winning classes, in label order.
    pub fn classes(&self, secrets: &[usize], num_answers: usize) -> Vec<StateBitmap> {
        let mut classes = vec![StateBitmap::empty(num_answers); self.class_sizes.len()];
        for (&secret, &label) in secrets.iter().zip(&self.signature) {
            if label != WIN_LABEL {
                classes[label as usize].insert(secret);
            }
        }
        classes
    }
}

/// Distinct informative partitions plus what was pruned to get them.
#[derive(Clone, Debug, Default)]
pub struct Partitions {
    /// First guess for each distinct partition, in guess order
    pub kept: Vec<Partition>,
    /// Guesses whose partition duplicated a kept one
    pub redundant: usize,
    /// Guesses that split nothing
    pub useless: usize,
}

impl Partitions {
    /// Guess indices of the kept partitions.
    pub fn guesses(&self) -> Vec<u32> {
        self.kept.iter().map(|p| p.guess).collect()
    }
}

/// Guess set made of the guesses behind `edges`.
pub fn candidates_from_edges(edges: &[ActionEdge], num_guesses: usize) -> ActionSet {
    ActionSet::from_indices(num_guesses, edges.iter().map(|e| e.guess() as usize))
}

/// Runs episodes against one shared context.
pub struct Engine<'a, P: PatternSource> {
    ctx: &'a SearchContext<P>,
}

impl<'a, P: PatternSource> Engine<'a, P> {
    pub fn new(ctx: &'a SearchContext<P>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &'a SearchContext<P> {
        self.ctx
    }

    /// Split `secrets` by the feedback of `guess`.
    pub fn partition_of(&self, secrets: &[usize], guess: usize) -> Partition {
        let patterns = self.ctx.patterns();
        let solved: PatternCode = patterns.solved_pattern();
        // Pattern code -> label + 1 (0 = unseen)
        let mut slots = [0u16; 256];
        let mut signature = Vec::with_capacity(secrets.len());
        let mut class_sizes: SmallVec<[u32; 16]> = SmallVec::new();
        let mut win_size = 0;

        for &secret in secrets {
            let pattern = patterns.pattern_of(guess, secret);
            if pattern == solved {
                win_size += 1;
                signature.push(WIN_LABEL);
                continue;
            }
            let slot = &mut slots[pattern as usize];
            if *slot == 0 {
                class_sizes.push(0);
                *slot = class_sizes.len() as u16;
            }
            let label = (*slot - 1) as usize;
            debug_assert!(label < WIN_LABEL as usize);
            class_sizes[label] += 1;
            signature.push(label as u8);
        }

        Partition {
            guess: guess as u32,
            signature,
            class_sizes,
            win_size,
        }
    }

    /// Partitions of `state` under each candidate guess, pruned of useless
    /// and redundant guesses.
    pub fn distinct_partitions(
        &self,
        state: &StateBitmap,
        candidates: &ActionSet,
        parallel: bool,
    ) -> Partitions {
        let secrets: Vec<usize> = state.iter_ones().collect();
        let guesses: Vec<usize> = candidates.iter_ones().collect();
        let all: Vec<Partition> = if parallel {
            guesses
                .par_iter()
                .map(|&g| self.partition_of(&secrets, g))
                .collect()
        } else {
            guesses
                .iter()
                .map(|&g| self.partition_of(&secrets, g))
                .collect()
        };

        let mut useless = 0;
        let keep: Vec<bool> = {
            let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
            all.iter()
                .map(|p| {
                    if p.is_useless() {
                        useless += 1;
                        false
                    } else {
                        seen.insert(p.signature.as_slice())
                    }
                })
                .collect()
        };
        let kept: Vec<Partition> = all
            .into_iter()
            .zip(keep)
            .filter_map(|(p, keep)| keep.then_some(p))
            .collect();
        let redundant = guesses.len() - useless - kept.len();

        Partitions {
            kept,
            redundant,
            useless,
        }
    }

    /// Like `distinct_partitions`, but falls back to every guess when the
    /// inherited candidates cannot split `state` at all.
    pub(crate) fn informative_partitions(
        &self,
        state: &StateBitmap,
        candidates: &ActionSet,
        parallel: bool,
    ) -> Partitions {
        let partitions = self.distinct_partitions(state, candidates, parallel);
        let num_guesses = self.ctx.patterns().num_guesses();
        if partitions.kept.is_empty() && candidates.count() < num_guesses {
            log::debug!(
                "no inherited guess splits a {}-candidate state, retrying with all guesses",
                state.count()
            );
            return self.distinct_partitions(state, &ActionSet::full(num_guesses), parallel);
        }
        partitions
    }

    /// Allocate `node`'s edges if nobody has yet.
    ///
    /// Partitions are computed before taking the node lock; the lock only
    /// covers the status re-check and publication. Returns whether this call
    /// did the expansion.
    pub fn expand(&self, node: &StateNode, candidates: &ActionSet) -> Result<bool> {
        if node.status() != NodeStatus::None {
            return Ok(false);
        }
        let state = node.bitmap(self.ctx.patterns().num_answers());
        let partitions = self.informative_partitions(&state, candidates, true);

        let mut stats = node.lock();
        if stats.status != NodeStatus::None {
            return Ok(false);
        }
        let arena = self.ctx.arena();
        let edges = arena.allocate_iter(partitions.kept.iter().map(Partition::to_edge))?;
        for (edge, partition) in edges.iter().zip(&partitions.kept) {
            let slots = arena.allocate_iter(
                partition.class_sizes().iter().map(|&m| ClassSlot::seeded(m)),
            )?;
            edge.link_classes(slots);
        }
        node.publish_edges(edges);
        stats.status = NodeStatus::Init;
        drop(stats);

        if edges.is_empty() {
            log::warn!(
                "state with {} candidates has no informative guess",
                node.candidate_count()
            );
        }
        log::debug!(
            "expanded {}-candidate state: {} edges, {} redundant, {} useless",
            node.candidate_count(),
            edges.len(),
            partitions.redundant,
            partitions.useless
        );
        Ok(true)
    }

    /// Pick an unsolved edge by softmin over `q`.
    ///
    /// Returns `None` when every edge is solved.
    pub fn select_action<R: Rng + ?Sized>(&self, node: &StateNode, rng: &mut R) -> Option<usize> {
        let edges = node.edges();
        let mut open: SmallVec<[usize; 64]> = SmallVec::new();
        let mut costs: SmallVec<[f64; 64]> = SmallVec::new();
        for (i, edge) in edges.iter().enumerate() {
            let stats = edge.stats();
            if !stats.is_solved(edge.total_children()) {
                open.push(i);
                costs.push(stats.q);
            }
        }
        if open.is_empty() {
            return None;
        }
        let weights = cost_weights(&costs, self.ctx.config().temperature);
        let pick = sample_weighted(&weights, rng.gen::<f64>());
        Some(open[pick])
    }

    /// Label of the class `secret` lands in when `guess` splits `state`, as
    /// `partition_of` numbers them.
    pub fn class_of(&self, state: &StateBitmap, guess: usize, secret: usize) -> usize {
        let patterns = self.ctx.patterns();
        let solved = patterns.solved_pattern();
        let target = patterns.pattern_of(guess, secret);
        let mut seen = [false; 256];
        let mut label = 0;
        for candidate in state.iter_ones() {
            let pattern = patterns.pattern_of(guess, candidate);
            if pattern == target {
                break;
            }
            if pattern != solved && !std::mem::replace(&mut seen[pattern as usize], true) {
                label += 1;
            }
        }
        label
    }

    /// Mark a node whose edges are all solved as solved itself.
    ///
    /// Returns the settled value and whether this call flipped the status.
    pub fn settle(&self, node: &StateNode) -> (f64, bool) {
        let best = node
            .edges()
            .iter()
            .enumerate()
            .map(|(i, edge)| (i, edge.guess(), edge.stats().q))
            .min_by(|a, b| a.2.total_cmp(&b.2));

        let mut stats = node.lock();
        if stats.status == NodeStatus::Solved {
            return (stats.v, false);
        }
        if let Some((index, guess, q)) = best {
            if q < stats.v {
                stats.v = q;
                stats.best_action = index as u32;
                stats.best_guess = guess;
            }
        }
        stats.status = NodeStatus::Solved;
        (stats.v, true)
    }

    /// Run one episode from the root and back its value up.
    pub fn run_episode<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<EpisodeOutcome> {
        let patterns = self.ctx.patterns();
        let dp_threshold = self.ctx.config().dp_threshold;

        let mut node = self.ctx.root()?;
        let mut state = node.bitmap(patterns.num_answers());
        let mut parent_edges: Option<&[ActionEdge]> = None;
        let mut trajectory = Trajectory::new();

        let (terminal, value, newly_solved) = loop {
            if node.is_solved() {
                break (Terminal::Solved, node.value(), false);
            }

            let candidates = match parent_edges {
                Some(edges) => candidates_from_edges(edges, patterns.num_guesses()),
                None => ActionSet::full(patterns.num_guesses()),
            };

            if node.candidate_count() <= dp_threshold {
                let outcome = dp::dp_evaluate(self, node, &candidates)?;
                break (Terminal::Cutover, outcome.value, outcome.newly_solved);
            }

            if node.status() == NodeStatus::None {
                self.expand(node, &candidates)?;
            }

            let Some(index) = self.select_action(node, rng) else {
                let (value, newly) = self.settle(node);
                break (Terminal::Exhausted, value, newly);
            };
            let edge = &node.edges()[index];
            let guess = edge.guess() as usize;

            let pick = rng.gen_range(0..node.candidate_count());
            let Some(secret) = state.nth_one(pick) else {
                break (Terminal::Solved, node.value(), false);
            };

            if patterns.pattern_of(guess, secret) == patterns.solved_pattern() {
                trajectory.push(Step {
                    node,
                    edge: index,
                    class: None,
                });
                break (Terminal::Won, 0.0, false);
            }

            let class = self.class_of(&state, guess, secret);
            let next = patterns.narrow(&state, guess, secret);
            let child = self.ctx.get_or_create(&next)?;
            trajectory.push(Step {
                node,
                edge: index,
                class: Some(class),
            });
            parent_edges = Some(node.edges());
            node = child;
            state = next;
        };

        let leaf_solved = terminal != Terminal::Won && node.is_solved();
        self.propagate_update(&trajectory, value, leaf_solved);

        Ok(EpisodeOutcome {
            depth: trajectory.len(),
            terminal,
            value,
            newly_solved,
        })
    }

    /// Back `final_value` up the trajectory, leaf first.
    ///
    /// Each edge folds the child's new value into the sampled class; a class
    /// whose node is solved is counted once however many episodes report it.
    /// The owning node adopts the edge's new `q` only if it improves `v`. The
    /// first node that does not improve ends the walk.
    pub fn propagate_update(&self, trajectory: &[Step<'_>], final_value: f64, leaf_solved: bool) {
        let mut running = final_value;
        let mut child_solved = leaf_solved;

        for step in trajectory.iter().rev() {
            let edge = &step.node.edges()[step.edge];
            let q = {
                let mut stats = edge.lock();
                match step.class {
                    Some(class) => edge.observe(&mut stats, class, running, child_solved),
                    None => ActionEdge::observe_win(&mut stats),
                }
                stats.q
            };
            child_solved = false;

            let mut stats = step.node.lock();
            if stats.status != NodeStatus::Solved && q < stats.v {
                stats.v = q;
                stats.best_action = step.edge as u32;
                stats.best_guess = edge.guess();
                running = q;
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::game::PatternTable;
    use crate::node::initial_value;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Four answers, five guesses.
    /// guess 0..=3 win on their own index and split the rest by parity;
    /// guess 4 splits nothing.
    fn toy_table() -> PatternTable {
        let mut codes = Vec::new();
        for g in 0..5 {
            for s in 0..4 {
                let code = if g == s {
                    9
                } else if g == 4 {
                    0
                } else {
                    (s % 2) as u8
                };
                codes.push(code);
            }
        }
        PatternTable::from_codes(5, 4, codes, 9).unwrap()
    }

    fn config(dp_threshold: usize) -> SolverConfig {
        SolverConfig {
            dp_threshold,
            arena_megabytes: 1,
            table_size_exp: 8,
            lock_count_exp: 4,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn test_partition_labels() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let secrets = vec![0, 1, 2, 3];

        let p = engine.partition_of(&secrets, 1);
        assert!(p.wins());
        assert_eq!(p.signature, vec![0, WIN_LABEL, 0, 1]);
        assert_eq!(p.class_sizes(), &[2, 1]);
        assert_eq!(p.num_classes(), 3);
        assert_eq!(p.parent_size(), 4);
        // Seeds weighted by class size: 2/4 * 1.5 + 1/4 * 1.0 + 1/4 * 0.
        let edge = p.to_edge();
        assert!((edge.stats().q - 2.0).abs() < 1e-12);
        assert_eq!(edge.total_children(), 3);

        let useless = engine.partition_of(&secrets, 4);
        assert!(useless.is_useless());
    }

    #[test]
    fn test_distinct_partitions_prunes() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let state = StateBitmap::full(4);
        let partitions = engine.distinct_partitions(&state, &ActionSet::full(5), false);
        assert_eq!(partitions.guesses(), vec![0, 1, 2, 3]);
        assert_eq!(partitions.useless, 1);
        assert_eq!(partitions.redundant, 0);

        // On {1, 3} guesses 0 and 2 both lump everything into class 1.
        let odd = StateBitmap::from_indices(4, [1, 3]);
        let partitions = engine.distinct_partitions(&odd, &ActionSet::full(5), false);
        assert_eq!(partitions.guesses(), vec![1, 3]);
        assert_eq!(partitions.useless, 3);
    }

    #[test]
    fn test_redundant_guesses_share_one_edge() {
        // Guesses 0 and 1 produce the same split under different codes.
        let codes = vec![
            0, 0, 1, 1, // guess 0
            4, 4, 3, 3, // guess 1
            9, 0, 0, 0, // guess 2 wins on 0
        ];
        let table = PatternTable::from_codes(3, 4, codes, 9).unwrap();
        let ctx = SearchContext::new(config(1), table).unwrap();
        let engine = Engine::new(&ctx);
        let partitions =
            engine.distinct_partitions(&StateBitmap::full(4), &ActionSet::full(3), true);
        assert_eq!(partitions.guesses(), vec![0, 2]);
        assert_eq!(partitions.redundant, 1);
    }

    #[test]
    fn test_expand_is_idempotent() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();

        assert!(engine.expand(root, &ActionSet::full(5)).unwrap());
        let used = ctx.arena().used();
        assert_eq!(root.edges().len(), 4);
        assert_eq!(root.status(), NodeStatus::Init);

        assert!(!engine.expand(root, &ActionSet::full(5)).unwrap());
        assert_eq!(ctx.arena().used(), used);
        assert_eq!(root.edges().len(), 4);

        let edge = &root.edges()[0];
        assert_eq!(edge.total_children(), 3);
        assert_eq!(edge.stats().solved_children, 1);
    }

    #[test]
    fn test_greedy_selection() {
        let ctx = SearchContext::new(
            SolverConfig {
                temperature: 0.0,
                ..config(1)
            },
            toy_table(),
        )
        .unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();
        engine.expand(root, &ActionSet::full(5)).unwrap();
        {
            let mut stats = root.edges()[2].lock();
            stats.q = 0.5;
        }
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            assert_eq!(engine.select_action(root, &mut rng), Some(2));
        }
    }

    #[test]
    fn test_settle_takes_min_q() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();
        engine.expand(root, &ActionSet::full(5)).unwrap();
        for (i, edge) in root.edges().iter().enumerate() {
            let mut stats = edge.lock();
            stats.solved_children = edge.total_children();
            stats.q = 2.0 - 0.1 * i as f64;
        }
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(engine.select_action(root, &mut rng), None);

        let (value, newly) = engine.settle(root);
        assert!(newly);
        assert!((value - 1.7).abs() < 1e-12);
        assert_eq!(root.stats().best_guess, 3);
        assert!(!engine.settle(root).1);
    }

    #[test]
    fn test_class_of_matches_partition_labels() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let state = StateBitmap::full(4);
        let secrets: Vec<usize> = state.iter_ones().collect();
        for guess in 0..4 {
            let partition = engine.partition_of(&secrets, guess);
            for (&secret, &label) in secrets.iter().zip(&partition.signature) {
                if label != WIN_LABEL {
                    assert_eq!(engine.class_of(&state, guess, secret), label as usize);
                }
            }
        }
    }

    #[test]
    fn test_labels_cover_every_byte_code() {
        // One guess that gives each of 256 answers its own code, the last
        // one being the solved pattern.
        let codes: Vec<u8> = (0..=255u8).collect();
        let table = PatternTable::from_codes(1, 256, codes, 255).unwrap();
        let ctx = SearchContext::new(config(1), table).unwrap();
        let engine = Engine::new(&ctx);
        let secrets: Vec<usize> = (0..256).collect();

        let p = engine.partition_of(&secrets, 0);
        assert_eq!(p.class_sizes().len(), 255);
        assert_eq!(p.num_classes(), 256);
        assert_eq!(p.signature[255], WIN_LABEL);
        assert!(p.signature[..255].iter().all(|&l| l != WIN_LABEL));
        let distinct: std::collections::HashSet<u8> = p.signature.iter().copied().collect();
        assert_eq!(distinct.len(), 256);
    }

    #[test]
    fn test_repeated_reports_count_once() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();
        engine.expand(root, &ActionSet::full(5)).unwrap();
        // Guess 0 wins on 0 and splits {1, 3} (class 0) from {2} (class 1).
        let to_pair = [Step {
            node: root,
            edge: 0,
            class: Some(0),
        }];
        let to_single = [Step {
            node: root,
            edge: 0,
            class: Some(1),
        }];

        // The pair is solved at 1.5; reporting it from several episodes
        // must not count it twice.
        for _ in 0..3 {
            engine.propagate_update(&to_pair, 1.5, true);
        }
        let stats = root.edges()[0].stats();
        assert_eq!(stats.solved_children, 2);
        assert!(!root.edges()[0].is_solved());
        assert_eq!(stats.visit_count, 3);

        engine.propagate_update(&to_single, 1.0, true);
        let edge = &root.edges()[0];
        assert!(edge.is_solved());
        // 1 + 2/4 * 1.5 + 1/4 * 1.0
        assert!((edge.stats().q - 2.0).abs() < 1e-12);
        assert_eq!(root.value(), 2.0);
        assert_eq!(root.stats().best_action, 0);
    }

    #[test]
    fn test_worse_report_leaves_edge_alone() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();
        engine.expand(root, &ActionSet::full(5)).unwrap();
        let before = root.edges()[0].stats();

        let trajectory = [Step {
            node: root,
            edge: 0,
            class: Some(0),
        }];
        engine.propagate_update(&trajectory, 9.0, false);
        let after = root.edges()[0].stats();
        assert_eq!(after.q, before.q);
        assert_eq!(after.visit_count, 1);
        assert_eq!(root.edges()[0].classes()[0].value(), 1.5);
    }

    #[test]
    fn test_propagate_stops_without_improvement() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();
        let all = ActionSet::full(5);
        engine.expand(root, &all).unwrap();

        let pair = ctx.get_or_create(&StateBitmap::from_indices(4, [1, 3])).unwrap();
        engine
            .expand(pair, &candidates_from_edges(root.edges(), 5))
            .unwrap();
        // Guess 1 on {1, 3}: wins on 1 and isolates 3, already at q = 1.5.
        let inner = pair
            .edges()
            .iter()
            .position(|e| e.guess() == 1)
            .unwrap();
        let trajectory = [
            Step {
                node: root,
                edge: 0,
                class: Some(0),
            },
            Step {
                node: pair,
                edge: inner,
                class: Some(0),
            },
        ];
        engine.propagate_update(&trajectory, 1.0, true);

        // The pair's edge is solved, but its q does not beat v = 1.5, so the
        // walk ends before the root edge.
        assert!(pair.edges()[inner].is_solved());
        assert_eq!(pair.value(), 1.5);
        assert_eq!(root.edges()[0].stats().visit_count, 0);
    }

    #[test]
    fn test_episode_reaches_terminal() {
        let ctx = SearchContext::new(config(1), toy_table()).unwrap();
        let engine = Engine::new(&ctx);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let outcome = engine.run_episode(&mut rng).unwrap();
            assert!(outcome.depth <= 4);
            assert!(outcome.value >= 0.0);
        }
        assert!(ctx.root().unwrap().value() <= initial_value(4));
    }
}
