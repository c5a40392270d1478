//! Exact evaluation of small belief-states.
//!
//! `cost(S) = min_g [1 + sum over classes c of |c|/|S| * (c wins ? 0 : cost(c))]`
//! with `cost({s}) = 1`. Guesses are restricted to the distinct informative
//! partitions of `S`; two guesses that split `S` identically split every
//! subset identically, so children inherit that reduced set losslessly.
//!
//! Search is depth-first with branch-and-bound: every class of size `m` costs
//! at least `(2m - 1) / m`, and a state that reaches its own lower bound stops
//! looking at further guesses. A state above the cutover threshold (the root
//! in pure-DP mode) computes its own partitions on the rayon pool.

use rustc_hash::FxHashMap;

use crate::bitmap::{ActionSet, StateBitmap};
use crate::error::Result;
use crate::game::PatternSource;
use crate::node::{initial_value, NodeStatus, StateNode, NO_ACTION};
use crate::search::Engine;

const EPSILON: f64 = 1e-12;

/// Result of an exact evaluation written back to a node.
#[derive(Clone, Copy, Debug)]
pub struct DpOutcome {
    /// The node's value after write-back
    pub value: f64,
    pub best_guess: u32,
    /// Whether this call moved the node to `Solved`
    pub newly_solved: bool,
    /// Distinct sub-states evaluated
    pub evaluations: usize,
}

/// Minimum expected guesses for a set of `n` candidates, achieved only when
/// some guess wins one candidate and isolates every other.
#[inline]
pub fn lower_bound(n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (2 * n - 1) as f64 / n as f64
}

/// Per-call memoized exact solver.
pub struct ExactSolver<'e, 'a, P: PatternSource> {
    engine: &'e Engine<'a, P>,
    memo: FxHashMap<StateBitmap, (f64, u32)>,
    reused: usize,
}

impl<'e, 'a, P: PatternSource> ExactSolver<'e, 'a, P> {
    pub fn new(engine: &'e Engine<'a, P>) -> Self {
        Self {
            engine,
            memo: FxHashMap::default(),
            reused: 0,
        }
    }

    /// Sub-states evaluated so far.
    pub fn evaluations(&self) -> usize {
        self.memo.len()
    }

    /// Solved table nodes whose value was taken instead of recomputed.
    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Exact cost of `state` and a guess achieving it.
    pub fn cost(&mut self, state: &StateBitmap, candidates: &ActionSet) -> (f64, u32) {
        let guesses: Vec<u32> = candidates.iter_ones().map(|g| g as u32).collect();
        self.cost_with(state, &guesses, true)
    }

    fn cost_with(&mut self, state: &StateBitmap, guesses: &[u32], top: bool) -> (f64, u32) {
        let n = state.count();
        if n <= 1 {
            let guess = state
                .iter_ones()
                .next()
                .map_or(NO_ACTION, |secret| self.winning_guess(secret, guesses));
            return (n as f64, guess);
        }
        if let Some(&hit) = self.memo.get(state) {
            return hit;
        }
        if !top {
            let ctx = self.engine.context();
            if let Some(node) = ctx.find(state) {
                let stats = node.stats();
                if stats.status == NodeStatus::Solved {
                    self.reused += 1;
                    self.memo.insert(state.clone(), (stats.v, stats.best_guess));
                    return (stats.v, stats.best_guess);
                }
            }
        }

        let ctx = self.engine.context();
        let num_answers = ctx.patterns().num_answers();
        let secrets: Vec<usize> = state.iter_ones().collect();
        let candidates = ActionSet::from_indices(
            ctx.patterns().num_guesses(),
            guesses.iter().map(|&g| g as usize),
        );
        let parallel = top && n > ctx.config().dp_threshold;
        let mut partitions = self
            .engine
            .informative_partitions(state, &candidates, parallel)
            .kept;
        // Finer splits first tighten the bound sooner.
        partitions.sort_by_key(|p| {
            (
                std::cmp::Reverse(p.num_classes()),
                p.class_sizes().iter().copied().max().unwrap_or(0),
            )
        });
        let next: Vec<u32> = {
            let mut g: Vec<u32> = partitions.iter().map(|p| p.guess).collect();
            g.sort_unstable();
            g
        };

        let floor = lower_bound(n);
        let inv_n = 1.0 / n as f64;
        let mut best = (initial_value(n), NO_ACTION);
        let mut improved = false;

        for partition in &partitions {
            let mut bound = 1.0
                + partition
                    .class_sizes()
                    .iter()
                    .map(|&m| (2 * m - 1) as f64 * inv_n)
                    .sum::<f64>();
            if bound >= best.0 - EPSILON && improved {
                continue;
            }
            let mut pruned = false;
            for class in partition.classes(&secrets, num_answers) {
                let m = class.count();
                let (c, _) = self.cost_with(&class, &next, false);
                bound += (c - lower_bound(m)) * m as f64 * inv_n;
                if improved && bound >= best.0 - EPSILON {
                    pruned = true;
                    break;
                }
            }
            if !pruned && (!improved || bound < best.0) {
                best = (bound, partition.guess);
                improved = true;
                if best.0 <= floor + EPSILON {
                    break;
                }
            }
        }

        self.memo.insert(state.clone(), best);
        best
    }

    /// A guess that wins outright on `secret`, preferring the given guesses.
    fn winning_guess(&self, secret: usize, guesses: &[u32]) -> u32 {
        let patterns = self.engine.context().patterns();
        let solved = patterns.solved_pattern();
        guesses
            .iter()
            .copied()
            .find(|&g| patterns.pattern_of(g as usize, secret) == solved)
            .or_else(|| {
                (0..patterns.num_guesses())
                    .find(|&g| patterns.pattern_of(g, secret) == solved)
                    .map(|g| g as u32)
            })
            .unwrap_or(NO_ACTION)
    }
}

/// Solve `node` exactly and record the result.
///
/// The first worker to flip the node to `Solved` reports `newly_solved`;
/// anyone racing it computed the same value and leaves the node untouched.
pub fn dp_evaluate<P: PatternSource>(
    engine: &Engine<'_, P>,
    node: &StateNode,
    candidates: &ActionSet,
) -> Result<DpOutcome> {
    let num_answers = engine.context().patterns().num_answers();
    let state = node.bitmap(num_answers);

    let mut solver = ExactSolver::new(engine);
    let (exact, guess) = solver.cost(&state, candidates);

    let best_action = node
        .edges()
        .iter()
        .position(|e| e.guess() == guess)
        .map_or(NO_ACTION, |i| i as u32);

    let mut stats = node.lock();
    if stats.status == NodeStatus::Solved {
        return Ok(DpOutcome {
            value: stats.v,
            best_guess: stats.best_guess,
            newly_solved: false,
            evaluations: solver.evaluations(),
        });
    }
    if exact <= stats.v {
        stats.v = exact;
        stats.best_guess = guess;
        stats.best_action = best_action;
    }
    stats.status = NodeStatus::Solved;
    Ok(DpOutcome {
        value: stats.v,
        best_guess: stats.best_guess,
        newly_solved: true,
        evaluations: solver.evaluations(),
    })
}

/// Exact cost of an arbitrary set without touching any node.
pub fn exact_cost<P: PatternSource>(
    engine: &Engine<'_, P>,
    state: &StateBitmap,
    candidates: &ActionSet,
) -> (f64, u32) {
    ExactSolver::new(engine).cost(state, candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::context::SearchContext;
    use crate::game::PatternTable;

    /// `n` answers, `n` guesses; guess `g` wins on `g` and otherwise reports
    /// whether the secret is below or above it.
    fn bisection(n: usize) -> PatternTable {
        let mut codes = Vec::with_capacity(n * n);
        for g in 0..n {
            for s in 0..n {
                codes.push(match s.cmp(&g) {
                    std::cmp::Ordering::Less => 0,
                    std::cmp::Ordering::Equal => 9,
                    std::cmp::Ordering::Greater => 1,
                });
            }
        }
        PatternTable::from_codes(n, n, codes, 9).unwrap()
    }

    fn context(n: usize) -> SearchContext<PatternTable> {
        let config = SolverConfig {
            dp_threshold: n,
            arena_megabytes: 1,
            table_size_exp: 8,
            lock_count_exp: 4,
            ..SolverConfig::default()
        };
        SearchContext::new(config, bisection(n)).unwrap()
    }

    #[test]
    fn test_lower_bound() {
        assert_eq!(lower_bound(1), 1.0);
        assert_eq!(lower_bound(2), 1.5);
        assert!((lower_bound(3) - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_singleton_costs_one() {
        let ctx = context(4);
        let engine = Engine::new(&ctx);
        let (cost, guess) = exact_cost(
            &engine,
            &StateBitmap::from_indices(4, [2]),
            &ActionSet::full(4),
        );
        assert_eq!(cost, 1.0);
        assert_eq!(guess, 2);
    }

    #[test]
    fn test_pair_costs_one_and_a_half() {
        let ctx = context(4);
        let engine = Engine::new(&ctx);
        let (cost, guess) = exact_cost(
            &engine,
            &StateBitmap::from_indices(4, [1, 3]),
            &ActionSet::full(4),
        );
        assert_eq!(cost, 1.5);
        assert!(guess == 1 || guess == 3);
    }

    #[test]
    fn test_bisection_optimum() {
        // Three sorted candidates: guess the middle, win 1/3 of the time,
        // otherwise one more guess.
        let ctx = context(3);
        let engine = Engine::new(&ctx);
        let (cost, guess) = exact_cost(&engine, &StateBitmap::full(3), &ActionSet::full(3));
        assert!((cost - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(guess, 1);

        // Seven: 1 + (0 + 3 * 5/3 + 3 * 5/3) / 7 = 17/7.
        let ctx = context(7);
        let engine = Engine::new(&ctx);
        let (cost, guess) = exact_cost(&engine, &StateBitmap::full(7), &ActionSet::full(7));
        assert!((cost - 17.0 / 7.0).abs() < 1e-12);
        assert_eq!(guess, 3);
    }

    #[test]
    fn test_dp_evaluate_writes_back() {
        let ctx = context(5);
        let engine = Engine::new(&ctx);
        let root = ctx.root().unwrap();

        let outcome = dp_evaluate(&engine, root, &ActionSet::full(5)).unwrap();
        assert!(outcome.newly_solved);
        // Guesses 1, 2 and 3 all reach 11/5.
        assert!((outcome.value - 2.2).abs() < 1e-12);
        let stats = root.stats();
        assert_eq!(stats.status, NodeStatus::Solved);
        assert_eq!(stats.v, outcome.value);
        assert!((1..=3).contains(&stats.best_guess));

        let again = dp_evaluate(&engine, root, &ActionSet::full(5)).unwrap();
        assert!(!again.newly_solved);
        assert_eq!(again.value, outcome.value);
    }

    #[test]
    fn test_large_state_matches_on_a_pool() {
        // Threshold 2 puts the 7-candidate root above the cutover, so its
        // partitions are computed in parallel.
        let config = SolverConfig {
            dp_threshold: 2,
            arena_megabytes: 1,
            table_size_exp: 8,
            lock_count_exp: 4,
            ..SolverConfig::default()
        };
        let ctx = SearchContext::new(config, bisection(7)).unwrap();
        let engine = Engine::new(&ctx);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let root = ctx.root().unwrap();
        let outcome = pool
            .install(|| dp_evaluate(&engine, root, &ActionSet::full(7)))
            .unwrap();

        let serial = context(7);
        let (expected, _) = exact_cost(
            &Engine::new(&serial),
            &StateBitmap::full(7),
            &ActionSet::full(7),
        );
        assert!((outcome.value - expected).abs() < 1e-12);
        assert_eq!(outcome.best_guess, 3);
    }

    #[test]
    fn test_reuses_solved_nodes() {
        let ctx = context(7);
        let engine = Engine::new(&ctx);
        let lower = ctx.get_or_create(&StateBitmap::from_indices(7, [0, 1, 2])).unwrap();
        {
            let mut stats = lower.lock();
            stats.v = 5.0 / 3.0;
            stats.best_guess = 1;
            stats.status = NodeStatus::Solved;
        }
        let mut solver = ExactSolver::new(&engine);
        let (cost, _) = solver.cost(&StateBitmap::full(7), &ActionSet::full(7));
        assert!((cost - 17.0 / 7.0).abs() < 1e-12);
        assert!(solver.reused() >= 1);
    }
}
