//! Batch coordination for the parallel search.
//!
//! A `Solver` owns the search context and a fixed rayon pool. Each batch runs
//! `batch_size` independent episodes; workers fold their own statistics and
//! the partial results are merged when the batch ends. Between batches the
//! solver has exclusive access to the graph, which is when checkpoints are
//! written.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::bitmap::ActionSet;
use crate::config::SolverConfig;
use crate::context::SearchContext;
use crate::dp;
use crate::error::{Result, SolverError};
use crate::game::PatternSource;
use crate::math::selection_probabilities;
use crate::node::{NodeStatus, NO_ACTION};
use crate::search::{EpisodeOutcome, Terminal};

/// Statistics gathered by one worker, merged at batch boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpisodeStats {
    pub episodes: u64,
    pub total_depth: u64,
    pub max_depth: usize,
    /// Episodes that ended in an exact DP evaluation
    pub cutovers: u64,
    /// Episodes whose sampled guess was the secret
    pub wins: u64,
    /// Episodes that settled a node with all edges solved
    pub exhausted: u64,
    /// Episodes that stopped at an already solved node
    pub solved_hits: u64,
    /// Nodes moved to `Solved` by these episodes
    pub newly_solved: u64,
}

impl EpisodeStats {
    pub fn record(&mut self, outcome: &EpisodeOutcome) {
        self.episodes += 1;
        self.total_depth += outcome.depth as u64;
        self.max_depth = self.max_depth.max(outcome.depth);
        match outcome.terminal {
            Terminal::Cutover => self.cutovers += 1,
            Terminal::Won => self.wins += 1,
            Terminal::Exhausted => self.exhausted += 1,
            Terminal::Solved => self.solved_hits += 1,
        }
        if outcome.newly_solved {
            self.newly_solved += 1;
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            episodes: self.episodes + other.episodes,
            total_depth: self.total_depth + other.total_depth,
            max_depth: self.max_depth.max(other.max_depth),
            cutovers: self.cutovers + other.cutovers,
            wins: self.wins + other.wins,
            exhausted: self.exhausted + other.exhausted,
            solved_hits: self.solved_hits + other.solved_hits,
            newly_solved: self.newly_solved + other.newly_solved,
        }
    }

    pub fn mean_depth(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_depth as f64 / self.episodes as f64
        }
    }
}

/// Snapshot of the root node.
#[derive(Clone, Debug)]
pub struct RootSummary {
    pub value: f64,
    pub status: NodeStatus,
    pub best_guess: Option<u32>,
    pub candidates: usize,
    pub edges: usize,
    pub solved_edges: usize,
}

/// One root edge, as reported to the user.
#[derive(Clone, Debug)]
pub struct ActionSummary {
    pub guess: u32,
    pub q: f64,
    pub visits: u32,
    pub solved_children: u32,
    pub total_children: u32,
    /// Chance of being sampled at the configured temperature
    pub probability: f64,
}

/// Outcome of one batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub batch: u64,
    pub stats: EpisodeStats,
    pub root: RootSummary,
    pub nodes: u64,
    pub arena_used: usize,
    pub elapsed_secs: f64,
}

/// Outcome of `Solver::run`.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub batches: u64,
    pub stats: EpisodeStats,
    /// Episodes across every run of this graph, restored ones included
    pub total_episodes: u64,
    pub root: RootSummary,
    pub nodes: u64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
}

/// Seed for one episode, spread so consecutive indices look unrelated.
fn episode_seed(base: u64, index: u64) -> u64 {
    let mut z = base ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Drives batches of episodes over one search context.
pub struct Solver<P: PatternSource> {
    ctx: SearchContext<P>,
    pool: rayon::ThreadPool,
    base_seed: u64,
    batches_run: u64,
}

impl<P: PatternSource> Solver<P> {
    /// Fresh search, or a restored one when `config.restore_path` is set.
    pub fn new(config: SolverConfig, patterns: P) -> Result<Self> {
        let ctx = match config.restore_path.clone() {
            Some(path) => SearchContext::restore(config, patterns, &path)?,
            None => SearchContext::new(config, patterns)?,
        };
        Self::with_context(ctx)
    }

    pub fn with_context(ctx: SearchContext<P>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.config().num_threads)
            .thread_name(|i| format!("wordle-worker-{i}"))
            .build()
            .map_err(|e| SolverError::Config(format!("cannot build worker pool: {e}")))?;
        let base_seed = ctx.config().seed.unwrap_or_else(rand::random);
        log::info!(
            "solver: {} workers, batch size {}, temperature {}, dp threshold {}, seed {}",
            pool.current_num_threads(),
            ctx.config().batch_size,
            ctx.config().temperature,
            ctx.config().dp_threshold,
            base_seed
        );
        Ok(Self {
            ctx,
            pool,
            base_seed,
            batches_run: 0,
        })
    }

    pub fn context(&self) -> &SearchContext<P> {
        &self.ctx
    }

    pub fn into_context(self) -> SearchContext<P> {
        self.ctx
    }

    pub fn root_solved(&self) -> Result<bool> {
        Ok(self.ctx.root()?.is_solved())
    }

    /// Run one batch of episodes (or one exact root evaluation in pure-DP
    /// mode). Allocation failures abort the batch.
    pub fn run_batch(&mut self) -> Result<BatchReport> {
        let start = Instant::now();
        let ctx = &self.ctx;
        let config = ctx.config();

        let stats = if config.pure_dp {
            let root = ctx.root()?;
            let candidates = ActionSet::full(ctx.patterns().num_guesses());
            let outcome = self
                .pool
                .install(|| dp::dp_evaluate(&ctx.engine(), root, &candidates))?;
            log::info!(
                "exact root evaluation: v = {:.6} over {} sub-states",
                outcome.value,
                outcome.evaluations
            );
            EpisodeStats {
                episodes: 1,
                cutovers: 1,
                newly_solved: u64::from(outcome.newly_solved),
                ..EpisodeStats::default()
            }
        } else {
            let first = ctx.episodes();
            let base = self.base_seed;
            self.pool.install(|| {
                (0..config.batch_size as u64)
                    .into_par_iter()
                    .try_fold(EpisodeStats::default, |mut stats, i| {
                        let mut rng = StdRng::seed_from_u64(episode_seed(base, first + i));
                        let outcome = ctx.engine().run_episode(&mut rng)?;
                        stats.record(&outcome);
                        Ok::<_, SolverError>(stats)
                    })
                    .try_reduce(EpisodeStats::default, |a, b| Ok(a.merge(b)))
            })?
        };
        ctx.add_episodes(stats.episodes);

        let batch = self.batches_run;
        self.batches_run += 1;
        let report = BatchReport {
            batch,
            stats,
            root: self.root_summary()?,
            nodes: self.ctx.node_count(),
            arena_used: self.ctx.arena().used(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        log::info!(
            "batch {}: {} episodes, mean depth {:.2} (max {}), {} cutovers, {} newly solved, \
             root v = {:.4} ({:?}), {} nodes, arena {:.1}% used, {:.2}s",
            report.batch,
            stats.episodes,
            stats.mean_depth(),
            stats.max_depth,
            stats.cutovers,
            stats.newly_solved,
            report.root.value,
            report.root.status,
            report.nodes,
            100.0 * report.arena_used as f64 / self.ctx.arena().capacity() as f64,
            report.elapsed_secs
        );
        Ok(report)
    }

    /// Write a checkpoint if a path is configured.
    ///
    /// Write failures are logged and reported as `Ok(None)`; the previous
    /// checkpoint is still on disk.
    pub fn checkpoint(&mut self) -> Result<Option<u64>> {
        let Some(path) = self.ctx.config().checkpoint_path.clone() else {
            return Ok(None);
        };
        match self.ctx.save_checkpoint(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if !e.is_fatal() => {
                log::warn!("{e}; continuing with the previous checkpoint");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Run batches until the root is solved or `max_batches` is reached,
    /// checkpointing after every batch.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut stats = EpisodeStats::default();
        let mut batches = 0u64;
        let mut checkpoints_written = 0;
        let mut checkpoint_failures = 0;
        let checkpointing = self.ctx.config().checkpoint_path.is_some();

        while !self.root_solved()? {
            if self
                .ctx
                .config()
                .max_batches
                .is_some_and(|max| batches >= max)
            {
                log::info!("stopping after {batches} batches, root not solved yet");
                break;
            }
            let report = match self.run_batch() {
                Ok(report) => report,
                Err(e) => {
                    log::error!("batch aborted: {e}");
                    return Err(e);
                }
            };
            stats = stats.merge(report.stats);
            batches += 1;

            if checkpointing {
                match self.checkpoint()? {
                    Some(_) => checkpoints_written += 1,
                    None => checkpoint_failures += 1,
                }
            }
        }

        let root = self.root_summary()?;
        if root.status == NodeStatus::Solved {
            log::info!(
                "root solved: v = {:.6}, best guess {:?}",
                root.value,
                root.best_guess
            );
        }
        Ok(RunSummary {
            batches,
            stats,
            total_episodes: self.ctx.episodes(),
            root,
            nodes: self.ctx.node_count(),
            checkpoints_written,
            checkpoint_failures,
        })
    }

    pub fn root_summary(&self) -> Result<RootSummary> {
        let root = self.ctx.root()?;
        let stats = root.stats();
        let edges = root.edges();
        Ok(RootSummary {
            value: stats.v,
            status: stats.status,
            best_guess: (stats.best_guess != NO_ACTION).then_some(stats.best_guess),
            candidates: root.candidate_count(),
            edges: edges.len(),
            solved_edges: edges.iter().filter(|e| e.is_solved()).count(),
        })
    }

    /// Root edges ordered by `q`, best first.
    pub fn root_actions(&self) -> Result<Vec<ActionSummary>> {
        let root = self.ctx.root()?;
        let mut actions: Vec<ActionSummary> = root
            .edges()
            .iter()
            .map(|edge| {
                let stats = edge.stats();
                ActionSummary {
                    guess: edge.guess(),
                    q: stats.q,
                    visits: stats.visit_count,
                    solved_children: stats.solved_children,
                    total_children: edge.total_children(),
                    probability: 0.0,
                }
            })
            .collect();

        let open: Vec<usize> = (0..actions.len())
            .filter(|&i| actions[i].solved_children < actions[i].total_children)
            .collect();
        let costs: Vec<f64> = open.iter().map(|&i| actions[i].q).collect();
        let probs = selection_probabilities(&costs, self.ctx.config().temperature);
        for (&i, p) in open.iter().zip(probs) {
            actions[i].probability = p;
        }

        actions.sort_by(|a, b| a.q.total_cmp(&b.q));
        Ok(actions)
    }
}
