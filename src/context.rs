//! Shared state handed to every search component.
//!
//! A `SearchContext` owns the configuration, the arena, the state table and
//! the pattern oracle. Workers borrow it immutably; only checkpointing needs
//! `&mut`, which is how batch boundaries are enforced.

use std::path::Path;

use crate::arena::Arena;
use crate::bitmap::StateBitmap;
use crate::checkpoint;
use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::game::PatternSource;
use crate::node::StateNode;
use crate::search::Engine;
use crate::transposition_table::StateTable;

pub struct SearchContext<P: PatternSource> {
    config: SolverConfig,
    arena: Arena,
    table: StateTable,
    patterns: P,
}

impl<P: PatternSource> SearchContext<P> {
    /// Fresh arena and table with the full answer set as root.
    pub fn new(config: SolverConfig, patterns: P) -> Result<Self> {
        config.validate()?;
        let arena = Arena::with_capacity(config.arena_bytes())?;
        let table = StateTable::create(
            &arena,
            config.table_size_exp,
            config.lock_count_exp,
            patterns.num_answers(),
            patterns.num_guesses(),
        )?;
        let root = table.get_or_create(&arena, &StateBitmap::full(patterns.num_answers()))?;
        table.set_root(&arena, root);

        log::info!(
            "search context: {} answers, {} guesses, {} buckets, {} locks, {} MiB arena",
            patterns.num_answers(),
            patterns.num_guesses(),
            table.table_size(),
            table.num_locks(),
            config.arena_megabytes
        );
        Ok(Self {
            config,
            arena,
            table,
            patterns,
        })
    }

    /// Rebuild a context from a checkpoint written by `save_checkpoint`.
    pub fn restore(config: SolverConfig, patterns: P, path: &Path) -> Result<Self> {
        config.validate()?;
        let mut arena = checkpoint::restore(path, config.arena_bytes())?;
        let table = StateTable::open(
            &arena,
            config.lock_count_exp,
            patterns.num_answers(),
            patterns.num_guesses(),
            path,
        )?;
        if table.root(&arena).is_none() {
            return Err(SolverError::restore(path, "checkpoint has no root node"));
        }
        let (nodes, edges) = table.reinitialize_locks(&mut arena);
        log::info!(
            "restored {} nodes and {} edges ({} episodes so far), locks rebuilt",
            nodes,
            edges,
            table.episodes(&arena)
        );
        Ok(Self {
            config,
            arena,
            table,
            patterns,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn table(&self) -> &StateTable {
        &self.table
    }

    pub fn patterns(&self) -> &P {
        &self.patterns
    }

    pub fn engine(&self) -> Engine<'_, P> {
        Engine::new(self)
    }

    pub fn root(&self) -> Result<&StateNode> {
        self.table.root(&self.arena).ok_or(SolverError::NullHandle)
    }

    pub fn get_or_create(&self, bitmap: &StateBitmap) -> Result<&StateNode> {
        self.table.get_or_create(&self.arena, bitmap)
    }

    pub fn find(&self, bitmap: &StateBitmap) -> Option<&StateNode> {
        self.table.find(&self.arena, bitmap)
    }

    pub fn node_count(&self) -> u64 {
        self.table.node_count(&self.arena)
    }

    /// Episodes completed across every run of this graph.
    pub fn episodes(&self) -> u64 {
        self.table.episodes(&self.arena)
    }

    pub(crate) fn add_episodes(&self, n: u64) {
        self.table.add_episodes(&self.arena, n);
    }

    /// Visit every node in the graph (buckets in parallel).
    pub fn for_each_node<F>(&self, f: F)
    where
        F: Fn(&StateNode) + Sync + Send,
    {
        self.table.for_each_node(&self.arena, f);
    }

    /// Write the arena image to `path`. Requires exclusive access.
    pub fn save_checkpoint(&mut self, path: &Path) -> Result<u64> {
        checkpoint::save(&mut self.arena, path)
    }
}

impl<P: PatternSource> std::fmt::Debug for SearchContext<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("config", &self.config)
            .field("arena", &self.arena)
            .field("table", &self.table)
            .finish()
    }
}
