//! Run configuration.
//!
//! `SolverConfig::default()` is tuned for the full Wordle dictionaries;
//! `from_env` layers `WORDLE_*` environment overrides on top for the binary.

use std::path::PathBuf;

use crate::error::{Result, SolverError};

/// Configuration for a solver run.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Candidate count at or below which a state is solved exactly
    pub dp_threshold: usize,
    /// Solve the root by exact DP and skip sampling entirely
    pub pure_dp: bool,
    /// Episodes per batch (one checkpoint per batch)
    pub batch_size: usize,
    /// Softmax temperature; 0 selects greedily
    pub temperature: f64,
    /// Arena capacity in megabytes
    pub arena_megabytes: usize,
    /// log2 of the bucket count
    pub table_size_exp: u32,
    /// log2 of the bucket lock count (must not exceed `table_size_exp`)
    pub lock_count_exp: u32,
    /// Worker threads (0 = rayon default)
    pub num_threads: usize,
    /// Where to write checkpoints (None disables checkpointing)
    pub checkpoint_path: Option<PathBuf>,
    /// Checkpoint to restore from at startup
    pub restore_path: Option<PathBuf>,
    /// Base seed for episode RNGs (None = entropy)
    pub seed: Option<u64>,
    /// Stop after this many batches even if the root is unsolved
    pub max_batches: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dp_threshold: 12,
            pure_dp: false,
            batch_size: 1024,
            temperature: 0.25,
            arena_megabytes: 4096,
            table_size_exp: 22,
            lock_count_exp: 14,
            num_threads: 0,
            checkpoint_path: None,
            restore_path: None,
            seed: None,
            max_batches: None,
        }
    }
}

impl SolverConfig {
    /// Arena capacity in bytes.
    pub fn arena_bytes(&self) -> usize {
        self.arena_megabytes * 1024 * 1024
    }

    pub fn table_size(&self) -> usize {
        1usize << self.table_size_exp
    }

    pub fn num_locks(&self) -> usize {
        1usize << self.lock_count_exp
    }

    /// Reject configurations the search cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dp_threshold == 0 {
            return Err(SolverError::Config(
                "dp_threshold must be at least 1 so single candidates are solved exactly".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SolverError::Config("batch_size must be positive".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SolverError::Config(format!(
                "temperature must be finite and non-negative, got {}",
                self.temperature
            )));
        }
        if self.arena_megabytes == 0 {
            return Err(SolverError::Config("arena_megabytes must be positive".into()));
        }
        if self.table_size_exp > 40 {
            return Err(SolverError::Config(format!(
                "table_size_exp {} is too large",
                self.table_size_exp
            )));
        }
        if self.lock_count_exp > self.table_size_exp {
            return Err(SolverError::Config(format!(
                "lock_count_exp {} exceeds table_size_exp {}",
                self.lock_count_exp, self.table_size_exp
            )));
        }
        Ok(())
    }

    /// Apply `WORDLE_*` environment overrides to the defaults.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("WORDLE_DP_THRESHOLD")? {
            config.dp_threshold = v;
        }
        if let Some(v) = env_parse::<u8>("WORDLE_PURE_DP")? {
            config.pure_dp = v != 0;
        }
        if let Some(v) = env_parse("WORDLE_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = env_parse("WORDLE_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = env_parse("WORDLE_ARENA_MB")? {
            config.arena_megabytes = v;
        }
        if let Some(v) = env_parse("WORDLE_TABLE_EXP")? {
            config.table_size_exp = v;
        }
        if let Some(v) = env_parse("WORDLE_LOCK_EXP")? {
            config.lock_count_exp = v;
        }
        if let Some(v) = env_parse("RAYON_NUM_THREADS")? {
            config.num_threads = v;
        }
        if let Some(v) = env_parse("WORDLE_SEED")? {
            config.seed = Some(v);
        }
        if let Some(v) = env_parse("WORDLE_MAX_BATCHES")? {
            config.max_batches = Some(v);
        }
        config.checkpoint_path = std::env::var_os("WORDLE_CHECKPOINT").map(PathBuf::from);
        config.restore_path = std::env::var_os("WORDLE_RESTORE").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SolverError::Config(format!("{key}={raw:?} is not a valid value"))),
        Err(_) => Ok(None),
    }
}
