//! wordle-mcts-rs: parallel belief-state search for feedback guessing games.
//!
//! A belief-state is the set of secrets still consistent with the feedback
//! seen so far. Worker threads run sampled episodes over a shared graph of
//! belief-states, refining each state's expected number of remaining guesses;
//! states small enough are solved exactly by DP. The whole graph lives in one
//! bump arena whose references are self-relative, so it can be checkpointed as
//! a byte image and restored at any address.
//!
//! ```no_run
//! use wordle_mcts::batch::Solver;
//! use wordle_mcts::config::SolverConfig;
//! use wordle_mcts::game::{load_words, PatternTable};
//!
//! # fn main() -> wordle_mcts::error::Result<()> {
//! let answers = load_words("data/answers.txt")?;
//! let guesses = load_words("data/guesses.txt")?;
//! let patterns = PatternTable::from_words(&guesses, &answers)?;
//! let mut solver = Solver::new(SolverConfig::from_env()?, patterns)?;
//! let summary = solver.run()?;
//! println!("expected guesses: {:.4}", summary.root.value);
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod batch;
pub mod bitmap;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod dp;
pub mod error;
pub mod game;
pub mod handle;
pub mod math;
pub mod node;
pub mod search;
pub mod transposition_table;

pub use batch::Solver;
pub use config::SolverConfig;
pub use context::SearchContext;
pub use error::{Result, SolverError};
pub use game::{PatternSource, PatternTable};
