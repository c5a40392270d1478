//! Solve a word list from the command line.
//!
//! Usage: `wordle-solve [ANSWERS] [GUESSES]` (defaults `data/answers.txt` and
//! `data/guesses.txt`). Everything else comes from `WORDLE_*` variables; see
//! `SolverConfig::from_env`.

use std::process::ExitCode;

use log::{error, info, warn};

use wordle_mcts::batch::Solver;
use wordle_mcts::config::SolverConfig;
use wordle_mcts::error::Result;
use wordle_mcts::game::wordle::guess_universe;
use wordle_mcts::game::{load_words, PatternTable};

const DEFAULT_ANSWERS: &str = "data/answers.txt";
const DEFAULT_GUESSES: &str = "data/guesses.txt";
const SHOW_ACTIONS: usize = 10;

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let answers_path = args.next().unwrap_or_else(|| DEFAULT_ANSWERS.to_string());
    let guesses_path = args.next().unwrap_or_else(|| DEFAULT_GUESSES.to_string());

    let config = SolverConfig::from_env()?;
    info!("configuration: {config:?}");

    let answers = load_words(&answers_path)?;
    let listed = load_words(&guesses_path)?;
    let guesses = guess_universe(&answers, &listed);
    if guesses.len() > listed.len() {
        warn!(
            "{} answers missing from {}, added as guesses",
            guesses.len() - listed.len(),
            guesses_path
        );
    }
    info!("{} answers, {} guesses", answers.len(), guesses.len());

    let patterns = PatternTable::from_words(&guesses, &answers)?;
    let mut solver = Solver::new(config, patterns)?;
    let summary = solver.run()?;

    let word = |g: Option<u32>| {
        g.and_then(|g| guesses.get(g as usize))
            .map_or("-", String::as_str)
    };
    println!(
        "root: v = {:.6} ({:?}), best guess {}, {} of {} edges solved",
        summary.root.value,
        summary.root.status,
        word(summary.root.best_guess),
        summary.root.solved_edges,
        summary.root.edges
    );
    println!(
        "{} batches, {} episodes this run ({} total), mean depth {:.2}, {} nodes",
        summary.batches,
        summary.stats.episodes,
        summary.total_episodes,
        summary.stats.mean_depth(),
        summary.nodes
    );
    if summary.checkpoint_failures > 0 {
        warn!("{} checkpoint writes failed", summary.checkpoint_failures);
    }

    for action in solver.root_actions()?.iter().take(SHOW_ACTIONS) {
        println!(
            "  {:>8}  q = {:.4}  visits {:>8}  solved {}/{}  p = {:.3}",
            word(Some(action.guess)),
            action.q,
            action.visits,
            action.solved_children,
            action.total_children,
            action.probability
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
