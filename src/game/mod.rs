//! Feedback games the search can solve.
//!
//! The search only needs to know how a guess scores against a secret. Anything
//! that can answer `pattern_of` for a fixed answer and guess universe plugs in
//! through `PatternSource`; `wordle` provides the word-game implementation.

pub mod wordle;

pub use wordle::{compute_pattern, load_words, PatternTable};

use crate::bitmap::StateBitmap;

/// Feedback for one guess against one secret.
pub type PatternCode = u8;

/// Scoring oracle over fixed answer and guess universes.
///
/// Implementations are shared by every worker thread and are called in the
/// innermost loops of expansion and DP, so they should be table lookups.
pub trait PatternSource: Send + Sync {
    /// Size of the secret universe `A`.
    fn num_answers(&self) -> usize;

    /// Size of the guess universe `G`.
    fn num_guesses(&self) -> usize;

    /// Feedback shown when `guess` is played against `secret`.
    fn pattern_of(&self, guess: usize, secret: usize) -> PatternCode;

    /// Feedback meaning "the guess is the secret".
    fn solved_pattern(&self) -> PatternCode;

    /// Secrets in `state` that would have produced the same feedback for
    /// `guess` as `secret` did.
    fn narrow(&self, state: &StateBitmap, guess: usize, secret: usize) -> StateBitmap {
        let target = self.pattern_of(guess, secret);
        let mut next = StateBitmap::empty(state.len());
        for s in state.iter_ones() {
            if self.pattern_of(guess, s) == target {
                next.insert(s);
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Secret and guess are digits; feedback is "lower / equal / higher".
    struct HigherLower(usize);

    impl PatternSource for HigherLower {
        fn num_answers(&self) -> usize {
            self.0
        }

        fn num_guesses(&self) -> usize {
            self.0
        }

        fn pattern_of(&self, guess: usize, secret: usize) -> PatternCode {
            match secret.cmp(&guess) {
                std::cmp::Ordering::Less => 0,
                std::cmp::Ordering::Equal => 1,
                std::cmp::Ordering::Greater => 2,
            }
        }

        fn solved_pattern(&self) -> PatternCode {
            1
        }
    }

    #[test]
    fn test_default_narrow() {
        let game = HigherLower(10);
        let all = StateBitmap::full(10);

        let below = game.narrow(&all, 4, 1);
        assert_eq!(below.iter_ones().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let hit = game.narrow(&all, 4, 4);
        assert_eq!(hit.iter_ones().collect::<Vec<_>>(), vec![4]);

        let above = game.narrow(&below, 2, 3);
        assert_eq!(above.iter_ones().collect::<Vec<_>>(), vec![3]);
    }
}
