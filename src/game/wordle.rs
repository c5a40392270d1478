//! Word-game scoring and its precomputed lookup table.
//!
//! Each letter scores gray, yellow or green. Greens are assigned first and
//! consume the secret's letter; yellows then use whatever letter counts are
//! left, left to right. A pattern is the base-3 number of the colors with
//! position 0 as the least significant digit, so five letters fit in a `u8`
//! (all green = 242).

use std::fs;
use std::path::Path;

use rayon::prelude::*;

use super::{PatternCode, PatternSource};
use crate::error::{Result, SolverError};

/// Longest word whose pattern still fits in a `PatternCode`.
pub const MAX_WORD_LEN: usize = 5;

const GRAY: u8 = 0;
const YELLOW: u8 = 1;
const GREEN: u8 = 2;

/// Score `guess` against `secret`. Both must have the same length.
pub fn compute_pattern(guess: &[u8], secret: &[u8]) -> PatternCode {
    debug_assert_eq!(guess.len(), secret.len());
    debug_assert!(guess.len() <= MAX_WORD_LEN);

    let mut colors = [GRAY; MAX_WORD_LEN];
    let mut remaining = [0u8; 256];
    for &c in secret {
        remaining[c as usize] += 1;
    }

    for (i, (&g, &s)) in guess.iter().zip(secret).enumerate() {
        if g == s {
            colors[i] = GREEN;
            remaining[g as usize] -= 1;
        }
    }
    for (i, &g) in guess.iter().enumerate() {
        if colors[i] != GREEN && remaining[g as usize] > 0 {
            colors[i] = YELLOW;
            remaining[g as usize] -= 1;
        }
    }

    colors[..guess.len()]
        .iter()
        .rev()
        .fold(0u8, |acc, &c| acc * 3 + c)
}

/// Pattern meaning "every letter green" for words of `len` letters.
pub fn all_green(len: usize) -> PatternCode {
    (0..len).fold(0u8, |acc, _| acc * 3 + GREEN)
}

/// Read one word per line, lowercased, skipping blanks and `#` comments.
pub fn load_words(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let words: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_ascii_lowercase)
        .collect();
    if words.is_empty() {
        return Err(SolverError::Config(format!(
            "word list {} is empty",
            path.display()
        )));
    }
    Ok(words)
}

/// Guess universe that contains every answer: `guesses` in order, then any
/// answer the guess list is missing.
pub fn guess_universe(answers: &[String], guesses: &[String]) -> Vec<String> {
    let known: rustc_hash::FxHashSet<&str> = guesses.iter().map(String::as_str).collect();
    let mut universe = guesses.to_vec();
    universe.extend(answers.iter().filter(|a| !known.contains(a.as_str())).cloned());
    universe
}

/// Row-major `G x A` table of precomputed patterns.
#[derive(Clone, Debug)]
pub struct PatternTable {
    num_guesses: usize,
    num_answers: usize,
    solved: PatternCode,
    lut: Vec<PatternCode>,
}

impl PatternTable {
    /// Score every guess against every answer, one guess row per task.
    ///
    /// Every answer must also appear among the guesses, otherwise a single
    /// remaining candidate could not be won in one guess.
    pub fn from_words(guesses: &[String], answers: &[String]) -> Result<Self> {
        let len = answers
            .first()
            .map(String::len)
            .ok_or_else(|| SolverError::Config("answer list is empty".into()))?;
        if len == 0 || len > MAX_WORD_LEN {
            return Err(SolverError::Config(format!(
                "words must have 1..={MAX_WORD_LEN} letters, got {len}"
            )));
        }
        if let Some(bad) = guesses.iter().chain(answers).find(|w| w.len() != len) {
            return Err(SolverError::Config(format!(
                "word {bad:?} does not have {len} letters"
            )));
        }
        let known: rustc_hash::FxHashSet<&str> = guesses.iter().map(String::as_str).collect();
        if let Some(missing) = answers.iter().find(|a| !known.contains(a.as_str())) {
            return Err(SolverError::Config(format!(
                "answer {missing:?} is not a valid guess"
            )));
        }

        let num_answers = answers.len();
        let mut lut = vec![0u8; guesses.len() * num_answers];
        lut.par_chunks_mut(num_answers)
            .zip(guesses.par_iter())
            .for_each(|(row, guess)| {
                for (slot, answer) in row.iter_mut().zip(answers) {
                    *slot = compute_pattern(guess.as_bytes(), answer.as_bytes());
                }
            });

        Ok(Self {
            num_guesses: guesses.len(),
            num_answers,
            solved: all_green(len),
            lut,
        })
    }

    /// Wrap raw codes, e.g. for a synthetic game.
    pub fn from_codes(
        num_guesses: usize,
        num_answers: usize,
        lut: Vec<PatternCode>,
        solved: PatternCode,
    ) -> Result<Self> {
        if lut.len() != num_guesses * num_answers {
            return Err(SolverError::Config(format!(
                "pattern table has {} entries, expected {num_guesses} x {num_answers}",
                lut.len()
            )));
        }
        Ok(Self {
            num_guesses,
            num_answers,
            solved,
            lut,
        })
    }

    /// Patterns of one guess against every answer.
    #[inline]
    pub fn row(&self, guess: usize) -> &[PatternCode] {
        &self.lut[guess * self.num_answers..(guess + 1) * self.num_answers]
    }
}

impl PatternSource for PatternTable {
    #[inline]
    fn num_answers(&self) -> usize {
        self.num_answers
    }

    #[inline]
    fn num_guesses(&self) -> usize {
        self.num_guesses
    }

    #[inline]
    fn pattern_of(&self, guess: usize, secret: usize) -> PatternCode {
        self.lut[guess * self.num_answers + secret]
    }

    #[inline]
    fn solved_pattern(&self) -> PatternCode {
        self.solved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::StateBitmap;

    fn colors(guess: &str, secret: &str) -> String {
        let mut code = compute_pattern(guess.as_bytes(), secret.as_bytes());
        (0..guess.len())
            .map(|_| {
                let c = match code % 3 {
                    0 => 'b',
                    1 => 'y',
                    _ => 'g',
                };
                code /= 3;
                c
            })
            .collect()
    }

    #[test]
    fn test_all_green() {
        assert_eq!(compute_pattern(b"crane", b"crane"), 242);
        assert_eq!(all_green(5), 242);
        assert_eq!(all_green(3), 26);
    }

    #[test]
    fn test_scoring() {
        assert_eq!(colors("crane", "slate"), "bbgbg");
        assert_eq!(colors("trace", "crate"), "yggyg");
        assert_eq!(colors("abcde", "fghij"), "bbbbb");
    }

    #[test]
    fn test_repeated_letters() {
        // Only one 'e' in the secret: the green one consumes it.
        assert_eq!(colors("geese", "those"), "bbbgg");
        // Both guessed 'l's are in the secret, out of place.
        assert_eq!(colors("llama", "hello"), "yybbb");
        // Greens use up both 'l's before the leading one is considered.
        assert_eq!(colors("lolly", "hello"), "byggb");
        assert_eq!(colors("speed", "abide"), "bbyby");
    }

    #[test]
    fn test_table_from_words() {
        let words: Vec<String> = ["cat", "cot", "dog", "act"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let table = PatternTable::from_words(&words, &words).unwrap();
        assert_eq!(table.num_guesses(), 4);
        assert_eq!(table.num_answers(), 4);
        assert_eq!(table.solved_pattern(), 26);
        for i in 0..4 {
            assert_eq!(table.pattern_of(i, i), 26);
        }
        assert_eq!(table.row(1).len(), 4);

        let narrowed = table.narrow(&StateBitmap::full(4), 0, 1);
        assert_eq!(narrowed.iter_ones().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_table_rejects_bad_lists() {
        let guesses = vec!["cat".to_string(), "dog".to_string()];
        let long = vec!["horse".to_string()];
        assert!(PatternTable::from_words(&guesses, &long).is_err());

        let missing = vec!["cow".to_string()];
        assert!(PatternTable::from_words(&guesses, &missing).is_err());

        let six = vec!["abcdef".to_string()];
        assert!(PatternTable::from_words(&six, &six).is_err());

        assert!(PatternTable::from_codes(2, 3, vec![0; 5], 0).is_err());
    }

    #[test]
    fn test_guess_universe() {
        let answers = vec!["cat".to_string(), "cow".to_string()];
        let guesses = vec!["dog".to_string(), "cat".to_string()];
        assert_eq!(guess_universe(&answers, &guesses), vec!["dog", "cat", "cow"]);
    }

    #[test]
    fn test_load_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# answers\nCrane\n\n slate \n").unwrap();
        assert_eq!(load_words(&path).unwrap(), vec!["crane", "slate"]);

        std::fs::write(&path, "\n# nothing\n").unwrap();
        assert!(matches!(load_words(&path), Err(SolverError::Config(_))));
        assert!(matches!(
            load_words(dir.path().join("absent.txt")),
            Err(SolverError::Io(_))
        ));
    }
}
