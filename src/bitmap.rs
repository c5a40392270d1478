//! Fixed-width bit-vectors over the answer and guess universes.

use std::hash::Hasher;

use rustc_hash::FxHasher;

/// Bit-vector with a fixed logical width.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

/// Secrets still consistent with the feedback so far.
pub type StateBitmap = BitSet;

/// Candidate guesses.
pub type ActionSet = BitSet;

#[inline]
pub fn words_for(len: usize) -> usize {
    (len + 63) / 64
}

impl BitSet {
    /// All bits clear.
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0; words_for(len)],
            len,
        }
    }

    /// All `len` bits set.
    pub fn full(len: usize) -> Self {
        let mut set = Self {
            words: vec![u64::MAX; words_for(len)],
            len,
        };
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = set.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        set
    }

    /// Rebuild from raw words (e.g. a node's arena copy).
    pub fn from_words(words: &[u64], len: usize) -> Self {
        debug_assert_eq!(words.len(), words_for(len));
        Self {
            words: words.to_vec(),
            len,
        }
    }

    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::empty(len);
        for i in indices {
            set.insert(i);
        }
        set
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    #[inline]
    pub fn insert(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    #[inline]
    pub fn remove(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.words[i / 64] &= !(1u64 << (i % 64));
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn is_subset(&self, other: &BitSet) -> bool {
        self.len == other.len
            && self
                .words
                .iter()
                .zip(other.words.iter())
                .all(|(a, b)| a & !b == 0)
    }

    /// Indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(wi * 64 + bit)
            })
        })
    }

    /// Index of the `n`-th set bit (0-based).
    pub fn nth_one(&self, mut n: usize) -> Option<usize> {
        for (wi, &word) in self.words.iter().enumerate() {
            let ones = word.count_ones() as usize;
            if n < ones {
                let mut w = word;
                for _ in 0..n {
                    w &= w - 1;
                }
                return Some(wi * 64 + w.trailing_zeros() as usize);
            }
            n -= ones;
        }
        None
    }

    /// Hash that is stable across processes and builds.
    ///
    /// Stored in arena nodes and used for bucket placement, so it must not
    /// depend on per-process random state.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for &w in &self.words {
            hasher.write_u64(w);
        }
        // Fx leaves low bits weak for sparse inputs; fold the high half down
        // since bucket selection masks the low bits.
        let h = hasher.finish();
        h ^ (h >> 29) ^ (h >> 47)
    }
}
