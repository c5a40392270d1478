//! Transposition table from belief-state to search node.
//!
//! Every distinct bitmap maps to exactly one `StateNode`, however many move
//! orders reach it. Buckets are a power-of-two array of chain heads stored in
//! the arena right after the `TableHeader`; the lock strip guarding them is
//! process-local and simply rebuilt on open. Entries are never removed.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::arena::{Arena, Persistable};
use crate::bitmap::StateBitmap;
use crate::error::{Result, SolverError};
use crate::handle::RelHandle;
use crate::node::StateNode;

/// Identifies an arena whose first allocation is a state table.
pub const TABLE_MAGIC: u64 = u64::from_le_bytes(*b"WRDLTBL1");

/// Persistent table metadata at arena offset 0.
#[repr(C)]
pub struct TableHeader {
    magic: u64,
    table_size: u64,
    num_answers: u64,
    num_guesses: u64,
    node_count: AtomicU64,
    episodes: AtomicU64,
    buckets: RelHandle<RelHandle<StateNode>>,
    root: RelHandle<StateNode>,
}

unsafe impl Persistable for TableHeader {}

impl TableHeader {
    pub fn table_size(&self) -> usize {
        self.table_size as usize
    }

    pub fn num_answers(&self) -> usize {
        self.num_answers as usize
    }

    pub fn num_guesses(&self) -> usize {
        self.num_guesses as usize
    }
}

/// Concurrent append-only map from bitmap to node.
pub struct StateTable {
    table_mask: u64,
    lock_mask: u64,
    locks: Box<[Mutex<()>]>,
    /// Lookup statistics (process-local, not persisted)
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StateTable {
    /// Lay out a fresh table at the start of an empty arena.
    pub fn create(
        arena: &Arena,
        table_size_exp: u32,
        lock_count_exp: u32,
        num_answers: usize,
        num_guesses: usize,
    ) -> Result<Self> {
        if arena.used() != 0 {
            return Err(SolverError::Config(
                "state table must be the first allocation in its arena".into(),
            ));
        }
        let table_size = 1usize << table_size_exp;
        let header = arena.allocate(TableHeader {
            magic: TABLE_MAGIC,
            table_size: table_size as u64,
            num_answers: num_answers as u64,
            num_guesses: num_guesses as u64,
            node_count: AtomicU64::new(0),
            episodes: AtomicU64::new(0),
            buckets: RelHandle::null(),
            root: RelHandle::null(),
        })?;
        let buckets = arena.allocate_slice::<RelHandle<StateNode>>(table_size)?;
        header.buckets.set(buckets.first());

        Ok(Self::with_masks(table_size_exp, lock_count_exp))
    }

    /// Attach to a table already present in `arena` (after a restore).
    ///
    /// `origin` only labels errors.
    pub fn open(
        arena: &Arena,
        lock_count_exp: u32,
        num_answers: usize,
        num_guesses: usize,
        origin: &Path,
    ) -> Result<Self> {
        if arena.used() < std::mem::size_of::<TableHeader>() {
            return Err(SolverError::restore(origin, "image too small for a table header"));
        }
        // SAFETY: size checked above; `TableHeader` is valid for any bytes
        // that passed the magic check below, and all-zero otherwise.
        let header: &TableHeader = unsafe { arena.get_at(0) };
        if header.magic != TABLE_MAGIC {
            return Err(SolverError::restore(origin, "table magic mismatch"));
        }
        let table_size = header.table_size();
        if !table_size.is_power_of_two() {
            return Err(SolverError::restore(
                origin,
                format!("table size {table_size} is not a power of two"),
            ));
        }
        if header.num_answers() != num_answers || header.num_guesses() != num_guesses {
            return Err(SolverError::restore(
                origin,
                format!(
                    "checkpoint was built for {} answers x {} guesses, current word lists have {} x {}",
                    header.num_answers(),
                    header.num_guesses(),
                    num_answers,
                    num_guesses
                ),
            ));
        }
        let nodes = Self::check_image(arena, num_answers, num_guesses)
            .map_err(|reason| SolverError::restore(origin, reason))?;
        log::debug!("checked {nodes} nodes in {table_size} buckets");

        let table_size_exp = table_size.trailing_zeros();
        Ok(Self::with_masks(table_size_exp, lock_count_exp.min(table_size_exp)))
    }

    /// Walk every chain of a restored image through raw byte offsets,
    /// checking each handle before it is followed. Returns the nodes seen.
    fn check_image(
        arena: &Arena,
        num_answers: usize,
        num_guesses: usize,
    ) -> std::result::Result<u64, String> {
        use std::mem::{offset_of, size_of};

        // SAFETY: the caller checked the image holds a header; every field
        // is an integer or atomic, valid for any bytes.
        let header: &TableHeader = unsafe { arena.get_at(0) };
        let table_size = header.table_size();
        let buckets = RelHandle::<RelHandle<StateNode>>::target_in(
            arena,
            offset_of!(TableHeader, buckets),
            table_size,
        )?
        .ok_or("bucket array missing")?;

        let limit = header
            .node_count
            .load(Ordering::Relaxed)
            .min((arena.used() / size_of::<StateNode>()) as u64);
        let mut seen = 0u64;
        for i in 0..table_size {
            let head = buckets + i * size_of::<RelHandle<StateNode>>();
            let mut cursor = RelHandle::<StateNode>::target_in(arena, head, 1)?;
            while let Some(at) = cursor {
                seen += 1;
                if seen > limit {
                    return Err(format!("chains hold more than the {limit} recorded nodes"));
                }
                cursor = StateNode::check_image(arena, at, num_answers, num_guesses)?;
            }
        }

        if let Some(root) = RelHandle::<StateNode>::target_in(arena, offset_of!(TableHeader, root), 1)? {
            StateNode::check_image(arena, root, num_answers, num_guesses)?;
        }
        Ok(seen)
    }

    fn with_masks(table_size_exp: u32, lock_count_exp: u32) -> Self {
        debug_assert!(lock_count_exp <= table_size_exp);
        let num_locks = 1usize << lock_count_exp;
        Self {
            table_mask: (1u64 << table_size_exp) - 1,
            lock_mask: (num_locks as u64) - 1,
            locks: (0..num_locks).map(|_| Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    fn header<'a>(&self, arena: &'a Arena) -> &'a TableHeader {
        // SAFETY: `create` placed the header at offset 0, or `open` verified it.
        unsafe { arena.get_at(0) }
    }

    fn buckets<'a>(&self, arena: &'a Arena) -> &'a [RelHandle<StateNode>] {
        let header = self.header(arena);
        // SAFETY: `buckets` points at an arena array of `table_size` heads.
        unsafe { header.buckets.slice(header.table_size()) }.unwrap_or(&[])
    }

    pub fn table_size(&self) -> usize {
        (self.table_mask + 1) as usize
    }

    pub fn num_locks(&self) -> usize {
        self.locks.len()
    }

    /// Walk one chain looking for an exact bitmap match.
    fn scan<'a>(head: &'a RelHandle<StateNode>, hash: u64, words: &[u64]) -> Option<&'a StateNode> {
        let mut cursor = head.get();
        while let Some(node) = cursor {
            if node.hash() == hash && node.bitmap_words() == words {
                return Some(node);
            }
            cursor = node.next_in_bucket();
        }
        None
    }

    /// The node for `bitmap`, created with status `None` on first sight.
    ///
    /// Scanning and insertion happen under the bucket's strip lock, so two
    /// threads racing on the same bitmap always end up with the same node.
    pub fn get_or_create<'a>(&self, arena: &'a Arena, bitmap: &StateBitmap) -> Result<&'a StateNode> {
        let hash = bitmap.stable_hash();
        let buckets = self.buckets(arena);
        let head = &buckets[(hash & self.table_mask) as usize];

        let _guard = self.locks[(hash & self.lock_mask) as usize].lock();
        if let Some(node) = Self::scan(head, hash, bitmap.words()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(node);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let words = arena.allocate_copy(bitmap.words())?;
        let node = arena.allocate(StateNode::new(hash, bitmap.count(), words.len()))?;
        node.link_bits(words);
        node.next.set(head.get());
        head.set(Some(node));
        self.header(arena).node_count.fetch_add(1, Ordering::Relaxed);
        Ok(node)
    }

    /// Lookup without insertion.
    pub fn find<'a>(&self, arena: &'a Arena, bitmap: &StateBitmap) -> Option<&'a StateNode> {
        let hash = bitmap.stable_hash();
        let head = &self.buckets(arena)[(hash & self.table_mask) as usize];
        let _guard = self.locks[(hash & self.lock_mask) as usize].lock();
        Self::scan(head, hash, bitmap.words())
    }

    pub fn root<'a>(&self, arena: &'a Arena) -> Option<&'a StateNode> {
        self.header(arena).root.get()
    }

    pub(crate) fn set_root(&self, arena: &Arena, node: &StateNode) {
        self.header(arena).root.set(Some(node));
    }

    /// Nodes ever created in this table (persisted).
    pub fn node_count(&self, arena: &Arena) -> u64 {
        self.header(arena).node_count.load(Ordering::Relaxed)
    }

    /// Episodes completed across all runs (persisted).
    pub fn episodes(&self, arena: &Arena) -> u64 {
        self.header(arena).episodes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_episodes(&self, arena: &Arena, n: u64) {
        self.header(arena).episodes.fetch_add(n, Ordering::Relaxed);
    }

    /// Lookup statistics since this process opened the table: (hits, misses).
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.stats();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Visit every node, buckets in parallel.
    ///
    /// Chains are read without their strip locks, so callers must not race
    /// this against insertions they care about observing.
    pub fn for_each_node<'a, F>(&self, arena: &'a Arena, f: F)
    where
        F: Fn(&'a StateNode) + Sync + Send,
    {
        self.buckets(arena).par_iter().for_each(|head| {
            let mut cursor = head.get();
            while let Some(node) = cursor {
                f(node);
                cursor = node.next_in_bucket();
            }
        });
    }

    /// Rebuild every node and edge mutex after the arena image was copied in.
    ///
    /// Mutex internals from the previous process are never trusted; the
    /// guarded data is carried over. Returns `(nodes, edges)` reinitialized.
    pub fn reinitialize_locks(&self, arena: &mut Arena) -> (u64, u64) {
        let arena: &Arena = arena;
        let nodes = AtomicU64::new(0);
        let edges = AtomicU64::new(0);
        self.for_each_node(arena, |node| {
            // SAFETY: the caller holds the arena exclusively, so no guard or
            // borrow of these locks exists anywhere.
            unsafe { rebuild_lock(&node.stats) };
            for edge in node.edges() {
                unsafe { rebuild_lock(&edge.stats) };
            }
            nodes.fetch_add(1, Ordering::Relaxed);
            edges.fetch_add(node.edges().len() as u64, Ordering::Relaxed);
        });
        (nodes.into_inner(), edges.into_inner())
    }
}

/// Replace a mutex in place with a fresh, unlocked one holding the same data.
///
/// # Safety
/// No other thread may touch `lock` for the duration of the call.
unsafe fn rebuild_lock<T: Copy>(lock: &Mutex<T>) {
    let data = lock.data_ptr().read();
    (lock as *const Mutex<T> as *mut Mutex<T>).write(Mutex::new(data));
}

impl std::fmt::Debug for StateTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTable")
            .field("table_size", &self.table_size())
            .field("num_locks", &self.num_locks())
            .field("stats", &self.stats())
            .finish()
    }
}
