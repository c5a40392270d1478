//! Whole-arena checkpoints.
//!
//! Format: 32-byte header, then the arena's occupied bytes `[0, mem_top)`
//! verbatim. Every cross-object reference in the image is a relative handle,
//! so the bytes are valid wherever they are copied back.
//!
//! Writes go to `<path>.tmp`, are synced, and then renamed over `path`, so an
//! interrupted save leaves the previous checkpoint intact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use memmap2::Mmap;

use crate::arena::Arena;
use crate::error::{Result, SolverError};
use crate::node::{ActionEdge, StateNode};

/// Magic bytes "WRDLCKPT".
pub const CHECKPOINT_MAGIC: u64 = u64::from_le_bytes(*b"WRDLCKPT");
pub const CHECKPOINT_VERSION: u32 = 2;

/// Binary file header.
///
/// Layout sizes guard against loading an image written by a build whose node
/// or edge layout differs.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct CheckpointHeader {
    magic: u64,
    version: u32,
    header_size: u32,
    mem_top: u64,
    node_size: u32,
    edge_size: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<CheckpointHeader>();

impl CheckpointHeader {
    fn current(mem_top: usize) -> Self {
        Self {
            magic: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            header_size: HEADER_SIZE as u32,
            mem_top: mem_top as u64,
            node_size: std::mem::size_of::<StateNode>() as u32,
            edge_size: std::mem::size_of::<ActionEdge>() as u32,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) plain integers with no padding (8+4+4+8+4+4).
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, HEADER_SIZE) }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write the arena's occupied range to `path`.
///
/// `&mut Arena` proves no episode is running, so the image is consistent.
/// Returns the number of bytes written.
pub fn save(arena: &mut Arena, path: &Path) -> Result<u64> {
    let start = Instant::now();
    let image = arena.occupied();
    let header = CheckpointHeader::current(image.len());
    let tmp = temp_path(path);

    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&tmp)?;
        let mut out = BufWriter::new(file);
        out.write_all(header.as_bytes())?;
        out.write_all(image)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|source| {
        let _ = fs::remove_file(&tmp);
        SolverError::CheckpointWrite {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let bytes = (HEADER_SIZE + image.len()) as u64;
    log::info!(
        "checkpoint: wrote {} bytes to {} in {:.2} ms",
        bytes,
        path.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(bytes)
}

/// Map a checkpoint and copy its image into a fresh arena of `capacity`
/// bytes. Locks inside the image still need rebuilding by the caller.
pub fn restore(path: &Path, capacity: usize) -> Result<Arena> {
    let start = Instant::now();
    let file = File::open(path).map_err(|e| SolverError::restore(path, e.to_string()))?;
    let len = file
        .metadata()
        .map_err(|e| SolverError::restore(path, e.to_string()))?
        .len() as usize;
    if len < HEADER_SIZE {
        return Err(SolverError::restore(
            path,
            format!("file is {len} bytes, shorter than the {HEADER_SIZE}-byte header"),
        ));
    }

    // SAFETY: the file is only read, and nothing in this process writes it
    // while mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SolverError::restore(path, e.to_string()))?;
    // SAFETY: length checked above; read_unaligned tolerates any alignment.
    let header = unsafe { std::ptr::read_unaligned(mmap.as_ptr() as *const CheckpointHeader) };
    let expected = CheckpointHeader::current(header.mem_top as usize);

    if header.magic != CHECKPOINT_MAGIC {
        return Err(SolverError::restore(
            path,
            format!("bad magic 0x{:016x}", header.magic),
        ));
    }
    if header.version != CHECKPOINT_VERSION || header.header_size != expected.header_size {
        return Err(SolverError::restore(
            path,
            format!(
                "unsupported version {} (header {} bytes)",
                header.version, header.header_size
            ),
        ));
    }
    if header.node_size != expected.node_size || header.edge_size != expected.edge_size {
        return Err(SolverError::restore(
            path,
            format!(
                "layout mismatch: node {} / edge {} bytes, this build uses {} / {}",
                header.node_size, header.edge_size, expected.node_size, expected.edge_size
            ),
        ));
    }
    let mem_top = header.mem_top as usize;
    if len != HEADER_SIZE + mem_top {
        return Err(SolverError::restore(
            path,
            format!(
                "file is {len} bytes, header promises {}",
                HEADER_SIZE + mem_top
            ),
        ));
    }
    if mem_top > capacity {
        return Err(SolverError::restore(
            path,
            format!("image of {mem_top} bytes exceeds arena capacity {capacity}"),
        ));
    }

    let arena = Arena::from_image(capacity, &mmap[HEADER_SIZE..])?;
    log::info!(
        "checkpoint: restored {} bytes from {} in {:.2} ms",
        mem_top,
        path.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(arena)
}
