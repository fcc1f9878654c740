//! Bulk-payload I/O helpers shared by all three codecs.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::Result;

/// Block size used when streaming a large payload out to a writer.
///
/// Mirrors the reference implementation's 82,000,000-byte blocks for `.wv` and `.iqw`
/// payload writes. The value only bounds peak memory; the resulting byte stream is
/// identical to a single unchunked write.
pub const CHUNK_SIZE: usize = 82_000_000;

/// Writes `bytes` to `writer` in [`CHUNK_SIZE`]-sized blocks.
pub fn write_in_chunks(writer: &mut (impl Write + ?Sized), bytes: &[u8]) -> io::Result<()> {
    for chunk in bytes.chunks(CHUNK_SIZE) {
        writer.write_all(chunk)?;
    }
    Ok(())
}

/// Opens `path` for reading.
///
/// Every codec method takes its stream generically (`impl Read`/`impl Write`), so a
/// caller that already has an open stream just passes it directly; this only covers
/// the "open it from a path" half of the reference implementation's file-handle
/// adapter, which also accepted an already-open file object interchangeably.
pub fn open_read(path: impl AsRef<Path>) -> Result<File> {
    Ok(File::open(path)?)
}

/// Opens `path` for writing, truncating or creating it as needed.
pub fn open_write(path: impl AsRef<Path>) -> Result<File> {
    Ok(File::create(path)?)
}
