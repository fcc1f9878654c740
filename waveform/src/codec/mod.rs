//! The codec contract every wire format satisfies, plus the three implementations.

pub mod iqtar;
pub mod iqw;
pub mod wv;

use std::io::{Read, Seek, Write};

use crate::{Result, Waveform};

/// The operations every waveform codec implements.
///
/// Implementations are unit structs (`IqwCodec`, `IqTarCodec`, `WvCodec`) rather than
/// trait objects: every call site knows its format statically, and the methods take
/// streams generically so callers can pass an in-memory buffer, a file, or any other
/// `Read`/`Write` implementation.
pub trait Codec {
    /// Reads an entire waveform (all segments/channels, full sample buffers).
    fn load(reader: &mut (impl Read + ?Sized)) -> Result<Waveform>;

    /// Reads a windowed sample range. Rejected for formats/shapes with more than one
    /// segment or channel (see each codec's own documentation).
    fn load_chunk(
        reader: &mut (impl Read + Seek + ?Sized),
        samples: usize,
        offset: usize,
    ) -> Result<Waveform>;

    /// Reads metadata only, leaving sample buffers empty.
    fn load_meta(reader: &mut (impl Read + ?Sized)) -> Result<Waveform>;

    /// Writes `waveform`, scaling each complex sample by `1/scale` (IQW/IQTAR) or
    /// quantising by `scale` (WV) as the format requires.
    fn save(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()>;
}
