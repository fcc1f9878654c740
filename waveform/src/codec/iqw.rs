//! The `.iqw` codec: a raw sequence of interleaved little-endian float32 I/Q pairs,
//! with no header, trailer, or length field. The binary substrate `.iq.tar` is built
//! on top of.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use num_complex::Complex64;

use crate::binary::deinterleave_pairs;
use crate::io::write_in_chunks;
use crate::model::{Sample, Segment};
use crate::{Error, Metadata, Result, Waveform};

use super::Codec;

/// Byte width of a single float32 I or Q component.
const ELEM_SIZE: usize = 4;
/// Byte width of one interleaved I,Q pair.
const PAIR_SIZE: usize = ELEM_SIZE * 2;

pub struct IqwCodec;

impl IqwCodec {
    fn decode(buf: &[u8]) -> Sample {
        let i_bytes = deinterleave_pairs(buf, ELEM_SIZE, 0, 0, 0);
        let q_bytes = deinterleave_pairs(buf, ELEM_SIZE, 1, 0, 0);
        i_bytes
            .chunks_exact(ELEM_SIZE)
            .zip(q_bytes.chunks_exact(ELEM_SIZE))
            .map(|(i, q)| {
                let mut i = i;
                let mut q = q;
                Complex64::new(
                    i.read_f32::<LE>().unwrap_or(0.0) as f64,
                    q.read_f32::<LE>().unwrap_or(0.0) as f64,
                )
            })
            .collect()
    }
}

impl Codec for IqwCodec {
    fn load(reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let samples = Self::decode(&buf);
        Ok(Waveform::new(vec![Segment::new(samples, Metadata::empty())]))
    }

    fn load_chunk(
        reader: &mut (impl Read + Seek + ?Sized),
        samples: usize,
        offset: usize,
    ) -> Result<Waveform> {
        reader.seek(SeekFrom::Current((offset * PAIR_SIZE) as i64))?;
        let mut buf = Vec::new();
        reader.take((samples * PAIR_SIZE) as u64).read_to_end(&mut buf)?;
        let decoded = Self::decode(&buf);
        Ok(Waveform::new(vec![Segment::new(decoded, Metadata::empty())]))
    }

    fn load_meta(_reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        Err(Error::configuration("IQW does not contain metadata"))
    }

    fn save(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()> {
        for segment in waveform.segments() {
            let mut bytes = Vec::with_capacity(segment.len() * PAIR_SIZE);
            for sample in &segment.samples {
                let scaled = sample / scale;
                bytes.write_f32::<LE>(scaled.re as f32)?;
                bytes.write_f32::<LE>(scaled.im as f32)?;
            }
            write_in_chunks(writer, &bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn save_reproduces_the_spec_identity_example() {
        let samples = vec![Complex64::new(0.2, 0.4), Complex64::new(0.6, 0.8)];
        let waveform = Waveform::new(vec![Segment::new(samples, Metadata::empty())]);
        let mut out = Vec::new();
        IqwCodec::save(&mut out, &waveform, 1.0).unwrap();

        let mut expected = Vec::new();
        for v in [0.2f32, 0.4, 0.6, 0.8] {
            expected.write_f32::<LE>(v).unwrap();
        }
        assert_eq!(out, expected);
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn load_is_the_inverse_of_save() {
        let samples = vec![Complex64::new(0.2, 0.4), Complex64::new(0.6, 0.8)];
        let waveform = Waveform::new(vec![Segment::new(samples.clone(), Metadata::empty())]);
        let mut bytes = Vec::new();
        IqwCodec::save(&mut bytes, &waveform, 1.0).unwrap();

        let loaded = IqwCodec::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.len(), 1);
        for (a, b) in loaded.segment(0).unwrap().samples.iter().zip(&samples) {
            assert!((a.re - b.re).abs() < 1e-6);
            assert!((a.im - b.im).abs() < 1e-6);
        }
    }

    #[test]
    fn load_meta_always_fails() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(IqwCodec::load_meta(&mut empty).is_err());
    }

    #[test]
    fn load_chunk_reads_a_window() {
        let samples: Vec<Complex64> =
            (0..4).map(|i| Complex64::new(i as f64, -(i as f64))).collect();
        let waveform = Waveform::new(vec![Segment::new(samples.clone(), Metadata::empty())]);
        let mut bytes = Vec::new();
        IqwCodec::save(&mut bytes, &waveform, 1.0).unwrap();

        let loaded = IqwCodec::load_chunk(&mut Cursor::new(bytes), 2, 1).unwrap();
        let got = &loaded.segment(0).unwrap().samples;
        assert_eq!(got.len(), 2);
        assert!((got[0].re - 1.0).abs() < 1e-6);
        assert!((got[1].re - 2.0).abs() < 1e-6);
    }
}
