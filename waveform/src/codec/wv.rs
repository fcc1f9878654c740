//! The `.wv` codec: a tag-delimited container of `{KEY:VALUE}` text tags and
//! `{KEY-N:#<binary>}` length-prefixed binary tags, terminated by the mandatory
//! `WAVEFORM`/`WWAVEFORM` sample payload. `MWV` (multi-segment) files are the same
//! container with several `MWV_SEGMENT_*` tags describing how the one payload splits.

use std::io::{Read, Seek, SeekFrom, Write};
use std::str;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use num_complex::Complex64;
use rand::Rng;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::binary::{pack_control_list, unpack_control_list, ControlColumn};
use crate::common::format_number;
use crate::dsp;
use crate::io::write_in_chunks;
use crate::model::{Sample, Segment};
use crate::{Error, Metadata, Result, Value, Waveform};

use super::Codec;

const WAVEFORM_TAG: &[u8] = b"{WAVEFORM";
const ENCRYPTED_WAVEFORM_TAG: &[u8] = b"{WWAVEFORM";
const READ_CHUNK: usize = 4096;
const SCALE_FULL_SCALE: f64 = i16::MAX as f64;

/// Every text/binary tag found while scanning a `.wv` header, before it is
/// interpreted into [`Metadata`].
#[derive(Default)]
struct ScanResult {
    /// `(normalised key, raw value)` pairs, in document order.
    text: Vec<(String, String)>,
    /// Raw packed bytes from `CONTROL LIST WIDTH4`, if present.
    control_list: Option<Vec<u8>>,
    /// `(encrypted, raw int16-pair payload)` from `WAVEFORM`/`WWAVEFORM`, if present.
    waveform: Option<(bool, Vec<u8>)>,
}

pub struct WvCodec;

impl WvCodec {
    /// Converts a little-endian interleaved int16 payload into complex samples.
    fn dequantize(payload: &[u8]) -> Sample {
        payload
            .chunks_exact(4)
            .map(|pair| {
                let i = i16::from_le_bytes([pair[0], pair[1]]);
                let q = i16::from_le_bytes([pair[2], pair[3]]);
                Complex64::new(f64::from(i) / SCALE_FULL_SCALE, f64::from(q) / SCALE_FULL_SCALE)
            })
            .collect()
    }

    /// Quantizes complex samples into a little-endian interleaved int16 payload,
    /// saturating out-of-range values the way the reference clamps before casting.
    fn quantize(samples: &[Complex64], scale: f64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            bytes.write_i16::<LE>(clamp_to_i16((sample.re * scale).round())).ok();
            bytes.write_i16::<LE>(clamp_to_i16((sample.im * scale).round())).ok();
        }
        bytes
    }
}

fn clamp_to_i16(value: f64) -> i16 {
    if value >= f64::from(i16::MAX) {
        i16::MAX
    } else if value <= f64::from(i16::MIN) {
        i16::MIN
    } else {
        value as i16
    }
}

/// Normalises a `.wv` tag name into the key `Metadata` stores it under: lowercase,
/// spaces become underscores, dots are dropped.
fn normalize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Scans a buffer for `{KEY:VALUE}` and `{KEY-N:#<binary>}` tags in a single linear
/// pass, dispatching the handful of binary tags (`WAVEFORM`/`WWAVEFORM`/
/// `CONTROL LIST WIDTH4`) and collecting everything else as text.
fn scan_tags(buf: &[u8]) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut pos = 0usize;
    while let Some(open) = find_byte(buf, pos, b'{') {
        let key_start = open + 1;
        let mut i = key_start;
        while i < buf.len() && buf[i] != b':' && buf[i] != b'-' {
            i += 1;
        }
        if i >= buf.len() {
            break;
        }
        let raw_key = str::from_utf8(&buf[key_start..i])
            .map_err(|_| Error::format("waveform tag name is not valid UTF-8"))?
            .to_owned();

        if buf[i] == b'-' {
            let (value, next) = read_binary_tag(buf, &raw_key, i)?;
            match raw_key.as_str() {
                "WAVEFORM" => result.waveform = Some((false, value)),
                "WWAVEFORM" => result.waveform = Some((true, value)),
                "CONTROL LIST WIDTH4" => result.control_list = Some(value),
                _ => {}
            }
            pos = next;
        } else {
            let value_start = i + 1;
            let value_start = if buf.get(value_start) == Some(&b' ') {
                value_start + 1
            } else {
                value_start
            };
            let Some(close) = find_byte(buf, value_start, b'}') else {
                break;
            };
            let value = str::from_utf8(&buf[value_start..close])
                .map_err(|_| Error::format("waveform tag value is not valid UTF-8"))?
                .to_owned();
            result.text.push((normalize_key(&raw_key), value));
            pos = close + 1;
        }
    }
    Ok(result)
}

/// Reads the `-N:#<N-1 bytes>}` binary form that follows a tag name at `buf[dash]`.
/// Returns the payload and the offset just past its closing brace.
fn read_binary_tag(buf: &[u8], key: &str, dash: usize) -> Result<(Vec<u8>, usize)> {
    let malformed = || {
        Error::format(format!(
            "Could not extract {key} data. Malformed {key} section because there is no \
             '}}' after binary samples."
        ))
    };
    let mut i = dash + 1;
    let digits_start = i;
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start || buf.get(i) != Some(&b':') || buf.get(i + 1) != Some(&b'#') {
        return Err(malformed());
    }
    let total_len: usize = str::from_utf8(&buf[digits_start..i])
        .unwrap()
        .parse()
        .map_err(|_| malformed())?;
    let payload_start = i + 2;
    let payload_len = total_len.saturating_sub(1);
    let payload_end = payload_start + payload_len;
    if payload_end >= buf.len() || buf[payload_end] != b'}' {
        return Err(malformed());
    }
    Ok((buf[payload_start..payload_end].to_vec(), payload_end + 1))
}

fn find_byte(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf[from..].iter().position(|&b| b == needle).map(|p| p + from)
}

/// Finds the first occurrence of `{WWAVEFORM` or `{WAVEFORM` in `buf`, reading more
/// from `reader` in fixed chunks until one appears or the stream is exhausted.
/// Matches `WWAVEFORM` first so its `W` prefix is never mistaken for `WAVEFORM`.
fn locate_waveform_tag(buf: &mut Vec<u8>, reader: &mut (impl Read + ?Sized)) -> Result<(usize, bool)> {
    loop {
        if let Some(pos) = find_subslice(buf, ENCRYPTED_WAVEFORM_TAG) {
            return Ok((pos, true));
        }
        if let Some(pos) = find_subslice(buf, WAVEFORM_TAG) {
            return Ok((pos, false));
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(Error::format("Waveform does not contain waveform tag."));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses the `-N:#` prefix immediately following a binary tag's key, returning the
/// declared byte count and how many prefix bytes (`-N:#`) were consumed.
fn parse_binary_length_prefix(rest: &[u8]) -> Result<(usize, usize)> {
    let no_count = || Error::format("Waveform does not contain WAVEFORM byte count.");
    let mut i = 0;
    if rest.first() != Some(&b'-') {
        return Err(no_count());
    }
    i += 1;
    let digits_start = i;
    while i < rest.len() && rest[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(no_count());
    }
    let n: usize = str::from_utf8(&rest[digits_start..i]).unwrap().parse().map_err(|_| no_count())?;
    if rest.get(i) != Some(&b':') || rest.get(i + 1) != Some(&b'#') {
        return Err(no_count());
    }
    Ok((n, i + 2))
}

/// Last value stored under `key`, mirroring the reference dict's overwrite-on-repeat
/// semantics for a key that appears more than once.
fn raw_get<'a>(text: &'a [(String, String)], key: &str) -> Option<&'a str> {
    text.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn parse_wv_date(value: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day];[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, &format).ok().map(PrimitiveDateTime::assume_utc)
}

fn format_wv_date(ts: OffsetDateTime) -> Result<String> {
    let format = format_description!("[year]-[month]-[day];[hour]:[minute]:[second]");
    ts.format(&format).map_err(|e| Error::format(format!("could not format DATE tag: {e}")))
}

fn parse_marker_pairs(value: &str) -> Result<Vec<(i64, i64)>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(';')
        .map(|entry| {
            let malformed = || Error::format("malformed marker list entry");
            let (a, b) = entry.split_once(':').ok_or_else(malformed)?;
            let a: i64 = a.trim().parse().map_err(|_| malformed())?;
            let b: i64 = b.trim().parse().map_err(|_| malformed())?;
            Ok((a, b))
        })
        .collect()
}

fn format_marker_pairs(pairs: &[(i64, i64)]) -> String {
    let mut sorted = pairs.to_vec();
    sorted.sort_by_key(|(sample, _)| *sample);
    sorted.iter().map(|(a, b)| format!("{a}:{b}")).collect::<Vec<_>>().join(";")
}

/// Interprets a scanned `.wv` header into [`Metadata`].
///
/// `segment_index` selects which `MWV_SEGMENT_*` override applies (`None` for a
/// single-segment waveform or a metadata-only/chunked load, which never see MWV tags
/// at all). `encryption_flag` is `None` for a metadata-only load, which never records
/// the flag (mirroring the reference facade's `meta_only` output).
fn build_meta(
    text: &[(String, String)],
    control_list: Option<&[ControlColumn]>,
    encryption_flag: Option<bool>,
    segment_index: Option<usize>,
) -> Result<Metadata> {
    let mut meta = Metadata::empty();
    let mut clock_override = None;
    let mut level_offs_override = None;
    let mut comment_override = None;
    let mut samples_override = None;

    for (key, value) in text {
        match key.as_str() {
            "mwv_segment_count" | "mwv_segment_files" => {}
            "mwv_segment_length" => {
                if let Some(idx) = segment_index {
                    if let Some(v) = value.split(',').nth(idx).and_then(|s| s.trim().parse::<i64>().ok()) {
                        samples_override = Some(v);
                    }
                }
            }
            "mwv_segment_clock" => {
                if let Some(idx) = segment_index {
                    if let Some(v) = value.split(',').nth(idx).and_then(|s| s.trim().parse::<f64>().ok()) {
                        clock_override = Some(v);
                    }
                }
            }
            "mwv_segment_level_offs" => {
                if let Some(idx) = segment_index {
                    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                    let rms = parts.get(idx * 2).and_then(|s| s.parse::<f64>().ok());
                    let peak = parts.get(idx * 2 + 1).and_then(|s| s.parse::<f64>().ok());
                    if let (Some(rms), Some(peak)) = (rms, peak) {
                        level_offs_override = Some((rms, peak));
                    }
                }
            }
            "type" => {
                let value = value.split(',').next().unwrap_or(value).trim();
                meta.set("type", Value::from(value));
            }
            "date" => {
                if let Some(ts) = parse_wv_date(value) {
                    meta.set("date", Value::Timestamp(ts));
                }
            }
            "clock" | "reflevel" | "vector_max" => {
                if let Ok(v) = value.trim().parse::<f64>() {
                    meta.set(key.clone(), Value::from(v));
                }
            }
            "samples" | "control_length" => {
                if let Ok(v) = value.trim().parse::<i64>() {
                    meta.set(key.clone(), Value::from(v));
                }
            }
            "level_offs" => {
                if let Some((rms, peak)) = value.split_once(',') {
                    if let (Ok(rms), Ok(peak)) = (rms.trim().parse::<f64>(), peak.trim().parse::<f64>()) {
                        meta.set("rms", Value::from(rms));
                        meta.set("peak", Value::from(peak));
                    }
                }
            }
            _ if key.starts_with("marker_list_") => {
                meta.set(key.clone(), Value::IntPairs(parse_marker_pairs(value)?));
            }
            _ => {
                if let Some(idx) = segment_index {
                    if key == &format!("mwv_segment{idx}_comment") {
                        comment_override = Some(value.clone());
                        continue;
                    }
                }
                if key.starts_with("mwv_segment") && key.ends_with("_comment") {
                    continue;
                }
                meta.set(key.clone(), Value::from(value.as_str()));
            }
        }
    }

    if let Some(samples) = samples_override {
        meta.set("samples", Value::from(samples));
    }
    if let Some(clock) = clock_override {
        meta.set("clock", Value::from(clock));
    }
    if let Some((rms, peak)) = level_offs_override {
        meta.set("rms", Value::from(rms));
        meta.set("peak", Value::from(peak));
    }
    if let Some(comment) = comment_override {
        meta.set("comment", Value::from(comment));
    }
    if let Some(flag) = encryption_flag {
        meta.set("encryption_flag", Value::from(flag));
    }
    if let Some(columns) = control_list {
        meta.set("control_list", Value::ControlList(columns.to_vec()));
    }

    Ok(meta)
}

/// Reads everything up to (but not including) the `WAVEFORM`/`WWAVEFORM` tag, for
/// callers that only need the header (`load_meta`).
fn read_header(reader: &mut (impl Read + ?Sized)) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let (pos, _) = locate_waveform_tag(&mut buf, reader)?;
    buf.truncate(pos);
    Ok(buf)
}

impl Codec for WvCodec {
    fn load(reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let scan = scan_tags(&buf)?;

        let samples_tag: i64 = raw_get(&scan.text, "samples")
            .ok_or_else(|| Error::format("missing mandatory SAMPLES tag"))?
            .trim()
            .parse()
            .map_err(|_| Error::format("SAMPLES tag is not a valid integer"))?;
        let (encrypted, payload) =
            scan.waveform.ok_or_else(|| Error::format("Waveform does not contain waveform tag."))?;
        let decoded = WvCodec::dequantize(&payload);

        if decoded.len() as i64 != samples_tag {
            tracing::warn!(
                reported = samples_tag,
                actual = decoded.len(),
                "SAMPLES tag does not match the decoded payload length"
            );
        }

        let control_list = scan
            .control_list
            .map(|bytes| unpack_control_list(&bytes, samples_tag.max(0) as usize));

        let segment_count: i64 = raw_get(&scan.text, "mwv_segment_count")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);

        if segment_count <= 1 {
            let meta = build_meta(&scan.text, control_list.as_deref(), Some(encrypted), None)?;
            return Ok(Waveform::new(vec![Segment::new(decoded, meta)]));
        }

        let lengths_raw = raw_get(&scan.text, "mwv_segment_length")
            .ok_or_else(|| Error::format("MWV waveform is missing MWV_SEGMENT_LENGTH"))?;
        let lengths: Vec<usize> =
            lengths_raw.split(',').map(|s| s.trim().parse().unwrap_or(0)).collect();

        let mut segments = Vec::with_capacity(segment_count as usize);
        let mut start = 0usize;
        for index in 0..segment_count as usize {
            let len = lengths.get(index).copied().unwrap_or(0);
            let clamped_start = start.min(decoded.len());
            let end = (start + len).min(decoded.len());
            let slice = decoded[clamped_start..end].to_vec();
            start += len;
            let meta = build_meta(&scan.text, control_list.as_deref(), Some(encrypted), Some(index))?;
            segments.push(Segment::new(slice, meta));
        }
        Ok(Waveform::new(segments))
    }

    fn load_chunk(
        reader: &mut (impl Read + Seek + ?Sized),
        samples: usize,
        offset: usize,
    ) -> Result<Waveform> {
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        let (tag_pos, encrypted) = locate_waveform_tag(&mut buf, reader)?;
        let tag_len = if encrypted { ENCRYPTED_WAVEFORM_TAG.len() } else { WAVEFORM_TAG.len() };

        while buf.len() < tag_pos + tag_len + 32 {
            let mut chunk = [0u8; READ_CHUNK];
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let header = &buf[..tag_pos];
        let scan = scan_tags(header)?;

        let segment_count: i64 = raw_get(&scan.text, "mwv_segment_count")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        if segment_count > 1 {
            return Err(Error::configuration(
                "chunked load is only supported for single-segment WV waveforms",
            ));
        }

        let (total_len, prefix_len) = parse_binary_length_prefix(&buf[tag_pos + tag_len..])?;
        let payload_start_abs = (tag_pos + tag_len + prefix_len) as u64;
        let available = total_len.saturating_sub(1) / 4;
        if offset + samples > available {
            return Err(Error::Range { requested: samples, offset, available });
        }

        reader.seek(SeekFrom::Start(payload_start_abs + (offset * 4) as u64))?;
        let mut window = vec![0u8; samples * 4];
        reader.read_exact(&mut window)?;
        let decoded = WvCodec::dequantize(&window);

        let samples_tag: i64 = raw_get(&scan.text, "samples")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(decoded.len() as i64);
        let control_list = scan
            .control_list
            .map(|bytes| unpack_control_list(&bytes, samples_tag.max(0) as usize));
        let meta = build_meta(&scan.text, control_list.as_deref(), Some(encrypted), None)?;
        Ok(Waveform::new(vec![Segment::new(decoded, meta)]))
    }

    fn load_meta(reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        let header = read_header(reader)?;
        let scan = scan_tags(&header)?;
        let samples_tag: i64 =
            raw_get(&scan.text, "samples").and_then(|v| v.trim().parse().ok()).unwrap_or(0);
        let control_list = scan
            .control_list
            .map(|bytes| unpack_control_list(&bytes, samples_tag.max(0) as usize));
        let meta = build_meta(&scan.text, control_list.as_deref(), None, None)?;
        Ok(Waveform::new(vec![Segment::new(Vec::new(), meta)]))
    }

    fn save(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()> {
        if waveform.is_multi_segment() {
            save_mwv(writer, waveform, scale)
        } else {
            save_single(writer, waveform, scale)
        }
    }
}

fn write_text_tag(writer: &mut (impl Write + ?Sized), key: &str, value: &str) -> Result<()> {
    write!(writer, "{{{key}:{value}}}")?;
    Ok(())
}

/// `MARKER LIST {1..4}` is the one text tag the reference writer (`_write_marker`)
/// separates from its value with `": "` rather than `":"`.
fn write_marker_tag(writer: &mut (impl Write + ?Sized), key: &str, value: &str) -> Result<()> {
    write!(writer, "{{{key}: {value}}}")?;
    Ok(())
}

fn write_binary_tag(writer: &mut (impl Write + ?Sized), key: &str, payload: &[u8]) -> Result<()> {
    write!(writer, "{{{key}-{}:#", payload.len() + 1)?;
    writer.write_all(payload)?;
    writer.write_all(b"}")?;
    Ok(())
}

fn invert(value: f64) -> f64 {
    if value == 0.0 {
        value
    } else {
        -value
    }
}

fn save_single(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()> {
    let segment = waveform.segment(0).expect("at least one segment");
    let meta = &segment.meta;

    write_text_tag(writer, "TYPE", meta.str("type").unwrap_or("SMU-WV"))?;
    write_text_tag(writer, "COPYRIGHT", meta.str("copyright").unwrap_or("Rohde & Schwarz"))?;
    write_text_tag(writer, "COMMENT", meta.str("comment").unwrap_or("Created with RsWaveform"))?;

    let rms = meta.f64("rms").unwrap_or_else(|| invert(dsp::rms_db(&segment.samples)));
    let peak = meta.f64("peak").unwrap_or_else(|| invert(dsp::peak_db(&segment.samples)));
    write_text_tag(writer, "LEVEL OFFS", &format!("{rms:.6},{peak:.6}"))?;

    write_text_tag(writer, "DATE", &format_wv_date(waveform.timestamp())?)?;

    let clock = meta.f64("clock").ok_or_else(|| Error::format("Clock is a mandatory parameter!"))?;
    write_text_tag(writer, "CLOCK", &format_number(clock))?;

    write_text_tag(writer, "SAMPLES", &segment.len().to_string())?;

    if let Some(reflevel) = meta.f64("reflevel") {
        write_text_tag(writer, "REFLEVEL", &format!("{reflevel:.6}"))?;
    }
    if let Some(control_length) = meta.i64("control_length") {
        write_text_tag(writer, "CONTROL LENGTH", &control_length.to_string())?;
    }
    if let Some(control_list) = meta.control_list() {
        write_binary_tag(writer, "CONTROL LIST WIDTH4", &pack_control_list(control_list))?;
    }
    for channel in meta.marker_channels() {
        let pairs = meta.marker_list(channel).unwrap_or_default();
        write_marker_tag(writer, &format!("MARKER LIST {channel}"), &format_marker_pairs(pairs))?;
    }

    write_empty_tag(writer)?;

    let encrypted = meta.bool("encryption_flag").unwrap_or(false);
    let tag = if encrypted { "WWAVEFORM" } else { "WAVEFORM" };
    let payload = WvCodec::quantize(&segment.samples, scale);
    write!(writer, "{{{tag}-{}:#", payload.len() + 1)?;
    write_in_chunks(writer, &payload)?;
    writer.write_all(b"}")?;
    Ok(())
}

fn write_empty_tag(writer: &mut (impl Write + ?Sized)) -> Result<()> {
    let len = rand::thread_rng().gen_range(0..=512);
    let payload = vec![b' '; len];
    write_binary_tag(writer, "EMPTYTAG", &payload)
}

fn save_mwv(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()> {
    let segments = waveform.segments();
    let base_meta = &segments[0].meta;

    write_text_tag(writer, "TYPE", "SMU-MWV")?;
    write_text_tag(writer, "COPYRIGHT", base_meta.str("copyright").unwrap_or("Rohde & Schwarz"))?;
    write_text_tag(writer, "DATE", &format_wv_date(waveform.timestamp())?)?;

    let total_samples: usize = segments.iter().map(Segment::len).sum();
    write_text_tag(writer, "SAMPLES", &total_samples.to_string())?;

    if let Some(reflevel) = base_meta.f64("reflevel") {
        write_text_tag(writer, "REFLEVEL", &format!("{reflevel:.6}"))?;
    }

    write_text_tag(writer, "MWV_SEGMENT_COUNT", &segments.len().to_string())?;

    let lengths: Vec<String> = segments.iter().map(|s| s.len().to_string()).collect();
    write_text_tag(writer, "MWV_SEGMENT_LENGTH", &lengths.join(","))?;

    let mut starts = Vec::with_capacity(segments.len());
    let mut cursor = 0usize;
    for segment in segments {
        starts.push(cursor.to_string());
        cursor += segment.len();
    }
    write_text_tag(writer, "MWV_SEGMENT_START", &starts.join(","))?;

    write_text_tag(writer, "MWV_SEGMENT_CLOCK_MODE", "UNCHANGED")?;
    write_text_tag(writer, "MWV_SEGMENT_LEVEL_MODE", "UNCHANGED")?;

    let max_clock = segments.iter().filter_map(|s| s.meta.f64("clock")).fold(0.0, f64::max);
    write_text_tag(writer, "CLOCK", &format_number(max_clock))?;

    let clocks: Vec<String> =
        segments.iter().map(|s| format_number(s.meta.f64("clock").unwrap_or(0.0))).collect();
    write_text_tag(writer, "MWV_SEGMENT_CLOCK", &clocks.join(","))?;

    let level_offs: Vec<String> = segments
        .iter()
        .flat_map(|s| [s.meta.f64("rms").unwrap_or(0.0), s.meta.f64("peak").unwrap_or(0.0)])
        .map(|v| format!("{v:.6}"))
        .collect();
    write_text_tag(writer, "MWV_SEGMENT_LEVEL_OFFS", &level_offs.join(","))?;

    for (index, segment) in segments.iter().enumerate() {
        let comment = segment.meta.str("comment").map(str::to_owned).unwrap_or_else(|| "None".to_owned());
        write_text_tag(writer, &format!("MWV_SEGMENT{index}_COMMENT"), &comment)?;
    }

    let filenames: Vec<&str> = segments.iter().filter_map(|s| s.meta.str("filename")).collect();
    if !filenames.is_empty() {
        write_text_tag(writer, "MWV_SEGMENT_FILES", &filenames.join(","))?;
    }

    write_empty_tag(writer)?;

    let encrypted = base_meta.bool("encryption_flag").unwrap_or(false);
    let tag = if encrypted { "WWAVEFORM" } else { "WAVEFORM" };
    let mut payload = Vec::with_capacity(total_samples * 4);
    for segment in segments {
        payload.extend(WvCodec::quantize(&segment.samples, scale));
    }
    write!(writer, "{{{tag}-{}:#", payload.len() + 1)?;
    write_in_chunks(writer, &payload)?;
    writer.write_all(b"}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn save_then_load_round_trips_within_quantization_tolerance() {
        let samples = vec![sample(0.25, -0.5), sample(-0.75, 0.1), sample(0.0, 0.999)];
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        let waveform = Waveform::new(vec![Segment::new(samples.clone(), meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.len(), 1);
        let got = &loaded.segment(0).unwrap().samples;
        assert_eq!(got.len(), samples.len());
        for (a, b) in got.iter().zip(&samples) {
            assert!((a.re - b.re).abs() < 1e-3);
            assert!((a.im - b.im).abs() < 1e-3);
        }
        assert_eq!(loaded.segment(0).unwrap().meta.f64("clock"), Some(1e8));
    }

    #[test]
    fn save_without_clock_fails() {
        let samples = vec![sample(0.1, 0.1)];
        let waveform = Waveform::new(vec![Segment::new(samples, Metadata::empty())]);
        let mut bytes = Vec::new();
        let err = WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap_err();
        assert!(err.to_string().contains("Clock"));
    }

    #[test]
    fn load_reports_malformed_binary_tag() {
        let data = b"{TYPE: SMU-WV}{CLOCK: 100000000.0}{SAMPLES: 1}{WAVEFORM-5:#\x00\x00\x00";
        let err = WvCodec::load(&mut Cursor::new(data.to_vec())).unwrap_err();
        assert!(err.to_string().contains("Malformed"));
        assert!(err.to_string().contains("WAVEFORM"));
    }

    #[test]
    fn sample_count_mismatch_logs_a_warning_but_still_loads() {
        let _guard = tracing_subscriber::fmt().with_test_writer().set_default();
        let data =
            b"{TYPE: SMU-WV}{CLOCK: 100000000.0}{SAMPLES: 99}{WAVEFORM-5:#\x00\x00\x00\x00}";
        let loaded = WvCodec::load(&mut Cursor::new(data.to_vec())).unwrap();
        assert_eq!(loaded.segment(0).unwrap().samples.len(), 1);
    }

    #[test]
    fn load_requires_the_waveform_tag() {
        let data = b"{TYPE: SMU-WV}{CLOCK: 100000000.0}{SAMPLES: 1}";
        let err = WvCodec::load(&mut Cursor::new(data.to_vec())).unwrap_err();
        assert!(err.to_string().contains("waveform tag"));
    }

    #[test]
    fn mwv_round_trip_splits_segments_by_length() {
        let seg0 = vec![sample(0.1, 0.1), sample(0.2, 0.2)];
        let seg1 = vec![sample(0.3, 0.3), sample(0.4, 0.4), sample(0.5, 0.5)];
        let mut meta0 = Metadata::wv_defaults();
        meta0.set("clock", Value::from(1e8));
        let mut meta1 = Metadata::wv_defaults();
        meta1.set("clock", Value::from(2e8));

        let waveform = Waveform::new(vec![
            Segment::new(seg0.clone(), meta0),
            Segment::new(seg1.clone(), meta1),
        ]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.segment(0).unwrap().samples.len(), seg0.len());
        assert_eq!(loaded.segment(1).unwrap().samples.len(), seg1.len());
    }

    #[test]
    fn load_chunk_reads_a_window_without_the_full_payload() {
        let samples: Vec<Complex64> = (0..8).map(|i| sample(i as f64 / 10.0, 0.0)).collect();
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        let waveform = Waveform::new(vec![Segment::new(samples.clone(), meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load_chunk(&mut Cursor::new(bytes), 3, 2).unwrap();
        let got = &loaded.segment(0).unwrap().samples;
        assert_eq!(got.len(), 3);
        for (a, b) in got.iter().zip(&samples[2..5]) {
            assert!((a.re - b.re).abs() < 1e-3);
        }
    }

    #[test]
    fn load_chunk_out_of_range_is_an_error() {
        let samples = vec![sample(0.1, 0.1); 4];
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        let waveform = Waveform::new(vec![Segment::new(samples, meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let err = WvCodec::load_chunk(&mut Cursor::new(bytes), 3, 3).unwrap_err();
        assert!(matches!(err, Error::Range { .. }));
    }

    #[test]
    fn load_meta_leaves_samples_empty_and_omits_encryption_flag() {
        let samples = vec![sample(0.1, 0.1); 4];
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        let waveform = Waveform::new(vec![Segment::new(samples, meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load_meta(&mut Cursor::new(bytes)).unwrap();
        let meta = &loaded.segment(0).unwrap().meta;
        assert!(loaded.segment(0).unwrap().samples.is_empty());
        assert_eq!(meta.bool("encryption_flag"), None);
        assert_eq!(meta.f64("clock"), Some(1e8));
    }

    #[test]
    fn marker_lists_round_trip_sorted_by_sample_index() {
        let samples = vec![sample(0.1, 0.1); 4];
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        meta.set_marker_list(1, vec![(3, 1), (1, 1)]);
        let waveform = Waveform::new(vec![Segment::new(samples, meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load(&mut Cursor::new(bytes)).unwrap();
        let markers = loaded.segment(0).unwrap().meta.marker_list(1).unwrap();
        assert_eq!(markers, vec![(1, 1), (3, 1)]);
    }

    /// A single-segment `.wv` carrying a marker list and a control list, in the shape
    /// of the `dummy.wv` scenario: 64 samples, `clock = 1e8`, `type = SMU-WV`, marker
    /// channel 1 set at samples 0, 32, and 63, and a 4-row control list the width of
    /// the sample buffer.
    #[test]
    fn single_segment_round_trips_markers_and_control_list() {
        let samples: Vec<Complex64> = (0..64).map(|i| sample(i as f64 / 100.0, 0.0)).collect();
        let mut meta = Metadata::wv_defaults();
        meta.set("clock", Value::from(1e8));
        meta.set_marker_list(1, vec![(0, 1), (32, 0), (63, 0)]);
        let control: Vec<ControlColumn> = (0..64).map(|i| [i % 2 == 0; 4]).collect();
        meta.set("control_list", Value::ControlList(control.clone()));
        meta.set("control_length", Value::from(64i64));
        let waveform = Waveform::new(vec![Segment::new(samples, meta)]);

        let mut bytes = Vec::new();
        WvCodec::save(&mut bytes, &waveform, SCALE_FULL_SCALE).unwrap();

        let loaded = WvCodec::load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(loaded.len(), 1);
        let segment = loaded.segment(0).unwrap();
        assert_eq!(segment.meta.str("type"), Some("SMU-WV"));
        assert_eq!(segment.meta.f64("clock"), Some(1e8));
        assert_eq!(segment.meta.marker_list(1).unwrap(), vec![(0, 1), (32, 0), (63, 0)]);
        assert_eq!(segment.meta.control_list().unwrap().len(), 64);
        assert_eq!(segment.meta.control_list().unwrap(), control.as_slice());
    }
}
