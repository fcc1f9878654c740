//! The `.iq.tar` codec: a POSIX tar archive pairing an XML sidecar with a headerless
//! `.iqw`-style float32 payload.

use std::io::{Cursor, Read, Seek, Write};
use std::str;

use quick_xml::events::Event;
use quick_xml::Reader;
use tar::{Builder, Header};

use crate::common::{format_number, parse_datetime};
use crate::model::{Sample, Segment, Value};
use crate::{Error, Metadata, Result, Waveform};

use super::iqw::IqwCodec;
use super::Codec;

const FIXED_XML_NAME: &str = "data.xml";
const FIXED_BINARY_NAME: &str = "data.complex.1ch.float32";

/// Recognised `<Clock unit="Hz">…`-style XML paths, mirroring the reference loader's
/// allow-list. The tuple is `(element path, metadata key, has a "unit" attribute)`.
const ALLOWED_TAGS: &[(&str, &str, bool)] = &[
    ("Clock", "clock", true),
    ("DataFilename", "datafilename", false),
    ("Samples", "samples", false),
    ("ScalingFactor", "scalingfactor", true),
    ("NumberOfChannels", "numberofchannels", false),
    ("DataType", "datatype", false),
    ("Format", "format", false),
    ("Name", "name", false),
    ("Comment", "comment", false),
    ("DateTime", "datetime", false),
    (
        "UserData/RohdeSchwarz/SpectrumAnalyzer/CenterFrequency",
        "center_frequency",
        true,
    ),
];

struct XmlField {
    value: String,
    unit: Option<String>,
}

pub struct IqTarCodec;

impl IqTarCodec {
    fn write_xml(
        writer: &mut (impl Write + ?Sized),
        waveform: &Waveform,
        data_filename: &str,
    ) -> Result<()> {
        let segment = waveform.segment(0).expect("waveform has at least one segment");
        let meta = &segment.meta;
        writer.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
        writer.write_all(
            b"<?xml-stylesheet type=\"text/xsl\" \
              href=\"open_IqTar_xml_file_in_web_browser.xslt\"?>\n",
        )?;
        writer.write_all(
            b"<RS_IQ_TAR_FileFormat fileFormatVersion=\"2\" \
              xsi:noNamespaceSchemaLocation=\
              \"http://www.rohde-schwarz.com/file/RsIqTar.xsd\" \
              xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
        )?;
        writer.write_all(b"<Name>waveform iq.tar Writer</Name>\n")?;
        let format = time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]"
        );
        let timestamp = waveform
            .timestamp()
            .format(format)
            .map_err(|e| Error::format(format!("could not format timestamp: {e}")))?;
        write!(writer, "<DateTime>{timestamp}</DateTime>\n")?;
        let comment = meta.str("comment").unwrap_or("Created with RsWaveform");
        write!(writer, "<Comment>{comment}</Comment>\n")?;
        write!(writer, "<Samples>{}</Samples>\n", segment.len())?;
        let clock = meta
            .f64("clock")
            .ok_or_else(|| Error::format("Clock is a mandatory parameter!"))?;
        write!(writer, "<Clock unit=\"Hz\">{}</Clock>\n", format_number(clock))?;
        writer.write_all(b"<Format>complex</Format>\n")?;
        writer.write_all(b"<DataType>float32</DataType>\n")?;
        let scaling = meta.f64("scalingfactor").unwrap_or(1.0);
        write!(
            writer,
            "<ScalingFactor unit=\"V\">{}</ScalingFactor>\n",
            format_number(scaling)
        )?;
        write!(writer, "<DataFilename>{data_filename}</DataFilename>\n")?;
        write!(writer, "<NumberOfChannels>{}</NumberOfChannels>\n", waveform.len())?;
        if let Some(cf) = meta.f64("center_frequency") {
            if cf != 0.0 {
                write!(
                    writer,
                    "<UserData><RohdeSchwarz><SpectrumAnalyzer><CenterFrequency \
                     unit=\"Hz\">{}</CenterFrequency></SpectrumAnalyzer></RohdeSchwarz>\
                     </UserData>\n",
                    format_number(cf)
                )?;
            }
        }
        writer.write_all(b"</RS_IQ_TAR_FileFormat>\n")?;
        Ok(())
    }

    fn parse_xml(bytes: &[u8]) -> Result<std::collections::HashMap<String, XmlField>> {
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut current_text = String::new();
        let mut current_unit: Option<String> = None;
        let mut fields = std::collections::HashMap::new();
        loop {
            match reader.read_event_into(&mut buf).map_err(|e| Error::format(e.to_string()))? {
                Event::Start(e) => {
                    let name = str::from_utf8(e.name().into_inner())
                        .map_err(|e| Error::format(e.to_string()))?
                        .to_owned();
                    let mut unit = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| Error::format(e.to_string()))?;
                        if attr.key.into_inner() == b"unit" {
                            unit = Some(
                                attr.unescape_value()
                                    .map_err(|e| Error::format(e.to_string()))?
                                    .into_owned(),
                            );
                        }
                    }
                    path.push(name);
                    current_text.clear();
                    current_unit = unit;
                }
                Event::Text(t) => {
                    current_text.push_str(
                        &t.unescape().map_err(|e| Error::format(e.to_string()))?,
                    );
                }
                Event::End(_) => {
                    let full_path = path.join("/");
                    fields.insert(
                        full_path,
                        XmlField { value: current_text.clone(), unit: current_unit.clone() },
                    );
                    path.pop();
                    current_text.clear();
                    current_unit = None;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(fields)
    }

    fn meta_from_fields(fields: &std::collections::HashMap<String, XmlField>) -> Result<Metadata> {
        let mut meta = Metadata::empty();
        for (path, key, _) in ALLOWED_TAGS {
            let Some(field) = fields.get(*path) else { continue };
            match *key {
                "clock" => meta.set("clock", field.value.parse::<f64>().unwrap_or(0.0).into()),
                "numberofchannels" => {
                    meta.set("numberofchannels", field.value.parse::<i64>().unwrap_or(1).into())
                }
                "scalingfactor" => {
                    let value: f64 = field.value.parse().unwrap_or(1.0);
                    if let Some(unit) = &field.unit {
                        if unit != "V" {
                            return Err(Error::format(format!(
                                "unsupported ScalingFactor unit: {unit}"
                            )));
                        }
                    }
                    meta.set("scalingfactor", value.into());
                }
                "center_frequency" => {
                    meta.set("center_frequency", field.value.parse::<f64>().unwrap_or(0.0).into())
                }
                "datetime" => {
                    if let Some(date) = parse_datetime(&field.value) {
                        meta.set("date", Value::Timestamp(date));
                    }
                }
                _ => meta.set(*key, field.value.clone().into()),
            }
        }
        Ok(meta)
    }

    /// Decodes a raw interleaved-float32 payload by delegating to the `.iqw` codec,
    /// which uses the identical wire layout.
    fn decode_payload(bytes: &[u8]) -> Result<Sample> {
        let waveform = IqwCodec::load(&mut Cursor::new(bytes))?;
        Ok(waveform.segments()[0].samples.clone())
    }

    fn extract_tar_members(reader: &mut (impl Read + ?Sized)) -> Result<(Vec<u8>, String, Vec<u8>)> {
        let mut archive = tar::Archive::new(reader);
        let mut xml_bytes = None;
        let mut binary_bytes = None;
        let mut binary_name = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            if path.to_lowercase().contains(".xml") {
                xml_bytes = Some(data);
            } else {
                binary_name = Some(path);
                binary_bytes = Some(data);
            }
        }
        let xml_bytes =
            xml_bytes.ok_or_else(|| Error::format("archive does not contain an XML member"))?;
        let binary_bytes = binary_bytes
            .ok_or_else(|| Error::format("archive does not contain a binary payload member"))?;
        Ok((xml_bytes, binary_name.unwrap_or_default(), binary_bytes))
    }
}

impl Codec for IqTarCodec {
    fn load(reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        let (xml_bytes, _binary_name, binary_bytes) = Self::extract_tar_members(reader)?;
        let fields = Self::parse_xml(&xml_bytes)?;
        let meta = Self::meta_from_fields(&fields)?;
        let scaling = meta.f64("scalingfactor").unwrap_or(1.0);
        let channels = meta.i64("numberofchannels").unwrap_or(1).max(1) as usize;

        let samples = Self::decode_payload(&binary_bytes)?;
        let scaled: Sample = if scaling != 1.0 {
            samples.iter().map(|s| s * scaling).collect()
        } else {
            samples
        };

        let per_channel = scaled.len() / channels;
        let segments = (0..channels)
            .map(|ch| {
                let start = ch * per_channel;
                let end = start + per_channel;
                Segment::new(scaled[start..end].to_vec(), meta.clone())
            })
            .collect();
        Ok(Waveform::new(segments))
    }

    fn load_chunk(
        reader: &mut (impl Read + Seek + ?Sized),
        samples: usize,
        offset: usize,
    ) -> Result<Waveform> {
        let (xml_bytes, _binary_name, binary_bytes) = Self::extract_tar_members(reader)?;
        let fields = Self::parse_xml(&xml_bytes)?;
        let meta = Self::meta_from_fields(&fields)?;
        let channels = meta.i64("numberofchannels").unwrap_or(1).max(1) as usize;
        if channels > 1 {
            return Err(Error::configuration(
                "chunked load is only supported for single-channel IQTAR archives",
            ));
        }
        let scaling = meta.f64("scalingfactor").unwrap_or(1.0);
        let window = &binary_bytes[(offset * 8).min(binary_bytes.len())..];
        let window = &window[..(samples * 8).min(window.len())];
        let decoded = Self::decode_payload(window)?;
        let scaled: Sample = if scaling != 1.0 {
            decoded.iter().map(|s| s * scaling).collect()
        } else {
            decoded
        };
        Ok(Waveform::new(vec![Segment::new(scaled, meta)]))
    }

    fn load_meta(reader: &mut (impl Read + ?Sized)) -> Result<Waveform> {
        let mut archive = tar::Archive::new(reader);
        let mut xml_bytes = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            if path.to_lowercase().contains(".xml") {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                xml_bytes = Some(data);
                break;
            }
        }
        let xml_bytes =
            xml_bytes.ok_or_else(|| Error::format("archive does not contain an XML member"))?;
        let fields = Self::parse_xml(&xml_bytes)?;
        let meta = Self::meta_from_fields(&fields)?;
        Ok(Waveform::new(vec![Segment::new(Vec::new(), meta)]))
    }

    fn save(writer: &mut (impl Write + ?Sized), waveform: &Waveform, scale: f64) -> Result<()> {
        let mut binary_bytes = Vec::new();
        IqwCodec::save(&mut binary_bytes, waveform, scale)?;
        let mut xml_bytes = Vec::new();
        Self::write_xml(&mut xml_bytes, waveform, FIXED_BINARY_NAME)?;

        let mut builder = Builder::new(writer);
        append_member(&mut builder, FIXED_BINARY_NAME, &binary_bytes)?;
        append_member(&mut builder, FIXED_XML_NAME, &xml_bytes)?;
        builder.finish()?;
        Ok(())
    }
}

impl IqTarCodec {
    /// Saves to a path, deriving the archive member names from the path's file stem
    /// (`<stem>.xml`, `<stem>.complex.1ch.float32`) instead of the fixed `data.*`
    /// names [`Codec::save`] uses for a non-path stream.
    pub fn save_path(path: &std::path::Path, waveform: &Waveform, scale: f64) -> Result<()> {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("data");
        let binary_name = format!("{stem}.complex.1ch.float32");
        let xml_name = format!("{stem}.xml");

        let mut binary_bytes = Vec::new();
        IqwCodec::save(&mut binary_bytes, waveform, scale)?;
        let mut xml_bytes = Vec::new();
        Self::write_xml(&mut xml_bytes, waveform, &binary_name)?;

        let file = std::fs::File::create(path)?;
        let mut builder = Builder::new(file);
        append_member(&mut builder, &binary_name, &binary_bytes)?;
        append_member(&mut builder, &xml_name, &xml_bytes)?;
        builder.finish()?;
        Ok(())
    }
}

fn append_member(
    builder: &mut Builder<impl Write>,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use num_complex::Complex64;

    use super::*;
    use crate::model::Segment;

    fn sample_waveform() -> Waveform {
        let mut meta = Metadata::iqtar_defaults();
        meta.set("clock", 1e8.into());
        let samples = vec![Complex64::new(0.5, 0.25); 4];
        Waveform::new(vec![Segment::new(samples, meta)])
    }

    #[test]
    fn save_then_load_round_trips_single_channel() {
        let waveform = sample_waveform();
        let mut archive = Vec::new();
        IqTarCodec::save(&mut archive, &waveform, 1.0).unwrap();

        let loaded = IqTarCodec::load(&mut Cursor::new(archive)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.segment(0).unwrap().len(), 4);
    }

    #[test]
    fn save_then_load_round_trips_two_channels() {
        let mut meta = Metadata::iqtar_defaults();
        meta.set("clock", 1e8.into());
        let samples = vec![Complex64::new(0.1, 0.2); 4];
        let waveform = Waveform::new(vec![
            Segment::new(samples.clone(), meta.clone()),
            Segment::new(samples, meta),
        ]);
        let mut archive = Vec::new();
        IqTarCodec::save(&mut archive, &waveform, 1.0).unwrap();

        let loaded = IqTarCodec::load(&mut Cursor::new(archive)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.segment(0).unwrap().len(), loaded.segment(1).unwrap().len());
    }

    #[test]
    fn load_meta_leaves_samples_empty() {
        let waveform = sample_waveform();
        let mut archive = Vec::new();
        IqTarCodec::save(&mut archive, &waveform, 1.0).unwrap();

        let loaded = IqTarCodec::load_meta(&mut Cursor::new(archive)).unwrap();
        assert!(loaded.segment(0).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_volt_scaling_factor_unit() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<RS_IQ_TAR_FileFormat fileFormatVersion="2">
<Clock unit="Hz">100000000.0</Clock>
<ScalingFactor unit="dBm">1.0</ScalingFactor>
</RS_IQ_TAR_FileFormat>"#;
        let err = IqTarCodec::meta_from_fields(&IqTarCodec::parse_xml(xml).unwrap());
        assert!(err.is_err());
    }
}
