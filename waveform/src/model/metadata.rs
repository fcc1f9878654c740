use crate::binary::ControlColumn;

use super::Value;

/// An ordered, string-keyed attribute bag.
///
/// Reimplements the reference implementation's dict-backed metadata object: a tagged
/// metadata record per format ([`Metadata::wv_defaults`], [`Metadata::iqtar_defaults`])
/// plus a typed-accessor view over an explicit map, so unrecognised keys a caller sets
/// round-trip unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    items: Vec<(String, Value)>,
}

impl Metadata {
    /// An empty metadata bag with no defaults applied.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Defaults applied to a freshly-constructed WV segment.
    ///
    /// Mirrors `META_WV_DEFAULTS`: `type = SMU-WV`, `copyright = Rohde & Schwarz`,
    /// `comment = Created with RsWaveform`, `clock = 1e9`. `marker`, `control_length`,
    /// `control_list`, `rms`, `peak`, `samples`, and `reflevel` default to absent.
    pub fn wv_defaults() -> Self {
        let mut meta = Self::empty();
        meta.set("type", Value::from("SMU-WV"));
        meta.set("copyright", Value::from("Rohde & Schwarz"));
        meta.set("comment", Value::from("Created with RsWaveform"));
        meta.set("clock", Value::from(1e9));
        meta
    }

    /// Defaults applied to a freshly-constructed IQTAR segment.
    ///
    /// Mirrors `META_IQTAR_DEFAULTS`: `center_frequency = 1e9`,
    /// `comment = Created with RsWaveform`, `clock = 1e9`, `scalingfactor = 1`.
    pub fn iqtar_defaults() -> Self {
        let mut meta = Self::empty();
        meta.set("center_frequency", Value::from(1e9));
        meta.set("comment", Value::from("Created with RsWaveform"));
        meta.set("clock", Value::from(1e9));
        meta.set("scalingfactor", Value::from(1.0));
        meta
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.items.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.items.iter().position(|(k, _)| k == key)?;
        Some(self.items.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn control_list(&self) -> Option<&[ControlColumn]> {
        self.get("control_list").and_then(Value::as_control_list)
    }

    /// The marker list for marker channel `index` (1..=4), if set.
    pub fn marker_list(&self, index: u8) -> Option<&[(i64, i64)]> {
        self.get(&marker_key(index)).and_then(Value::as_int_pairs)
    }

    pub fn set_marker_list(&mut self, index: u8, pairs: Vec<(i64, i64)>) {
        self.set(marker_key(index), Value::IntPairs(pairs));
    }

    /// Marker channels 1..=4 that have a non-empty list set, in channel order.
    pub fn marker_channels(&self) -> Vec<u8> {
        (1..=4)
            .filter(|&i| matches!(self.marker_list(i), Some(list) if !list.is_empty()))
            .collect()
    }
}

fn marker_key(index: u8) -> String {
    format!("marker_list_{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wv_defaults_match_the_reference_table() {
        let meta = Metadata::wv_defaults();
        assert_eq!(meta.str("type"), Some("SMU-WV"));
        assert_eq!(meta.str("copyright"), Some("Rohde & Schwarz"));
        assert_eq!(meta.f64("clock"), Some(1e9));
        assert_eq!(meta.f64("rms"), None);
    }

    #[test]
    fn unrecognised_keys_round_trip() {
        let mut meta = Metadata::empty();
        meta.set("custom_tag", Value::from("value"));
        assert_eq!(meta.str("custom_tag"), Some("value"));
    }

    #[test]
    fn marker_channels_skips_empty_lists() {
        let mut meta = Metadata::empty();
        meta.set_marker_list(1, vec![(0, 1)]);
        meta.set_marker_list(2, vec![]);
        assert_eq!(meta.marker_channels(), vec![1]);
    }
}
