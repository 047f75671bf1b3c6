//! Boot loader entries as handed to bootloader backends.
//!
//! See <https://uapi-group.org/specifications/specs/boot_loader_specification/>
//! for the format. Backends don't interpret most of the keys; they
//! only need `linux`, `initrd` and `version`, and otherwise write the
//! entry back out as-is.

use std::fmt::Display;

use uapi_version::Version;

/// A single boot menu entry: an ordered list of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootEntryConfig {
    options: Vec<(String, String)>,
}

impl BootEntryConfig {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_value(&self, key: &str) -> Option<&String> {
        self.options
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Look up the value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_value(key).map(|v| v.as_str())
    }

    /// Set `key` to `value`. An existing key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.options.push((key, value)),
        }
    }

    /// Iterate over all key/value pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The entry version, parsed for comparison.
    /// See <https://uapi-group.org/specifications/specs/version_format_specification/>
    pub fn version(&self) -> Option<Version> {
        self.get_value("version").map(Version::from)
    }

    /// Load an entry from its textual form.
    ///
    /// Each non-empty line that isn't a comment is split at the first
    /// whitespace into a key and a value; no key is interpreted.
    pub fn parse(input: &str) -> Self {
        let mut r = Self::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(|c: char| c.is_ascii_whitespace()) {
                r.set(key, value.trim());
            }
        }
        r
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BootEntryConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut r = Self::new();
        for (k, v) in iter {
            r.set(k, v);
        }
        r
    }
}

impl Display for BootEntryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{key} {value}")?;
        }
        Ok(())
    }
}
