//! Attribute-tagged archive records.
//!
//! QIDO-RS answers with DICOM JSON (PS3.18 annex F): an array of objects keyed by eight-digit
//! hex tags, each holding a `vr` and an optional `Value` array. [`ArchiveRecord`] flattens one
//! such object into `tag -> [string values]` so that the attribute mapper never has to care
//! about value representations.
//!
//! Value flattening:
//! - strings are kept verbatim
//! - numbers keep their JSON text (`12`, `1.5`)
//! - person names take the `Alphabetic` component, then `Ideographic`, then `Phonetic`
//! - `null` becomes `""` so positions in multi-valued attributes are preserved
//! - sequence items and bulk data are dropped

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One matched archive entity (for example one study) as `tag -> values`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveRecord {
    attributes: BTreeMap<String, Vec<String>>,
}

impl ArchiveRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the values of `tag`. Tags are stored uppercase.
    pub fn insert(&mut self, tag: impl AsRef<str>, values: Vec<String>) {
        self.attributes
            .insert(tag.as_ref().to_ascii_uppercase(), values);
    }

    /// All values of `tag`, or an empty slice when the tag is absent.
    pub fn values(&self, tag: &str) -> &[String] {
        self.attributes
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The first value of `tag` if it is present and non-empty.
    pub fn first(&self, tag: &str) -> Option<&str> {
        self.values(tag)
            .first()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Every non-empty value of `tag`, in archive order.
    pub fn non_empty_values<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.values(tag)
            .iter()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.attributes.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl<K: AsRef<str>> FromIterator<(K, Vec<String>)> for ArchiveRecord {
    fn from_iter<I: IntoIterator<Item = (K, Vec<String>)>>(iter: I) -> Self {
        let mut record = ArchiveRecord::new();
        for (tag, values) in iter {
            record.insert(tag, values);
        }
        record
    }
}

#[derive(Deserialize)]
struct AttributeWire {
    #[serde(rename = "Value", default)]
    value: Vec<Value>,
}

/// Parse a QIDO-RS response body into records, preserving archive order.
///
/// # Errors
///
/// Returns the `serde_json` error if the body is not a JSON array of attribute objects.
pub fn parse_dicom_json(body: &[u8]) -> Result<Vec<ArchiveRecord>, serde_json::Error> {
    let objects: Vec<BTreeMap<String, AttributeWire>> = serde_json::from_slice(body)?;

    Ok(objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(tag, attribute)| {
                    let values = attribute.value.iter().filter_map(flatten_value).collect();
                    (tag, values)
                })
                .collect()
        })
        .collect())
}

fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Object(map) => ["Alphabetic", "Ideographic", "Phonetic"]
            .iter()
            .find_map(|component| map.get(*component).and_then(Value::as_str))
            .map(str::to_string),
        Value::Array(_) => None,
    }
}
