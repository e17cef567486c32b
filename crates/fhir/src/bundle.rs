//! FHIR search-result Bundle wire model.
//!
//! The gateway answers every ImagingStudy search with a `searchset` Bundle. The domain carrier
//! [`SearchBundleData`] is immutable once built: the entry list, the `self` link and the id
//! are fixed at construction, and `total` is always derived from the entry count.

use crate::imaging_study::{self, ImagingStudyData, ImagingStudyWire};
use crate::{parse_wire, FhirError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SEARCHSET: &str = "searchset";

/// Domain-level carrier for a search-result envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchBundleData {
    id: Uuid,
    self_url: String,
    entries: Vec<ImagingStudyData>,
}

impl SearchBundleData {
    /// Build a new envelope with a freshly generated id.
    pub fn new(self_url: impl Into<String>, entries: Vec<ImagingStudyData>) -> Self {
        Self {
            id: Uuid::new_v4(),
            self_url: self_url.into(),
            entries,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The original request URL.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub fn entries(&self) -> &[ImagingStudyData] {
        &self.entries
    }

    /// Number of matches; always the entry count.
    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

/// Bundle operations.
pub struct Bundle;

impl Bundle {
    /// Render a search-result envelope as FHIR JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if serialisation fails.
    pub fn render(data: &SearchBundleData) -> Result<String, FhirError> {
        let wire = BundleWire {
            resource_type: "Bundle".to_string(),
            id: data.id.to_string(),
            bundle_type: SEARCHSET.to_string(),
            total: data.total(),
            link: vec![BundleLinkWire {
                relation: "self".to_string(),
                url: data.self_url.clone(),
            }],
            entry: data
                .entries
                .iter()
                .map(|study| BundleEntryWire {
                    resource: imaging_study::domain_to_wire(study),
                })
                .collect(),
        };

        serde_json::to_string(&wire)
            .map_err(|e| FhirError::Translation(format!("Failed to serialise Bundle: {e}")))
    }

    /// Parse a search-result Bundle produced by [`Bundle::render`].
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not match the wire schema,
    /// - resourceType is not "Bundle" or type is not "searchset",
    /// - the id is not a UUID,
    /// - there is no `self` link,
    /// - `total` disagrees with the number of entries.
    pub fn parse(json_text: &str) -> Result<SearchBundleData, FhirError> {
        let wire: BundleWire = parse_wire(json_text, "Bundle")?;

        if wire.resource_type != "Bundle" {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                wire.resource_type
            )));
        }
        if wire.bundle_type != SEARCHSET {
            return Err(FhirError::InvalidInput(format!(
                "Expected bundle type '{SEARCHSET}', got '{}'",
                wire.bundle_type
            )));
        }
        if wire.total != wire.entry.len() {
            return Err(FhirError::Translation(format!(
                "Bundle total {} does not match {} entries",
                wire.total,
                wire.entry.len()
            )));
        }

        let id = Uuid::parse_str(&wire.id)
            .map_err(|_| FhirError::InvalidUuid(format!("Invalid Bundle id: {}", wire.id)))?;
        let self_url = wire
            .link
            .into_iter()
            .find(|l| l.relation == "self")
            .map(|l| l.url)
            .ok_or_else(|| FhirError::Translation("Bundle has no self link".into()))?;
        let entries = wire
            .entry
            .into_iter()
            .map(|e| imaging_study::wire_to_domain(e.resource))
            .collect::<Result<Vec<_>, FhirError>>()?;

        Ok(SearchBundleData {
            id,
            self_url,
            entries,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct BundleWire {
    #[serde(rename = "resourceType")]
    resource_type: String,
    id: String,
    #[serde(rename = "type")]
    bundle_type: String,
    total: usize,
    link: Vec<BundleLinkWire>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entry: Vec<BundleEntryWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct BundleLinkWire {
    relation: String,
    url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct BundleEntryWire {
    resource: ImagingStudyWire,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn study(uid: &str) -> ImagingStudyData {
        ImagingStudyData {
            patient: "Patient/9".to_string(),
            uid: Some(uid.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_bundle_has_zero_total() {
        let data = SearchBundleData::new("http://gw/baseDstu3/ImagingStudy?patient=9", vec![]);
        let json = Bundle::render(&data).expect("render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");

        assert_eq!(value["resourceType"], "Bundle");
        assert_eq!(value["type"], "searchset");
        assert_eq!(value["total"], 0);
        assert!(value.get("entry").is_none());
        assert_eq!(value["link"][0]["relation"], "self");
        assert_eq!(
            value["link"][0]["url"],
            "http://gw/baseDstu3/ImagingStudy?patient=9"
        );
    }

    #[test]
    fn total_tracks_entries_and_order_is_kept() {
        let data = SearchBundleData::new("u", vec![study("1.1"), study("1.2"), study("1.3")]);
        assert_eq!(data.total(), 3);

        let parsed = Bundle::parse(&Bundle::render(&data).expect("render")).expect("parse");
        assert_eq!(parsed, data);
        let uids: Vec<_> = parsed
            .entries()
            .iter()
            .filter_map(|s| s.uid.as_deref())
            .collect();
        assert_eq!(uids, vec!["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn each_bundle_gets_a_fresh_id() {
        let a = SearchBundleData::new("u", vec![]);
        let b = SearchBundleData::new("u", vec![]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn parse_rejects_inconsistent_total() {
        let input = r#"{"resourceType":"Bundle","id":"2b1e6c1e-3f7a-4a8e-9a43-8d0b0f8f3f10","type":"searchset","total":2,"link":[{"relation":"self","url":"u"}]}"#;
        let err = Bundle::parse(input).expect_err("total mismatch");
        assert!(matches!(err, FhirError::Translation(msg) if msg.contains("total")));
    }
}
