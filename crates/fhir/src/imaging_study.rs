//! FHIR-aligned ImagingStudy wire models and translation helpers.
//!
//! This module provides both domain-level types and wire models for the DSTU3 `ImagingStudy`
//! resource, which summarises one DICOM study held by the imaging archive.
//!
//! Responsibilities:
//! - Define public domain-level types for the attribute mapper to populate
//! - Define a strict wire model for serialisation/deserialisation
//! - Provide translation helpers between domain primitives and the wire model
//!
//! Notes:
//! - Optional fields that are unset are omitted from the JSON entirely
//! - The study UID is held bare in the domain type and rendered as `urn:oid:<uid>`

use crate::{parse_wire, FhirError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Code system for DICOM modality codes.
pub const DICOM_CODE_SYSTEM: &str = "http://dicom.nema.org/resources/ontology/DCM";

const OID_PREFIX: &str = "urn:oid:";
const STARTED_DATE_FORMAT: &str = "%Y-%m-%d";
const STARTED_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ============================================================================
// Public domain-level types
// ============================================================================

/// Availability of the study's instances (DICOM Instance Availability).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    /// Instances are immediately retrievable.
    Online,
    /// Instances need manual intervention before retrieval.
    Offline,
    /// Instances are retrievable with some delay.
    Nearline,
    /// Instances cannot be retrieved.
    Unavailable,
}

impl Availability {
    /// Wire code, shared by DICOM (0008,0056) and FHIR.
    pub fn code(self) -> &'static str {
        match self {
            Availability::Online => "ONLINE",
            Availability::Offline => "OFFLINE",
            Availability::Nearline => "NEARLINE",
            Availability::Unavailable => "UNAVAILABLE",
        }
    }

    /// Parse a wire code. Returns `None` for anything outside the value set.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ONLINE" => Some(Availability::Online),
            "OFFLINE" => Some(Availability::Offline),
            "NEARLINE" => Some(Availability::Nearline),
            "UNAVAILABLE" => Some(Availability::Unavailable),
            _ => None,
        }
    }
}

/// When the study started: a full local date-time, or only the date when the time is unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StudyStart {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl StudyStart {
    /// FHIR `dateTime` rendering (`2023-06-15` or `2023-06-15T09:30:45`).
    pub fn to_wire(self) -> String {
        match self {
            StudyStart::Date(d) => d.format(STARTED_DATE_FORMAT).to_string(),
            StudyStart::DateTime(dt) => dt.format(STARTED_DATE_TIME_FORMAT).to_string(),
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, STARTED_DATE_TIME_FORMAT) {
            return Some(StudyStart::DateTime(dt));
        }
        NaiveDate::parse_from_str(s, STARTED_DATE_FORMAT)
            .ok()
            .map(StudyStart::Date)
    }
}

/// Domain-level carrier for one imaging study.
///
/// Every `Some`/non-empty field was populated from a non-empty archive value; nothing is ever
/// set to an empty placeholder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImagingStudyData {
    /// Reference to the patient the study belongs to (e.g. `Patient/1234`).
    pub patient: String,

    /// Study Instance UID, without the `urn:oid:` prefix.
    pub uid: Option<String>,

    /// Accession number.
    pub accession: Option<String>,

    /// Secondary identifiers (Study ID).
    pub identifiers: Vec<String>,

    pub availability: Option<Availability>,

    /// DICOM modality codes present in the study (e.g. `CT`, `MR`).
    pub modalities: Vec<String>,

    /// Display name of the referring physician.
    pub referrer: Option<String>,

    /// Retrieval endpoint references (WADO-RS URLs).
    pub endpoints: Vec<String>,

    pub number_of_series: Option<u32>,

    pub number_of_instances: Option<u32>,

    pub started: Option<StudyStart>,
}

// ============================================================================
// Public ImagingStudy operations
// ============================================================================

/// ImagingStudy resource operations.
///
/// This is a zero-sized type used for namespacing; all methods are associated functions.
pub struct ImagingStudy;

impl ImagingStudy {
    /// Parse an ImagingStudy resource from FHIR JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not match the wire schema (the error names the failing path),
    /// - resourceType is not "ImagingStudy",
    /// - the uid is not an `urn:oid:` value,
    /// - availability or started carry values outside their formats.
    pub fn parse(json_text: &str) -> Result<ImagingStudyData, FhirError> {
        let wire: ImagingStudyWire = parse_wire(json_text, "ImagingStudy")?;
        wire_to_domain(wire)
    }

    /// Render an ImagingStudy resource as FHIR JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if serialisation fails.
    pub fn render(data: &ImagingStudyData) -> Result<String, FhirError> {
        let wire = domain_to_wire(data);
        serde_json::to_string(&wire)
            .map_err(|e| FhirError::Translation(format!("Failed to serialise ImagingStudy: {e}")))
    }
}

// ============================================================================
// Wire types (crate-internal; the bundle embeds them)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct ImagingStudyWire {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accession: Option<IdentifierWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<IdentifierWire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modality_list: Vec<CodingWire>,

    pub patient: ReferenceWire,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<ReferenceWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint: Vec<ReferenceWire>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_series: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_instances: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct IdentifierWire {
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct CodingWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReferenceWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

// ============================================================================
// Helper functions (crate-internal)
// ============================================================================

pub(crate) fn wire_to_domain(wire: ImagingStudyWire) -> Result<ImagingStudyData, FhirError> {
    if wire.resource_type != "ImagingStudy" {
        return Err(FhirError::InvalidInput(format!(
            "Expected resourceType 'ImagingStudy', got '{}'",
            wire.resource_type
        )));
    }

    let uid = wire
        .uid
        .map(|uid| {
            uid.strip_prefix(OID_PREFIX)
                .map(str::to_string)
                .ok_or_else(|| FhirError::Translation(format!("uid is not an OID URN: {uid}")))
        })
        .transpose()?;

    let availability = wire
        .availability
        .map(|code| {
            Availability::from_code(&code).ok_or_else(|| {
                FhirError::Translation(format!("unknown availability code: {code}"))
            })
        })
        .transpose()?;

    let started = wire
        .started
        .map(|s| {
            StudyStart::from_wire(&s)
                .ok_or_else(|| FhirError::Translation(format!("invalid started value: {s}")))
        })
        .transpose()?;

    Ok(ImagingStudyData {
        patient: wire.patient.reference.unwrap_or_default(),
        uid,
        accession: wire.accession.map(|i| i.value),
        identifiers: wire.identifier.into_iter().map(|i| i.value).collect(),
        availability,
        modalities: wire.modality_list.into_iter().map(|c| c.code).collect(),
        referrer: wire.referrer.and_then(|r| r.display),
        endpoints: wire
            .endpoint
            .into_iter()
            .filter_map(|r| r.reference)
            .collect(),
        number_of_series: wire.number_of_series,
        number_of_instances: wire.number_of_instances,
        started,
    })
}

pub(crate) fn domain_to_wire(data: &ImagingStudyData) -> ImagingStudyWire {
    ImagingStudyWire {
        resource_type: "ImagingStudy".to_string(),
        uid: data.uid.as_ref().map(|uid| format!("{OID_PREFIX}{uid}")),
        accession: data
            .accession
            .as_ref()
            .map(|value| IdentifierWire { value: value.clone() }),
        identifier: data
            .identifiers
            .iter()
            .map(|value| IdentifierWire { value: value.clone() })
            .collect(),
        availability: data.availability.map(|a| a.code().to_string()),
        modality_list: data
            .modalities
            .iter()
            .map(|code| CodingWire {
                system: Some(DICOM_CODE_SYSTEM.to_string()),
                code: code.clone(),
            })
            .collect(),
        patient: ReferenceWire {
            reference: Some(data.patient.clone()),
            display: None,
        },
        started: data.started.map(StudyStart::to_wire),
        referrer: data.referrer.as_ref().map(|display| ReferenceWire {
            reference: None,
            display: Some(display.clone()),
        }),
        endpoint: data
            .endpoints
            .iter()
            .map(|reference| ReferenceWire {
                reference: Some(reference.clone()),
                display: None,
            })
            .collect(),
        number_of_series: data.number_of_series,
        number_of_instances: data.number_of_instances,
    }
}
