//! FHIR (DSTU3) wire support for the imaging gateway.
//!
//! This crate provides **wire models** and **translation helpers** for the FHIR resources the
//! gateway emits:
//! - `ImagingStudy` resources built from archive query results
//! - `Bundle` search envelopes wrapping those studies
//! - `OperationOutcome` bodies for error responses
//!
//! It also reads the identifiers of `Patient` resources fetched from a FHIR server.
//!
//! Each module follows the same layering: public domain-level carriers, strict internal wire
//! structs (`#[serde(deny_unknown_fields)]`), and conversion helpers between the two.
//! Rendering produces FHIR JSON; parsing exists so callers (tests, the CLI) can read the
//! gateway's own output back with precise error paths.

pub mod bundle;
pub mod imaging_study;
pub mod operation_outcome;
pub mod patient;

// Re-export facades
pub use bundle::Bundle;
pub use imaging_study::ImagingStudy;
pub use operation_outcome::OperationOutcome;
pub use patient::Patient;

// Re-export public domain-level types
pub use bundle::SearchBundleData;
pub use imaging_study::{Availability, ImagingStudyData, StudyStart};
pub use operation_outcome::{IssueSeverity, IssueType, OperationOutcomeData};
pub use patient::PatientIdentifier;

/// Media type for FHIR JSON bodies.
pub const FHIR_JSON_CONTENT_TYPE: &str = "application/fhir+json";

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Deserialize `json_text` into `T`, reporting the JSON path of the first mismatch.
pub(crate) fn parse_wire<T>(json_text: &str, what: &str) -> FhirResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(json_text);
    match serde_path_to_error::deserialize::<_, T>(&mut deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            if source.is_syntax() || source.is_eof() {
                return Err(FhirError::InvalidJson(source));
            }
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            Err(FhirError::Translation(format!(
                "{what} schema mismatch at {path}: {source}"
            )))
        }
    }
}
