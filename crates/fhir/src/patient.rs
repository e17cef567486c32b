//! Patient identifier extraction.
//!
//! The gateway never emits Patient resources; it only reads them from a FHIR server to find the
//! medical record number (MRN) that the imaging archive files studies under.
//!
//! Unlike the other wire models this one is lenient: a Patient from an external server carries
//! far more than the gateway reads, so unknown members are ignored.

use crate::{parse_wire, FhirError, FhirResult};
use serde::Deserialize;

// ============================================================================
// Public domain-level types
// ============================================================================

/// Code of the identifier type `MR` (medical record number), HL7 v2 table 0203.
pub const MEDICAL_RECORD_TYPE_CODE: &str = "MR";

/// One identifier of a Patient, flattened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatientIdentifier {
    /// Codes of `identifier.type.coding`, in order.
    pub type_codes: Vec<String>,
    pub system: Option<String>,
    pub value: String,
}

impl PatientIdentifier {
    pub fn is_medical_record_number(&self) -> bool {
        self.type_codes
            .iter()
            .any(|code| code == MEDICAL_RECORD_TYPE_CODE)
    }
}

/// Patient facade.
pub struct Patient;

impl Patient {
    /// Identifiers with a non-empty value, in resource order.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if the text is not a JSON object with `resourceType` `Patient`.
    pub fn identifiers(json_text: &str) -> FhirResult<Vec<PatientIdentifier>> {
        let wire: PatientWire = parse_wire(json_text, "Patient")?;
        if wire.resource_type != "Patient" {
            return Err(FhirError::InvalidInput(format!(
                "expected resourceType 'Patient', got '{}'",
                wire.resource_type
            )));
        }

        Ok(wire
            .identifier
            .into_iter()
            .filter_map(|identifier| {
                let value = identifier.value.filter(|v| !v.trim().is_empty())?;
                Some(PatientIdentifier {
                    type_codes: identifier
                        .r#type
                        .map(|t| t.coding.into_iter().filter_map(|c| c.code).collect())
                        .unwrap_or_default(),
                    system: identifier.system,
                    value,
                })
            })
            .collect())
    }

    /// The medical record number: the identifier typed `MR`, else the first identifier.
    ///
    /// # Errors
    ///
    /// As [`Patient::identifiers`].
    pub fn medical_record_number(json_text: &str) -> FhirResult<Option<String>> {
        let identifiers = Self::identifiers(json_text)?;
        let chosen = identifiers
            .iter()
            .find(|i| i.is_medical_record_number())
            .or_else(|| identifiers.first());
        Ok(chosen.map(|i| i.value.clone()))
    }
}

// ============================================================================
// Internal wire types
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatientWire {
    resource_type: String,
    #[serde(default)]
    identifier: Vec<IdentifierWire>,
}

#[derive(Deserialize)]
struct IdentifierWire {
    #[serde(default)]
    r#type: Option<CodeableConceptWire>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct CodeableConceptWire {
    #[serde(default)]
    coding: Vec<CodingWire>,
}

#[derive(Deserialize)]
struct CodingWire {
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATIENT: &str = r#"{
      "resourceType": "Patient",
      "id": "1234",
      "name": [{"family": "Smith"}],
      "identifier": [
        {"system": "urn:nhs", "value": "943 476 5919"},
        {
          "type": {"coding": [{"system": "http://hl7.org/fhir/v2/0203", "code": "MR"}]},
          "system": "urn:hospital:mrn",
          "value": "MRN-0042"
        },
        {"system": "urn:blank", "value": "  "}
      ]
    }"#;

    #[test]
    fn prefers_medical_record_number() {
        assert_eq!(
            Patient::medical_record_number(PATIENT).unwrap().as_deref(),
            Some("MRN-0042")
        );
    }

    #[test]
    fn falls_back_to_first_identifier() {
        let json = r#"{"resourceType": "Patient", "identifier": [{"value": "A1"}, {"value": "B2"}]}"#;
        assert_eq!(
            Patient::medical_record_number(json).unwrap().as_deref(),
            Some("A1")
        );
    }

    #[test]
    fn skips_blank_identifiers() {
        let identifiers = Patient::identifiers(PATIENT).unwrap();
        assert_eq!(identifiers.len(), 2);
        assert_eq!(identifiers[0].system.as_deref(), Some("urn:nhs"));
    }

    #[test]
    fn patient_without_identifiers_has_no_mrn() {
        let json = r#"{"resourceType": "Patient", "id": "1"}"#;
        assert_eq!(Patient::medical_record_number(json).unwrap(), None);
    }

    #[test]
    fn rejects_other_resources() {
        let json = r#"{"resourceType": "Observation"}"#;
        assert!(matches!(
            Patient::medical_record_number(json),
            Err(FhirError::InvalidInput(_))
        ));
        assert!(matches!(
            Patient::identifiers(r#"{"identifier": []}"#),
            Err(FhirError::Translation(_))
        ));
    }

    #[test]
    fn malformed_json_is_reported_as_such() {
        assert!(matches!(
            Patient::identifiers(r#"{"resourceType": "Patient", "identifier": ["#),
            Err(FhirError::InvalidJson(_))
        ));
        assert!(matches!(
            Patient::identifiers("<Patient/>"),
            Err(FhirError::InvalidJson(_))
        ));
    }
}
