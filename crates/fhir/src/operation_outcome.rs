//! FHIR OperationOutcome rendering for error responses.

use crate::{parse_wire, FhirError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Information,
}

/// Subset of the FHIR `issue-type` value set used by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Required,
    Login,
    Forbidden,
    Exception,
    Timeout,
    Transient,
    NotFound,
    Processing,
}

/// Domain-level carrier for a single-issue OperationOutcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcomeData {
    pub severity: IssueSeverity,
    pub code: IssueType,
    pub diagnostics: String,
}

impl OperationOutcomeData {
    /// Shorthand for an `error` severity outcome.
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code,
            diagnostics: diagnostics.into(),
        }
    }
}

/// OperationOutcome operations.
pub struct OperationOutcome;

impl OperationOutcome {
    /// Render as FHIR JSON.
    pub fn render(data: &OperationOutcomeData) -> Result<String, FhirError> {
        let wire = OperationOutcomeWire {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![IssueWire {
                severity: data.severity,
                code: data.code,
                diagnostics: Some(data.diagnostics.clone()),
            }],
        };
        serde_json::to_string(&wire).map_err(|e| {
            FhirError::Translation(format!("Failed to serialise OperationOutcome: {e}"))
        })
    }

    /// Parse the first issue of an OperationOutcome.
    pub fn parse(json_text: &str) -> Result<OperationOutcomeData, FhirError> {
        let wire: OperationOutcomeWire = parse_wire(json_text, "OperationOutcome")?;
        if wire.resource_type != "OperationOutcome" {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'OperationOutcome', got '{}'",
                wire.resource_type
            )));
        }
        let issue = wire
            .issue
            .into_iter()
            .next()
            .ok_or_else(|| FhirError::Translation("OperationOutcome has no issues".into()))?;

        Ok(OperationOutcomeData {
            severity: issue.severity,
            code: issue.code,
            diagnostics: issue.diagnostics.unwrap_or_default(),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct OperationOutcomeWire {
    #[serde(rename = "resourceType")]
    resource_type: String,
    issue: Vec<IssueWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct IssueWire {
    severity: IssueSeverity,
    code: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    diagnostics: Option<String>,
}
