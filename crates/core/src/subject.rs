//! Mapping of external patient references to the archive's patient identifier (MRN).

use crate::config::GatewayConfig;
use crate::{GatewayError, GatewayResult};
use async_trait::async_trait;
use fhir::{Patient, FHIR_JSON_CONTENT_TYPE};
use imaging_types::{NonEmptyText, PatientReference};
use reqwest::header::ACCEPT;
use std::collections::HashMap;
use std::time::Duration;

/// Resolves a patient reference to the identifier the archive files studies under.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`GatewayError::SubjectUnresolved`] if no identifier can be determined.
    async fn resolve_subject_id(&self, reference: &PatientReference) -> GatewayResult<NonEmptyText>;
}

/// The logical id of the reference is the MRN.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceIdResolver;

#[async_trait]
impl SubjectResolver for ReferenceIdResolver {
    async fn resolve_subject_id(&self, reference: &PatientReference) -> GatewayResult<NonEmptyText> {
        NonEmptyText::new(reference.id()).map_err(|e| unresolved(reference, e.to_string()))
    }
}

/// Fixed mapping from logical id to MRN.
#[derive(Clone, Debug, Default)]
pub struct StaticSubjectResolver {
    mrns: HashMap<String, NonEmptyText>,
}

impl StaticSubjectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, patient_id: impl Into<String>, mrn: NonEmptyText) -> Self {
        self.mrns.insert(patient_id.into(), mrn);
        self
    }
}

#[async_trait]
impl SubjectResolver for StaticSubjectResolver {
    async fn resolve_subject_id(&self, reference: &PatientReference) -> GatewayResult<NonEmptyText> {
        self.mrns
            .get(reference.id())
            .cloned()
            .ok_or_else(|| unresolved(reference, "no MRN registered for this patient".into()))
    }
}

/// Reads the Patient from a FHIR server and takes its medical record number.
#[derive(Clone, Debug)]
pub struct FhirPatientResolver {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl FhirPatientResolver {
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfig`] if no patient lookup URL is configured.
    pub fn new(config: &GatewayConfig, client: reqwest::Client) -> GatewayResult<Self> {
        let base_url = config.patient_lookup_url().ok_or_else(|| {
            GatewayError::InvalidConfig("patient lookup URL is not configured".into())
        })?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
            timeout: config.upstream_timeout(),
        })
    }
}

#[async_trait]
impl SubjectResolver for FhirPatientResolver {
    async fn resolve_subject_id(&self, reference: &PatientReference) -> GatewayResult<NonEmptyText> {
        let url = format!("{}/Patient/{}", self.base_url, reference.id());
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, FHIR_JSON_CONTENT_TYPE)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unresolved(reference, format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unresolved(reference, format!("GET {url} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| unresolved(reference, format!("reading {url} failed: {e}")))?;

        let mrn = Patient::medical_record_number(&body)
            .map_err(|e| unresolved(reference, e.to_string()))?
            .ok_or_else(|| unresolved(reference, "patient has no identifiers".into()))?;

        NonEmptyText::new(mrn).map_err(|e| unresolved(reference, e.to_string()))
    }
}

fn unresolved(reference: &PatientReference, reason: String) -> GatewayError {
    GatewayError::SubjectUnresolved {
        reference: reference.to_string(),
        reason,
    }
}
