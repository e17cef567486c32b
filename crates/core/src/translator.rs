//! ImagingStudy search over the imaging archive.
//!
//! A search runs in a fixed order:
//! 1. the `patient` parameter must be present and a valid patient reference, and any
//!    `_lastUpdated` bound must be a lower bound,
//! 2. the gatekeeper authorizes `ImagingStudy.read` for that patient,
//! 3. the subject resolver turns the reference into the archive MRN,
//! 4. the archive is queried for `/studies?PatientID=<mrn>` (plus `_lastUpdated`),
//! 5. every record is mapped and the results are wrapped in a searchset Bundle.
//!
//! Steps 1 and 2 report their own errors. Anything failing after authorization is wrapped in
//! [`GatewayError::InternalProcessingError`] together with the archive command, when one was
//! built.

use crate::archive::{updated_range, ArchiveClient, ArchiveQuery};
use crate::constants::{IMAGING_STUDY, MODIFIED_SINCE_PARAM};
use crate::gatekeeper::Gatekeeper;
use crate::mapper::map_study;
use crate::params::SearchParams;
use crate::subject::SubjectResolver;
use crate::{GatewayError, GatewayResult};
use fhir::{Bundle, SearchBundleData};
use imaging_types::PatientReference;
use reqwest::header::HeaderMap;
use std::sync::Arc;

/// One inbound ImagingStudy search.
#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    /// Complete request URL, echoed as the Bundle's self link.
    pub url: String,
    pub params: SearchParams,
    pub headers: HeaderMap,
}

/// Turns ImagingStudy searches into archive queries.
#[derive(Clone)]
pub struct QueryTranslator {
    archive: ArchiveClient,
    gatekeeper: Gatekeeper,
    resolver: Arc<dyn SubjectResolver>,
}

impl QueryTranslator {
    pub fn new(
        archive: ArchiveClient,
        gatekeeper: Gatekeeper,
        resolver: Arc<dyn SubjectResolver>,
    ) -> Self {
        Self {
            archive,
            gatekeeper,
            resolver,
        }
    }

    /// Run the search and return the result envelope.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::MissingParameter`] / [`GatewayError::InvalidParameter`] for a missing
    ///   or unusable `patient`,
    /// - any error of [`Gatekeeper::authorize`],
    /// - [`GatewayError::InternalProcessingError`] for failures after authorization.
    pub async fn search(&self, request: &SearchRequest) -> GatewayResult<SearchBundleData> {
        let patient = request
            .params
            .first_non_empty("patient")
            .ok_or_else(|| GatewayError::MissingParameter("patient".into()))?;
        let reference = PatientReference::parse(patient)
            .map_err(|e| GatewayError::InvalidParameter(format!("patient '{patient}': {e}")))?;
        let updated = request
            .params
            .first("_lastUpdated")
            .map(updated_range)
            .transpose()?
            .flatten();

        self.gatekeeper
            .authorize(&request.params, &request.headers, IMAGING_STUDY)
            .await?;

        let mrn = self
            .resolver
            .resolve_subject_id(&reference)
            .await
            .map_err(|e| GatewayError::internal(e, None))?;

        let mut query = ArchiveQuery::studies().param("PatientID", mrn.as_str());
        if let Some(range) = updated {
            query = query.param(MODIFIED_SINCE_PARAM, range);
        }
        let command = query
            .url(self.archive.base_url())
            .ok()
            .map(|url| url.to_string());

        let records = self
            .archive
            .query(&query)
            .await
            .map_err(|e| GatewayError::internal(e, command))?;

        let subject = reference.relative();
        let entries = records
            .iter()
            .map(|record| map_study(record, &subject))
            .collect::<Vec<_>>();
        tracing::info!(
            "ImagingStudy search for {} matched {} stud(ies)",
            subject,
            entries.len()
        );

        Ok(SearchBundleData::new(request.url.clone(), entries))
    }

    /// Run the search and serialize the Bundle as FHIR JSON.
    ///
    /// # Errors
    ///
    /// As [`QueryTranslator::search`]; rendering failures are internal processing errors.
    pub async fn translate(&self, request: &SearchRequest) -> GatewayResult<String> {
        let bundle = self.search(request).await?;
        Bundle::render(&bundle).map_err(|e| GatewayError::internal(e.into(), None))
    }
}

impl std::fmt::Debug for QueryTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTranslator")
            .field("archive", &self.archive)
            .field("gatekeeper", &self.gatekeeper)
            .finish_non_exhaustive()
    }
}
