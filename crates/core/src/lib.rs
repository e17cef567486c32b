//! # Imaging Core
//!
//! Core logic for the imaging gateway, which puts a FHIR `ImagingStudy` search and a
//! DICOMweb retrieval proxy in front of an imaging archive.
//!
//! This crate contains:
//! - [`dicom`] / [`mapper`]: DICOM JSON records and their mapping to `ImagingStudy`
//! - [`archive`]: QIDO-RS queries against the archive
//! - [`introspection`] / [`gatekeeper`]: bearer token introspection and scope checks
//! - [`subject`]: patient reference to MRN resolution
//! - [`translator`]: the ImagingStudy search pipeline
//! - [`retrieval`]: the WADO-RS forwarding proxy
//!
//! **No server concerns**: routing, HTTP responses and process wiring belong in `api-rest` and
//! the binaries. Configuration arrives as a [`config::GatewayConfig`]; nothing here reads the
//! environment.

pub mod archive;
pub mod config;
pub mod constants;
pub mod dicom;
pub mod error;
pub mod gatekeeper;
pub mod introspection;
pub mod mapper;
pub mod params;
pub mod retrieval;
pub mod subject;
pub mod translator;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use params::SearchParams;

use archive::ArchiveClient;
use gatekeeper::Gatekeeper;
use introspection::{HttpIntrospectionClient, TokenIntrospector};
use retrieval::RetrievalProxy;
use std::sync::Arc;
use subject::{FhirPatientResolver, ReferenceIdResolver, SubjectResolver};
use translator::QueryTranslator;

/// Every gateway component, wired from one configuration over one connection pool.
#[derive(Clone)]
pub struct GatewayServices {
    pub translator: QueryTranslator,
    pub proxy: RetrievalProxy,
    pub gatekeeper: Gatekeeper,
    pub introspector: Arc<dyn TokenIntrospector>,
}

impl GatewayServices {
    /// Build the components described by `config`.
    ///
    /// Patients are resolved through the FHIR server when a patient lookup URL is configured,
    /// otherwise the reference's logical id is used as the MRN.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfig`] if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let archive = ArchiveClient::new(config)?;
        let http = archive.http().clone();

        let introspector: Arc<dyn TokenIntrospector> =
            Arc::new(HttpIntrospectionClient::new(config, http.clone()));
        let gatekeeper = Gatekeeper::new(config, introspector.clone());

        let resolver: Arc<dyn SubjectResolver> = match config.patient_lookup_url() {
            Some(_) => Arc::new(FhirPatientResolver::new(config, http)?),
            None => Arc::new(ReferenceIdResolver),
        };

        Ok(Self {
            translator: QueryTranslator::new(archive.clone(), gatekeeper.clone(), resolver),
            proxy: RetrievalProxy::new(config, archive, gatekeeper.clone()),
            gatekeeper,
            introspector,
        })
    }
}
