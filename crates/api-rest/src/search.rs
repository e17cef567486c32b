//! `GET <prefix>/ImagingStudy` interceptor.

use crate::dispatch::{Interceptor, RequestHead};
use crate::error::ApiError;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Query;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use fhir::FHIR_JSON_CONTENT_TYPE;
use imaging_core::constants::IMAGING_STUDY;
use imaging_core::translator::{QueryTranslator, SearchRequest};
use imaging_core::{GatewayConfig, GatewayError, SearchParams};

/// Answers ImagingStudy searches from the imaging archive.
pub struct ImagingStudySearch {
    translator: QueryTranslator,
    path: String,
    public_base_url: Option<String>,
}

impl ImagingStudySearch {
    pub fn new(config: &GatewayConfig, translator: QueryTranslator) -> Self {
        Self {
            translator,
            path: format!("{}/{IMAGING_STUDY}", config.service_prefix()),
            public_base_url: config.public_base_url().map(str::to_string),
        }
    }

    /// The request URL as the caller addressed it.
    fn self_url(&self, head: &RequestHead) -> String {
        let path_and_query = head
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| head.path());

        if let Some(base) = &self.public_base_url {
            return format!("{base}{path_and_query}");
        }
        match head.headers.get(HOST).and_then(|h| h.to_str().ok()) {
            Some(host) => format!("http://{host}{path_and_query}"),
            None => head.uri.to_string(),
        }
    }

    async fn search(&self, head: RequestHead) -> Result<String, ApiError> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&head.uri)
            .map_err(|e| GatewayError::InvalidParameter(format!("malformed query string: {e}")))?;

        let request = SearchRequest {
            url: self.self_url(&head),
            params: SearchParams::new(pairs),
            headers: head.headers,
        };
        Ok(self.translator.translate(&request).await?)
    }
}

#[async_trait]
impl Interceptor for ImagingStudySearch {
    fn name(&self) -> &'static str {
        "imaging-study-search"
    }

    fn handles(&self, head: &RequestHead) -> bool {
        head.method == Method::GET && head.path().trim_end_matches('/') == self.path
    }

    async fn handle(&self, head: RequestHead, _body: Body) -> Response {
        match self.search(head).await {
            Ok(bundle) => (
                StatusCode::OK,
                [(CONTENT_TYPE, FHIR_JSON_CONTENT_TYPE)],
                bundle,
            )
                .into_response(),
            Err(e) => e.into_response(),
        }
    }
}
