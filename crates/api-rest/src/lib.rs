//! # API REST
//!
//! HTTP surface of the imaging gateway.
//!
//! Handles:
//! - `GET <prefix>/ImagingStudy?patient=..`: FHIR search answered from the archive
//! - any method on `<prefix>/studies/..`: streamed WADO-RS retrieval
//! - `/health` with OpenAPI/Swagger documentation
//! - OperationOutcome error bodies and CORS
//!
//! Both gateway endpoints are interceptors behind the router fallback; see [`dispatch`].

#![warn(rust_2018_idioms)]

pub mod dispatch;
pub mod error;
pub mod health;
pub mod proxy;
pub mod search;

use axum::routing::get;
use axum::Router;
use dispatch::{Dispatcher, Interceptor};
use imaging_core::{GatewayConfig, GatewayResult, GatewayServices};
use proxy::RetrievalInterceptor;
use search::ImagingStudySearch;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
///
/// Holds only immutable configuration and the interceptor chain; every request is independent.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(OpenApi)]
#[openapi(paths(health::health), components(schemas(health::HealthRes)))]
pub struct ApiDoc;

/// Wire the gateway components for `config`.
///
/// The ImagingStudy search is offered requests before the retrieval proxy.
///
/// # Errors
///
/// Returns an error if the outbound HTTP client cannot be built.
pub fn build_state(config: GatewayConfig) -> GatewayResult<AppState> {
    let services = GatewayServices::new(&config)?;
    let interceptors: Vec<Arc<dyn Interceptor>> = vec![
        Arc::new(ImagingStudySearch::new(&config, services.translator)),
        Arc::new(RetrievalInterceptor::new(services.proxy)),
    ];

    Ok(AppState {
        config: Arc::new(config),
        dispatcher: Arc::new(Dispatcher::new(interceptors)),
    })
}

/// The complete router: health, OpenAPI, and the interceptor fallback.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(dispatch::dispatch)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
