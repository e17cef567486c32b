use imaging_core::config::config_from_lookup;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the imaging gateway
///
/// Serves the FHIR ImagingStudy search and the WADO-RS retrieval proxy on one REST listener,
/// with `/health` and Swagger UI alongside.
///
/// # Environment Variables
/// - `IMAGING_REST_ADDR`: listen address (default: "0.0.0.0:3000")
/// - `IMAGING_ARCHIVE_BASE_URL`: DICOMweb base of the archive
/// - `IMAGING_INTROSPECTION_URL`: token introspection endpoint
/// - `IMAGING_AUTHENTICATION_ENABLED`: set to `false` to skip token checks (default: true)
/// - `IMAGING_CHUNK_SIZE`: relay chunk size in bytes (default: 16384)
/// - `IMAGING_SERVICE_PREFIX`: path prefix of the FHIR service (default: "/baseDstu3")
/// - `IMAGING_SCOPE_CONTEXTS`: accepted scope contexts (default: "patient,user")
/// - `IMAGING_SCOPE_ALLOW_UNPREFIXED`: accept scope entries without a context (default: true)
/// - `IMAGING_UPSTREAM_TIMEOUT_SECS`: outbound deadline (default: 30)
/// - `IMAGING_PATIENT_LOOKUP_URL`: FHIR base used to resolve patient MRNs (optional)
/// - `IMAGING_AUTHORIZE_RETRIEVALS`: gate retrievals on the study owner, presented to
///   introspection as `Patient/<archive patient id>` (default: false)
/// - `IMAGING_PUBLIC_BASE_URL`: external base URL for Bundle self links (optional)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - any configuration value is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("imaging_gateway=info".parse()?)
                .add_directive("api_rest=info".parse()?)
                .add_directive("imaging_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("IMAGING_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let config = config_from_lookup(|name| std::env::var(name).ok())?;

    tracing::info!("++ Starting imaging gateway on {}", rest_addr);
    tracing::info!(
        "++ Archive {} (prefix '{}', authentication {})",
        config.archive_base_url(),
        config.service_prefix(),
        if config.authentication_enabled() { "on" } else { "off" }
    );
    tracing::info!(
        "++ Scope contexts [{}], unprefixed scopes {}",
        config.scope_policy().contexts().join(", "),
        if config.scope_policy().allows_unprefixed() { "accepted" } else { "rejected" }
    );

    let app = api_rest::router(api_rest::build_state(config)?);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
