use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint
///
/// Reports that the gateway process is up. It does not probe the archive or the
/// introspection service.
pub async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Imaging gateway is alive".into(),
    })
}
