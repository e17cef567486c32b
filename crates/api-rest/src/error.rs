use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fhir::{IssueType, OperationOutcome, OperationOutcomeData, FHIR_JSON_CONTENT_TYPE};
use imaging_core::GatewayError;

/// A [`GatewayError`] on its way back to the caller as an OperationOutcome.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!("request failed with {}: {}", status, self.0);
        } else {
            tracing::warn!("request rejected with {}: {}", status, self.0);
        }
        outcome_response(status, issue_type(&self.0), self.0.client_message())
    }
}

fn issue_type(error: &GatewayError) -> IssueType {
    match error {
        GatewayError::MissingParameter(_) => IssueType::Required,
        GatewayError::InvalidParameter(_) => IssueType::Processing,
        GatewayError::InvalidCredential(_) | GatewayError::IntrospectionRejected(_) => {
            IssueType::Login
        }
        GatewayError::AuthorizationDenied(_) => IssueType::Forbidden,
        other if other.is_timeout() => IssueType::Timeout,
        GatewayError::ArchiveUnavailable { .. }
        | GatewayError::ForwardingFailure { .. }
        | GatewayError::SubjectUnresolved { .. } => IssueType::Transient,
        _ => IssueType::Exception,
    }
}

/// An error response with an OperationOutcome body.
pub fn outcome_response(status: StatusCode, code: IssueType, diagnostics: String) -> Response {
    let outcome = OperationOutcomeData::error(code, diagnostics);
    match OperationOutcome::render(&outcome) {
        Ok(body) => (status, [(CONTENT_TYPE, FHIR_JSON_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!("failed to render OperationOutcome: {:?}", e);
            status.into_response()
        }
    }
}
