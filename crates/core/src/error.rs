use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("required parameter '{0}' not found")]
    MissingParameter(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("token introspection rejected: {0}")]
    IntrospectionRejected(String),
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("archive unavailable on command {command}: {reason}")]
    ArchiveUnavailable {
        command: String,
        reason: String,
        timed_out: bool,
    },
    #[error("malformed archive response on command {command}: {reason}")]
    ArchiveMalformedResponse { command: String, reason: String },
    #[error("error processing imaging request: {source}{}", on_command(.command))]
    InternalProcessingError {
        command: Option<String>,
        #[source]
        source: Box<GatewayError>,
    },
    #[error("forwarding to archive failed: {reason}")]
    ForwardingFailure { reason: String, timed_out: bool },
    #[error("could not resolve subject '{reference}': {reason}")]
    SubjectUnresolved { reference: String, reason: String },
    #[error("failed to render FHIR response: {0}")]
    Rendering(#[from] fhir::FhirError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn on_command(command: &Option<String>) -> String {
    match command {
        Some(command) => format!(" on command {command}"),
        None => String::new(),
    }
}

impl GatewayError {
    /// Wrap a pipeline failure, keeping the archive command when one was attempted.
    pub fn internal(source: GatewayError, command: Option<String>) -> Self {
        GatewayError::InternalProcessingError {
            command,
            source: Box::new(source),
        }
    }

    /// Whether the failure was an expired deadline on an outbound call.
    pub fn is_timeout(&self) -> bool {
        match self {
            GatewayError::ArchiveUnavailable { timed_out, .. }
            | GatewayError::ForwardingFailure { timed_out, .. } => *timed_out,
            GatewayError::InternalProcessingError { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// HTTP status reported to the original caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingParameter(_)
            | GatewayError::InvalidParameter(_)
            | GatewayError::InvalidCredential(_) => StatusCode::BAD_REQUEST,
            GatewayError::IntrospectionRejected(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::ArchiveUnavailable { .. }
            | GatewayError::ForwardingFailure { .. }
            | GatewayError::SubjectUnresolved { .. }
            | GatewayError::ArchiveMalformedResponse { .. } => {
                if self.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            GatewayError::InternalProcessingError { source, .. } => {
                if source.is_upstream() {
                    source.status_code()
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            GatewayError::Rendering(_) | GatewayError::InvalidConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the caller. Authorization failures never reveal their cause.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::IntrospectionRejected(_) | GatewayError::AuthorizationDenied(_) => {
                "Authorization failed".to_string()
            }
            other => other.to_string(),
        }
    }

    fn is_upstream(&self) -> bool {
        matches!(
            self,
            GatewayError::ArchiveUnavailable { .. }
                | GatewayError::ArchiveMalformedResponse { .. }
                | GatewayError::ForwardingFailure { .. }
                | GatewayError::SubjectUnresolved { .. }
        )
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_names_the_command() {
        let err = GatewayError::internal(
            GatewayError::ArchiveMalformedResponse {
                command: "http://archive/studies?PatientID=1".into(),
                reason: "expected value".into(),
            },
            Some("http://archive/studies?PatientID=1".into()),
        );
        let message = err.to_string();
        assert!(message.starts_with("error processing imaging request: malformed archive"));
        assert!(message.ends_with("on command http://archive/studies?PatientID=1"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayError::MissingParameter("patient".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::AuthorizationDenied("no scope".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        let timeout = GatewayError::ForwardingFailure {
            reason: "deadline".into(),
            timed_out: true,
        };
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let wrapped_upstream = GatewayError::internal(
            GatewayError::ArchiveUnavailable {
                command: "c".into(),
                reason: "refused".into(),
                timed_out: false,
            },
            Some("c".into()),
        );
        assert_eq!(wrapped_upstream.status_code(), StatusCode::BAD_GATEWAY);

        let wrapped_other =
            GatewayError::internal(GatewayError::InvalidConfig("x".into()), None);
        assert_eq!(wrapped_other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn authorization_failures_hide_their_cause() {
        let err = GatewayError::IntrospectionRejected("connection refused to 10.0.0.5".into());
        assert_eq!(err.client_message(), "Authorization failed");
    }
}
