//! Read-only QIDO-RS client for the imaging archive.
//!
//! One GET per query, no retry. Connection problems, deadlines and non-success statuses are
//! `ArchiveUnavailable`; a body that is not DICOM JSON is `ArchiveMalformedResponse`. Every
//! error carries the full URL that was attempted.

use crate::config::GatewayConfig;
use crate::constants::{DICOM_JSON_MEDIA_TYPE, MODIFIED_SINCE_PARAM};
use crate::dicom::{parse_dicom_json, ArchiveRecord};
use crate::{GatewayError, GatewayResult};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use std::time::Duration;

/// A query against the archive: a relative path plus query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveQuery {
    path: String,
    params: Vec<(String, String)>,
}

impl ArchiveQuery {
    /// Query relative to the archive base, e.g. `/studies`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Study-level search.
    pub fn studies() -> Self {
        Self::new("/studies")
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Restrict matches to entities modified at or after `bound`.
    ///
    /// See [`updated_range`] for the accepted forms.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidParameter`] if `bound` carries a comparator that is not a lower
    /// bound.
    pub fn modified_since(self, bound: Option<&str>) -> GatewayResult<Self> {
        match bound.map(updated_range).transpose()?.flatten() {
            Some(range) => Ok(self.param(MODIFIED_SINCE_PARAM, range)),
            None => Ok(self),
        }
    }

    /// Full request URL against `base_url`.
    pub fn url(&self, base_url: &str) -> GatewayResult<Url> {
        let mut url = Url::parse(&format!("{base_url}{}", self.path)).map_err(|e| {
            GatewayError::InvalidParameter(format!("archive path '{}' is invalid: {e}", self.path))
        })?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }
}

/// FHIR search comparators; all are two lowercase letters.
const COMPARATORS: [&str; 9] = ["eq", "ne", "gt", "lt", "ge", "le", "sa", "eb", "ap"];

/// Comparators that describe an open lower bound.
const LOWER_BOUND_COMPARATORS: [&str; 3] = ["ge", "gt", "sa"];

/// Turn a `_lastUpdated` value into an open DICOM range (`<digits>-`).
///
/// The bound is reduced to its digits (`ge2023-06-15T10:00` becomes `202306151000-`), stopping
/// at fractional seconds or a zone designator. A bare value and the `ge`, `gt` and `sa`
/// comparators are lower bounds. Returns `None` when no digits remain.
///
/// # Errors
///
/// [`GatewayError::InvalidParameter`] for `eq`, `ne`, `lt`, `le`, `eb` or `ap`, which the
/// archive's open range cannot express.
pub fn updated_range(raw: &str) -> GatewayResult<Option<String>> {
    let raw = raw.trim();
    let comparator = raw.get(..2).filter(|prefix| COMPARATORS.contains(prefix));
    let raw = match comparator {
        Some(prefix) if LOWER_BOUND_COMPARATORS.contains(&prefix) => &raw[2..],
        Some(prefix) => {
            return Err(GatewayError::InvalidParameter(format!(
                "_lastUpdated comparator '{prefix}' is not supported; use ge, gt or sa"
            )))
        }
        None => raw,
    };

    let digits: String = raw
        .chars()
        .take_while(|c| !matches!(c, '.' | 'Z' | '+'))
        .filter(char::is_ascii_digit)
        .take(14)
        .collect();
    if digits.is_empty() {
        Ok(None)
    } else {
        Ok(Some(format!("{digits}-")))
    }
}

/// HTTP client for archive queries.
#[derive(Clone, Debug)]
pub struct ArchiveClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ArchiveClient {
    /// Build a client with its own connection pool.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.upstream_timeout())
            .build()
            .map_err(|e| GatewayError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(config, client))
    }

    /// Build a client sharing an existing connection pool.
    pub fn with_client(config: &GatewayConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.archive_base_url().to_string(),
            client,
            timeout: config.upstream_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying pool, shared with the retrieval proxy.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Run `query` and return the matched records in archive order.
    ///
    /// `204 No Content` and an empty body are both an empty result.
    pub async fn query(&self, query: &ArchiveQuery) -> GatewayResult<Vec<ArchiveRecord>> {
        let url = query.url(&self.base_url)?;
        let command = url.to_string();
        tracing::debug!("archive query {}", command);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, DICOM_JSON_MEDIA_TYPE)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unavailable(&command, &e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(GatewayError::ArchiveUnavailable {
                command,
                reason: format!("archive returned {status}"),
                timed_out: false,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| unavailable(&command, &e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        parse_dicom_json(&body).map_err(|e| GatewayError::ArchiveMalformedResponse {
            command,
            reason: e.to_string(),
        })
    }

    /// Studies of one patient, optionally restricted to recent modifications.
    pub async fn studies_for_patient(
        &self,
        mrn: &str,
        modified_since: Option<&str>,
    ) -> GatewayResult<Vec<ArchiveRecord>> {
        let query = ArchiveQuery::studies()
            .param("PatientID", mrn)
            .modified_since(modified_since)?;
        self.query(&query).await
    }
}

fn unavailable(command: &str, error: &reqwest::Error) -> GatewayError {
    GatewayError::ArchiveUnavailable {
        command: command.to_string(),
        reason: error.to_string(),
        timed_out: error.is_timeout(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::RawQuery;
    use axum::http::{header::CONTENT_TYPE, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    /// Start a throwaway server, return its base URL.
    pub(crate) async fn start_test_server(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    pub(crate) fn config_for(archive: &str) -> GatewayConfig {
        GatewayConfig::new(archive, "http://127.0.0.1:9/introspect", true, 1024).unwrap()
    }

    async fn echo_query(RawQuery(query): RawQuery) -> impl IntoResponse {
        let body = format!(
            r#"[{{"00100020": {{"vr": "LO", "Value": ["{}"]}}}}]"#,
            query.unwrap_or_default().replace('"', "")
        );
        ([(CONTENT_TYPE, DICOM_JSON_MEDIA_TYPE)], body)
    }

    #[test]
    fn builds_query_urls() {
        let url = ArchiveQuery::studies()
            .param("PatientID", "MRN 7&8")
            .modified_since(Some("ge2023-06-15T10:00:00Z"))
            .unwrap()
            .url("http://archive/rs")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://archive/rs/studies?PatientID=MRN+7%268&updatedTime=20230615100000-"
        );
    }

    #[test]
    fn modified_since_ignores_empty_bounds() {
        let url = ArchiveQuery::studies()
            .modified_since(Some("ge"))
            .unwrap()
            .url("http://archive/rs")
            .unwrap();
        assert_eq!(url.as_str(), "http://archive/rs/studies");
    }

    #[test]
    fn lower_bound_comparators_become_open_ranges() {
        for bound in ["2023-01-01", "ge2023-01-01", "gt2023-01-01", "sa2023-01-01"] {
            assert_eq!(
                updated_range(bound).unwrap().as_deref(),
                Some("20230101-"),
                "{bound}"
            );
        }
    }

    #[test]
    fn other_comparators_are_rejected() {
        for bound in [
            "le2023-01-01",
            "lt2023-01-01",
            "eq2023-01-01",
            "ne2023-01-01",
            "eb2023-01-01",
            "ap2023-01-01",
        ] {
            let err = ArchiveQuery::studies().modified_since(Some(bound)).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidParameter(_)), "{bound}: {err}");
        }
    }

    #[tokio::test]
    async fn sends_patient_query() {
        let base = start_test_server(Router::new().route("/studies", get(echo_query))).await;
        let client = ArchiveClient::new(&config_for(&base)).unwrap();

        let records = client.studies_for_patient("12345", None).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].first("00100020"), Some("PatientID=12345"));
    }

    #[tokio::test]
    async fn no_content_is_empty_result() {
        let app = Router::new().route("/studies", get(|| async { AxumStatus::NO_CONTENT }));
        let base = start_test_server(app).await;
        let client = ArchiveClient::new(&config_for(&base)).unwrap();

        assert!(client.studies_for_patient("1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let app = Router::new().route(
            "/studies",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = start_test_server(app).await;
        let client = ArchiveClient::new(&config_for(&base)).unwrap();

        let err = client.studies_for_patient("1", None).await.unwrap_err();
        match err {
            GatewayError::ArchiveUnavailable {
                command, reason, ..
            } => {
                assert!(command.ends_with("/studies?PatientID=1"));
                assert!(reason.contains("503"));
            }
            other => panic!("expected ArchiveUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn html_body_is_malformed() {
        let app = Router::new().route("/studies", get(|| async { "<html>login</html>" }));
        let base = start_test_server(app).await;
        let client = ArchiveClient::new(&config_for(&base)).unwrap();

        let err = client.studies_for_patient("1", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ArchiveMalformedResponse { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let client = ArchiveClient::new(&config_for(&base)).unwrap();

        let err = client.studies_for_patient("1", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::ArchiveUnavailable { .. }));
    }
}
