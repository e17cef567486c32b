//! Gateway runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into every component.
//! Nothing in the request path reads environment variables; the binaries hand the environment
//! to [`config_from_lookup`], which parses each `IMAGING_*` variable with the
//! `*_from_env_value` helpers below.

use crate::constants::{
    DEFAULT_ARCHIVE_BASE_URL, DEFAULT_CHUNK_SIZE, DEFAULT_INTROSPECTION_URL,
    DEFAULT_SERVICE_PREFIX, DEFAULT_UPSTREAM_TIMEOUT_SECS,
};
use crate::gatekeeper::ScopePolicy;
use crate::{GatewayError, GatewayResult};
use reqwest::Url;
use std::time::Duration;

/// Gateway configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    archive_base_url: String,
    introspection_url: String,
    authentication_enabled: bool,
    chunk_size: usize,
    service_prefix: String,
    scope_policy: ScopePolicy,
    upstream_timeout: Duration,
    patient_lookup_url: Option<String>,
    authorize_retrievals: bool,
    public_base_url: Option<String>,
}

impl GatewayConfig {
    /// Create a new `GatewayConfig` with defaults for everything but the four core options.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidConfig`] if:
    /// - either URL is not an absolute `http`/`https` URL,
    /// - `chunk_size` is zero.
    pub fn new(
        archive_base_url: impl AsRef<str>,
        introspection_url: impl AsRef<str>,
        authentication_enabled: bool,
        chunk_size: usize,
    ) -> GatewayResult<Self> {
        if chunk_size == 0 {
            return Err(GatewayError::InvalidConfig(
                "chunk_size must be at least 1 byte".into(),
            ));
        }

        Ok(Self {
            archive_base_url: validate_http_url("archive base URL", archive_base_url.as_ref())?,
            introspection_url: validate_http_url(
                "introspection URL",
                introspection_url.as_ref(),
            )?,
            authentication_enabled,
            chunk_size,
            service_prefix: normalise_prefix(DEFAULT_SERVICE_PREFIX),
            scope_policy: ScopePolicy::default(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            patient_lookup_url: None,
            authorize_retrievals: false,
            public_base_url: None,
        })
    }

    /// Set the path prefix in front of resource paths and `/studies/`.
    ///
    /// The prefix is normalised to start with `/` and to have no trailing `/`; an empty
    /// prefix means resources live at the root.
    pub fn with_service_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.service_prefix = normalise_prefix(prefix.as_ref());
        self
    }

    pub fn with_scope_policy(mut self, policy: ScopePolicy) -> Self {
        self.scope_policy = policy;
        self
    }

    /// Set the deadline applied to every outbound call.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> GatewayResult<Self> {
        if timeout.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "upstream timeout must be non-zero".into(),
            ));
        }
        self.upstream_timeout = timeout;
        Ok(self)
    }

    /// Resolve patient MRNs through a FHIR server instead of using the reference id.
    pub fn with_patient_lookup_url(mut self, url: Option<&str>) -> GatewayResult<Self> {
        self.patient_lookup_url = url
            .map(|u| validate_http_url("patient lookup URL", u))
            .transpose()?;
        Ok(self)
    }

    /// Require retrievals to pass the gatekeeper for the study's owning patient.
    ///
    /// The owner is presented to introspection as `Patient/<archive patient id>`. Searches pass
    /// the `patient` parameter as the client sent it, so tokens are checked against the same
    /// subject when clients search with relative references and the archive patient id equals
    /// the reference id.
    pub fn with_authorize_retrievals(mut self, enabled: bool) -> Self {
        self.authorize_retrievals = enabled;
        self
    }

    /// Externally visible base URL used for Bundle self links.
    pub fn with_public_base_url(mut self, url: Option<&str>) -> GatewayResult<Self> {
        self.public_base_url = url
            .map(|u| validate_http_url("public base URL", u))
            .transpose()?;
        Ok(self)
    }

    /// Archive base URL, without a trailing slash.
    pub fn archive_base_url(&self) -> &str {
        &self.archive_base_url
    }

    pub fn introspection_url(&self) -> &str {
        &self.introspection_url
    }

    pub fn authentication_enabled(&self) -> bool {
        self.authentication_enabled
    }

    /// Maximum size of a relayed body chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn service_prefix(&self) -> &str {
        &self.service_prefix
    }

    pub fn scope_policy(&self) -> &ScopePolicy {
        &self.scope_policy
    }

    pub fn upstream_timeout(&self) -> Duration {
        self.upstream_timeout
    }

    pub fn patient_lookup_url(&self) -> Option<&str> {
        self.patient_lookup_url.as_deref()
    }

    /// Only meaningful when authentication is enabled.
    pub fn authorize_retrievals(&self) -> bool {
        self.authentication_enabled && self.authorize_retrievals
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }
}

fn validate_http_url(what: &str, value: &str) -> GatewayResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|e| GatewayError::InvalidConfig(format!("{what} '{value}' is invalid: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidConfig(format!(
            "{what} '{value}' must use http or https"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalise_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build a configuration from `IMAGING_*` variables supplied by `lookup`.
///
/// Binaries pass `|name| std::env::var(name).ok()`; unset variables take their defaults.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidConfig`] for any value that fails to parse or validate.
pub fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GatewayResult<GatewayConfig> {
    let archive = non_empty(lookup("IMAGING_ARCHIVE_BASE_URL"))
        .unwrap_or_else(|| DEFAULT_ARCHIVE_BASE_URL.into());
    let introspection = non_empty(lookup("IMAGING_INTROSPECTION_URL"))
        .unwrap_or_else(|| DEFAULT_INTROSPECTION_URL.into());
    let authentication_enabled = bool_from_env_value(
        "IMAGING_AUTHENTICATION_ENABLED",
        lookup("IMAGING_AUTHENTICATION_ENABLED"),
        true,
    )?;
    let chunk_size = chunk_size_from_env_value(lookup("IMAGING_CHUNK_SIZE"))?;

    GatewayConfig::new(archive, introspection, authentication_enabled, chunk_size)?
        .with_service_prefix(
            lookup("IMAGING_SERVICE_PREFIX").unwrap_or_else(|| DEFAULT_SERVICE_PREFIX.into()),
        )
        .with_scope_policy(scope_policy_from_env_value(
            lookup("IMAGING_SCOPE_CONTEXTS"),
            lookup("IMAGING_SCOPE_ALLOW_UNPREFIXED"),
        )?)
        .with_upstream_timeout(timeout_from_env_value(lookup(
            "IMAGING_UPSTREAM_TIMEOUT_SECS",
        ))?)?
        .with_patient_lookup_url(non_empty(lookup("IMAGING_PATIENT_LOOKUP_URL")).as_deref())?
        .with_authorize_retrievals(bool_from_env_value(
            "IMAGING_AUTHORIZE_RETRIEVALS",
            lookup("IMAGING_AUTHORIZE_RETRIEVALS"),
            false,
        )?)
        .with_public_base_url(non_empty(lookup("IMAGING_PUBLIC_BASE_URL")).as_deref())
}

/// Parse a boolean flag from an optional string value.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` (case-insensitive). `None` or
/// empty/whitespace yields `default`.
pub fn bool_from_env_value(name: &str, value: Option<String>, default: bool) -> GatewayResult<bool> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(GatewayError::InvalidConfig(format!(
                "{name} must be a boolean, got '{v}'"
            ))),
        },
    }
}

/// Parse the relay chunk size. `None` or empty yields the default of 16 KiB.
pub fn chunk_size_from_env_value(value: Option<String>) -> GatewayResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_CHUNK_SIZE),
        Some(v) => match v.parse::<usize>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(GatewayError::InvalidConfig(format!(
                "chunk size must be a positive integer, got '{v}'"
            ))),
        },
    }
}

/// Parse the outbound deadline in whole seconds. `None` or empty yields 30 seconds.
pub fn timeout_from_env_value(value: Option<String>) -> GatewayResult<Duration> {
    match non_empty(value) {
        None => Ok(Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS)),
        Some(v) => match v.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(GatewayError::InvalidConfig(format!(
                "upstream timeout must be a positive number of seconds, got '{v}'"
            ))),
        },
    }
}

/// Parse the scope policy from a comma-separated context list and an unprefixed-entry flag.
///
/// `None` or empty yields the default contexts (`patient`, `user`) and accepts unprefixed
/// entries.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidConfig`] if the flag is not a boolean.
pub fn scope_policy_from_env_value(
    contexts: Option<String>,
    allow_unprefixed: Option<String>,
) -> GatewayResult<ScopePolicy> {
    let defaults = ScopePolicy::default();
    let contexts = match non_empty(contexts) {
        None => defaults.contexts().to_vec(),
        Some(v) => v
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
    };
    let allow_unprefixed = bool_from_env_value(
        "IMAGING_SCOPE_ALLOW_UNPREFIXED",
        allow_unprefixed,
        defaults.allows_unprefixed(),
    )?;
    Ok(ScopePolicy::new(contexts, allow_unprefixed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::new(
            "http://archive.local/rs/",
            "http://auth.local/introspect",
            true,
            1024,
        )
        .expect("valid config")
    }

    #[test]
    fn trims_trailing_slash_from_urls() {
        assert_eq!(config().archive_base_url(), "http://archive.local/rs");
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = GatewayConfig::new("http://a", "http://b", true, 0).expect_err("zero chunk");
        assert!(matches!(err, GatewayError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = GatewayConfig::new("ftp://a", "http://b", true, 1).expect_err("ftp");
        assert!(err.to_string().contains("http or https"));
        assert!(GatewayConfig::new("not a url", "http://b", true, 1).is_err());
    }

    #[test]
    fn normalises_service_prefix() {
        assert_eq!(
            config().with_service_prefix("baseDstu3/").service_prefix(),
            "/baseDstu3"
        );
        assert_eq!(config().with_service_prefix("/").service_prefix(), "");
    }

    #[test]
    fn retrieval_authorization_requires_authentication() {
        let cfg = GatewayConfig::new("http://a", "http://b", false, 1)
            .expect("valid")
            .with_authorize_retrievals(true);
        assert!(!cfg.authorize_retrievals());
        assert!(config().with_authorize_retrievals(true).authorize_retrievals());
    }

    #[test]
    fn parses_env_values() {
        assert!(bool_from_env_value("X", None, true).expect("default"));
        assert!(!bool_from_env_value("X", Some(" Off ".into()), true).expect("off"));
        assert!(bool_from_env_value("X", Some("maybe".into()), true).is_err());

        assert_eq!(chunk_size_from_env_value(None).expect("default"), 16384);
        assert_eq!(chunk_size_from_env_value(Some("512".into())).expect("512"), 512);
        assert!(chunk_size_from_env_value(Some("0".into())).is_err());

        assert_eq!(
            timeout_from_env_value(Some("5".into())).expect("5s"),
            Duration::from_secs(5)
        );
        assert!(timeout_from_env_value(Some("-1".into())).is_err());

        let policy = scope_policy_from_env_value(Some("patient, system".into()), None)
            .expect("contexts");
        assert_eq!(policy.contexts(), ["patient", "system"]);
        assert!(policy.allows_unprefixed());
        assert!(scope_policy_from_env_value(None, Some("sometimes".into())).is_err());
    }

    #[test]
    fn unset_environment_gives_defaults() {
        let cfg = config_from_lookup(|_| None).expect("defaults");
        assert_eq!(cfg.archive_base_url(), DEFAULT_ARCHIVE_BASE_URL);
        assert_eq!(cfg.introspection_url(), DEFAULT_INTROSPECTION_URL);
        assert!(cfg.authentication_enabled());
        assert_eq!(cfg.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.service_prefix(), "/baseDstu3");
        assert_eq!(cfg.scope_policy(), &ScopePolicy::default());
        assert_eq!(cfg.upstream_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.patient_lookup_url(), None);
        assert!(!cfg.authorize_retrievals());
        assert_eq!(cfg.public_base_url(), None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("IMAGING_ARCHIVE_BASE_URL", "https://pacs.local/rs"),
            ("IMAGING_AUTHENTICATION_ENABLED", "false"),
            ("IMAGING_CHUNK_SIZE", "4096"),
            ("IMAGING_SERVICE_PREFIX", "fhir"),
            ("IMAGING_PATIENT_LOOKUP_URL", "http://fhir.local/r3"),
            ("IMAGING_PUBLIC_BASE_URL", ""),
            ("IMAGING_SCOPE_ALLOW_UNPREFIXED", "false"),
        ]
        .into_iter()
        .collect();

        let cfg = config_from_lookup(|name| vars.get(name).map(|v| v.to_string()))
            .expect("valid overrides");

        assert_eq!(cfg.archive_base_url(), "https://pacs.local/rs");
        assert!(!cfg.authentication_enabled());
        assert_eq!(cfg.chunk_size(), 4096);
        assert_eq!(cfg.service_prefix(), "/fhir");
        assert_eq!(cfg.patient_lookup_url(), Some("http://fhir.local/r3"));
        assert_eq!(cfg.public_base_url(), None);
        assert!(!cfg.scope_policy().allows_unprefixed());
        assert!(!cfg
            .scope_policy()
            .grants("ImagingStudy.read", "ImagingStudy", "read"));
        assert!(cfg
            .scope_policy()
            .grants("patient/ImagingStudy.read", "ImagingStudy", "read"));
    }

    #[test]
    fn invalid_environment_values_are_reported() {
        let err = config_from_lookup(|name| {
            (name == "IMAGING_CHUNK_SIZE").then(|| "lots".to_string())
        })
        .expect_err("bad chunk size");
        assert!(matches!(err, GatewayError::InvalidConfig(_)));
    }
}
