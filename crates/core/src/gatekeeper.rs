//! Authorization gatekeeper.
//!
//! Every crossing into the archive is gated by a bearer token issued for a patient. The
//! gatekeeper:
//! - takes the subject from the `patient` search parameter (or from the retrieval proxy's
//!   resolved study owner),
//! - takes the credential from a single `Authorization: Bearer <token>` header,
//! - asks the introspection authority which scopes the token carries,
//! - matches those scopes against a [`ScopePolicy`].
//!
//! Parameter and credential problems are reported before any network call. When
//! authentication is disabled every request is granted without inspection.

use crate::config::GatewayConfig;
use crate::constants::READ_ACTION;
use crate::introspection::TokenIntrospector;
use crate::params::SearchParams;
use crate::{GatewayError, GatewayResult};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use std::sync::Arc;

/// Which scope entries grant which `<ResourceType>.<action>`.
///
/// An entry has the form `[<context>/]<type>.<perm>`. `<context>` must be one of the accepted
/// contexts, or absent when unprefixed entries are allowed. `<type>` is the resource type or
/// `*`. `<perm>` is the action itself, `*`, or a SMART v2 permission string such as `rs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopePolicy {
    contexts: Vec<String>,
    allow_unprefixed: bool,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self::new(vec!["patient".into(), "user".into()], true)
    }
}

impl ScopePolicy {
    pub fn new(contexts: Vec<String>, allow_unprefixed: bool) -> Self {
        Self {
            contexts,
            allow_unprefixed,
        }
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn allows_unprefixed(&self) -> bool {
        self.allow_unprefixed
    }

    /// Whether a single scope entry grants `action` on `resource_type`.
    pub fn grants(&self, entry: &str, resource_type: &str, action: &str) -> bool {
        let target = match entry.split_once('/') {
            Some((context, target)) => {
                if !self.contexts.iter().any(|c| c == context) {
                    return false;
                }
                target
            }
            None if self.allow_unprefixed => entry,
            None => return false,
        };

        let Some((scope_type, perm)) = target.split_once('.') else {
            return false;
        };
        if scope_type != "*" && scope_type != resource_type {
            return false;
        }

        let perm = perm.split_once('?').map_or(perm, |(p, _)| p);
        perm == "*" || perm == action || smart_v2_grants(perm, action)
    }

    /// Whether any of `scopes` grants `action` on `resource_type`.
    pub fn permits<'a>(
        &self,
        scopes: impl IntoIterator<Item = &'a str>,
        resource_type: &str,
        action: &str,
    ) -> bool {
        scopes
            .into_iter()
            .any(|entry| self.grants(entry, resource_type, action))
    }
}

fn smart_v2_grants(perm: &str, action: &str) -> bool {
    let letter = match action {
        "create" => 'c',
        "read" => 'r',
        "update" => 'u',
        "delete" => 'd',
        "search" => 's',
        _ => return false,
    };
    !perm.is_empty() && perm.chars().all(|c| "cruds".contains(c)) && perm.contains(letter)
}

/// Outcome of one authorization check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthDecision {
    pub granted: bool,
    pub reason: String,
}

impl AuthDecision {
    fn grant(reason: impl Into<String>) -> Self {
        Self {
            granted: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
        }
    }
}

/// Orchestrates credential extraction, introspection and scope matching.
#[derive(Clone)]
pub struct Gatekeeper {
    authentication_enabled: bool,
    policy: ScopePolicy,
    introspector: Arc<dyn TokenIntrospector>,
}

impl Gatekeeper {
    pub fn new(config: &GatewayConfig, introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self {
            authentication_enabled: config.authentication_enabled(),
            policy: config.scope_policy().clone(),
            introspector,
        }
    }

    pub fn authentication_enabled(&self) -> bool {
        self.authentication_enabled
    }

    /// Authorize a read of `resource_type` for the request's `patient` parameter.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::MissingParameter`] if `patient` is absent or blank,
    /// - [`GatewayError::InvalidCredential`] if the `Authorization` header is missing,
    ///   repeated or not a bearer token,
    /// - [`GatewayError::IntrospectionRejected`] if the authority does not confirm the token,
    /// - [`GatewayError::AuthorizationDenied`] if no granted scope covers the read.
    pub async fn authorize(
        &self,
        params: &SearchParams,
        headers: &HeaderMap,
        resource_type: &str,
    ) -> GatewayResult<AuthDecision> {
        if !self.authentication_enabled {
            return Ok(AuthDecision::grant("authentication disabled"));
        }

        let subject = params
            .first_non_empty("patient")
            .ok_or_else(|| GatewayError::MissingParameter("patient".into()))?;

        self.authorize_subject(subject, headers, resource_type).await
    }

    /// Authorize a read of `resource_type` for an already known subject.
    ///
    /// # Errors
    ///
    /// As [`Gatekeeper::authorize`], without the parameter check.
    pub async fn authorize_subject(
        &self,
        subject: &str,
        headers: &HeaderMap,
        resource_type: &str,
    ) -> GatewayResult<AuthDecision> {
        if !self.authentication_enabled {
            return Ok(AuthDecision::grant("authentication disabled"));
        }

        let token = bearer_token(headers)?;
        let decision = self.decide(subject, token, resource_type).await?;
        if decision.granted {
            tracing::debug!("granted {}.{} for {}", resource_type, READ_ACTION, subject);
            Ok(decision)
        } else {
            tracing::warn!(
                "denied {}.{} for {}: {}",
                resource_type,
                READ_ACTION,
                subject,
                decision.reason
            );
            Err(GatewayError::AuthorizationDenied(decision.reason))
        }
    }

    async fn decide(
        &self,
        subject: &str,
        token: &str,
        resource_type: &str,
    ) -> GatewayResult<AuthDecision> {
        let result = self
            .introspector
            .introspect(token, subject)
            .await
            .inspect_err(|e| tracing::warn!("introspection failed for {}: {}", subject, e))?;

        if self.policy.permits(result.scopes(), resource_type, READ_ACTION) {
            Ok(AuthDecision::grant(format!(
                "scope grants {resource_type}.{READ_ACTION}"
            )))
        } else {
            Ok(AuthDecision::deny(format!(
                "no granted scope covers {resource_type}.{READ_ACTION} (granted: '{}')",
                result.scope
            )))
        }
    }
}

impl std::fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("authentication_enabled", &self.authentication_enabled)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// The token of the single `Authorization: Bearer <token>` header.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidCredential`] for zero or several `Authorization` headers,
/// a scheme other than `Bearer`, or an empty token.
pub fn bearer_token(headers: &HeaderMap) -> GatewayResult<&str> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = match (values.next(), values.next()) {
        (Some(value), None) => value,
        (None, _) => {
            return Err(GatewayError::InvalidCredential(
                "missing Authorization header".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(GatewayError::InvalidCredential(
                "more than one Authorization header".into(),
            ))
        }
    };

    let value = value.to_str().map_err(|_| {
        GatewayError::InvalidCredential("Authorization header is not visible ASCII".into())
    })?;
    let (scheme, token) = value.trim().split_once(' ').ok_or_else(|| {
        GatewayError::InvalidCredential("Authorization header is not 'Bearer <token>'".into())
    })?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GatewayError::InvalidCredential(format!(
            "unsupported authorization scheme '{scheme}'"
        )));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(GatewayError::InvalidCredential("empty bearer token".into()));
    }
    Ok(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::IMAGING_STUDY;
    use crate::introspection::IntrospectionResult;
    use async_trait::async_trait;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Introspector that grants a fixed scope string and records the subjects it was asked about.
    pub(crate) struct StubIntrospector {
        scope: Option<String>,
        pub(crate) calls: AtomicUsize,
        subjects: Mutex<Vec<String>>,
    }

    impl StubIntrospector {
        pub(crate) fn granting(scope: &str) -> Arc<Self> {
            Arc::new(Self {
                scope: Some(scope.to_string()),
                calls: AtomicUsize::new(0),
                subjects: Mutex::default(),
            })
        }

        pub(crate) fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                scope: None,
                calls: AtomicUsize::new(0),
                subjects: Mutex::default(),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn subjects(&self) -> Vec<String> {
            self.subjects.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenIntrospector for StubIntrospector {
        async fn introspect(
            &self,
            _token: &str,
            subject: &str,
        ) -> GatewayResult<IntrospectionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().unwrap().push(subject.to_string());
            match &self.scope {
                Some(scope) => Ok(IntrospectionResult {
                    subject: subject.to_string(),
                    scope: scope.clone(),
                }),
                None => Err(GatewayError::IntrospectionRejected("stub says no".into())),
            }
        }
    }

    pub(crate) fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn gatekeeper(introspector: Arc<StubIntrospector>, enabled: bool) -> Gatekeeper {
        let config = GatewayConfig::new("http://a", "http://b", enabled, 1).unwrap();
        Gatekeeper::new(&config, introspector)
    }

    fn patient(value: &str) -> SearchParams {
        [("patient", value)].into_iter().collect()
    }

    #[test]
    fn policy_matches_scope_forms() {
        let policy = ScopePolicy::default();
        let grants = |entry| policy.grants(entry, IMAGING_STUDY, READ_ACTION);

        assert!(grants("patient/ImagingStudy.read"));
        assert!(grants("user/ImagingStudy.*"));
        assert!(grants("patient/*.read"));
        assert!(grants("ImagingStudy.read"));
        assert!(grants("patient/ImagingStudy.rs"));
        assert!(grants("patient/ImagingStudy.r?category=x"));

        assert!(!grants("patient/Observation.read"));
        assert!(!grants("system/ImagingStudy.read"));
        assert!(!grants("patient/ImagingStudy.write"));
        assert!(!grants("patient/ImagingStudy.cud"));
        assert!(!grants("launch/patient"));
        assert!(!grants("openid"));
    }

    #[test]
    fn policy_can_require_context() {
        let policy = ScopePolicy::new(vec!["system".into()], false);
        assert!(!policy.grants("ImagingStudy.read", IMAGING_STUDY, READ_ACTION));
        assert!(policy.grants("system/ImagingStudy.read", IMAGING_STUDY, READ_ACTION));
    }

    #[test]
    fn search_action_uses_s_permission() {
        let policy = ScopePolicy::default();
        assert!(policy.grants("patient/ImagingStudy.s", IMAGING_STUDY, "search"));
        assert!(!policy.grants("patient/ImagingStudy.r", IMAGING_STUDY, "search"));
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token(&bearer("abc")).unwrap(), "abc");

        let mut lower = HeaderMap::new();
        lower.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&lower).unwrap(), "xyz");

        for value in ["Basic dXNlcg==", "Bearer ", "Bearer"] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
            assert!(
                matches!(bearer_token(&headers), Err(GatewayError::InvalidCredential(_))),
                "{value}"
            );
        }
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn missing_patient_never_calls_introspection() {
        let stub = StubIntrospector::granting("patient/ImagingStudy.read");
        let gate = gatekeeper(stub.clone(), true);

        let err = gate
            .authorize(&SearchParams::default(), &bearer("t"), IMAGING_STUDY)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::MissingParameter(ref p) if p == "patient"));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn two_authorization_headers_are_invalid() {
        let stub = StubIntrospector::granting("patient/ImagingStudy.read");
        let gate = gatekeeper(stub.clone(), true);
        let mut headers = bearer("one");
        headers.append(AUTHORIZATION, HeaderValue::from_static("Bearer two"));

        let err = gate
            .authorize(&patient("1"), &headers, IMAGING_STUDY)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidCredential(_)));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn imaging_study_read_is_granted() {
        let stub = StubIntrospector::granting("launch patient/ImagingStudy.read");
        let gate = gatekeeper(stub.clone(), true);

        let decision = gate
            .authorize(&patient("Patient/1"), &bearer("t"), IMAGING_STUDY)
            .await
            .unwrap();

        assert!(decision.granted);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn other_resource_scope_is_denied() {
        let stub = StubIntrospector::granting("patient/Observation.read");
        let gate = gatekeeper(stub, true);

        let err = gate
            .authorize(&patient("1"), &bearer("t"), IMAGING_STUDY)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::AuthorizationDenied(_)));
        assert_eq!(err.client_message(), "Authorization failed");
    }

    #[tokio::test]
    async fn rejected_introspection_is_reported() {
        let gate = gatekeeper(StubIntrospector::rejecting(), true);
        let err = gate
            .authorize(&patient("1"), &bearer("t"), IMAGING_STUDY)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::IntrospectionRejected(_)));
    }

    #[tokio::test]
    async fn disabled_authentication_grants_everything() {
        let stub = StubIntrospector::rejecting();
        let gate = gatekeeper(stub.clone(), false);

        let decision = gate
            .authorize(&SearchParams::default(), &HeaderMap::new(), IMAGING_STUDY)
            .await
            .unwrap();

        assert!(decision.granted);
        assert_eq!(stub.calls(), 0);
    }
}
