//! WADO-RS retrieval proxy.
//!
//! Retrievals under `<service-prefix>/studies/` are forwarded to the archive as they are:
//! same method, same headers (minus `Host` and hop-by-hop headers), same query string, and the
//! request body streamed through. The archive's status, headers and body are relayed back the
//! same way. Neither body is ever buffered whole; both are re-cut into chunks of at most
//! `chunk_size` bytes.
//!
//! Before forwarding, the study's owning patient is looked up in the archive. That lookup is
//! best-effort unless retrieval authorization is switched on, in which case the owner must be
//! found and must pass the gatekeeper as `Patient/<archive patient id>`.
//!
//! The upstream deadline never limits how long an upload may take. While a request body is
//! being sent it is an idle deadline between inbound chunks; once the body is complete it
//! bounds the wait for the archive's response head.

use crate::archive::{ArchiveClient, ArchiveQuery};
use crate::config::GatewayConfig;
use crate::constants::{DCM_TAG_PATIENT_ID, IMAGING_STUDY, PATIENT_REFERENCE_PREFIX};
use crate::gatekeeper::Gatekeeper;
use crate::{GatewayError, GatewayResult};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use imaging_types::NonEmptyText;
use reqwest::header::{HeaderMap, HeaderName, CONNECTION, HOST};
use reqwest::{Method, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Depth of the channel feeding an inbound body to the archive, in chunks.
const BODY_CHANNEL_DEPTH: usize = 4;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The archive-relative part of an intercepted retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalTarget {
    /// Everything after `/studies/`, without the query string.
    rest: String,
    query: Option<String>,
}

impl RetrievalTarget {
    /// Match an inbound request path against `<prefix>/studies/`.
    ///
    /// Returns `None` for paths this proxy does not handle.
    pub fn from_request(prefix: &str, path: &str, query: Option<&str>) -> Option<Self> {
        let marker = format!("{prefix}/studies/");
        let index = path.find(&marker)?;
        Some(Self {
            rest: path[index + marker.len()..].to_string(),
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    /// The Study Instance UID: the first path segment after `/studies/`.
    pub fn study_uid(&self) -> Option<&str> {
        self.rest.split('/').next().filter(|uid| !uid.is_empty())
    }

    /// Path below the archive base, e.g. `/studies/1.2.3/series/4.5`.
    pub fn archive_path(&self) -> String {
        format!("/studies/{}", self.rest)
    }

    /// Full forwarding URL including the original query string.
    pub fn archive_url(&self, base_url: &str) -> String {
        match &self.query {
            Some(query) => format!("{base_url}{}?{query}", self.archive_path()),
            None => format!("{base_url}{}", self.archive_path()),
        }
    }
}

/// The archive's answer, ready to be relayed.
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, GatewayResult<Bytes>>,
}

impl std::fmt::Debug for RelayedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Forwards retrievals to the archive.
#[derive(Clone, Debug)]
pub struct RetrievalProxy {
    archive: ArchiveClient,
    gatekeeper: Gatekeeper,
    service_prefix: String,
    chunk_size: usize,
    timeout: Duration,
    authorize: bool,
}

impl RetrievalProxy {
    pub fn new(config: &GatewayConfig, archive: ArchiveClient, gatekeeper: Gatekeeper) -> Self {
        Self {
            archive,
            gatekeeper,
            service_prefix: config.service_prefix().to_string(),
            chunk_size: config.chunk_size(),
            timeout: config.upstream_timeout(),
            authorize: config.authorize_retrievals(),
        }
    }

    /// The target of `path`, if this proxy handles it.
    pub fn target(&self, path: &str, query: Option<&str>) -> Option<RetrievalTarget> {
        RetrievalTarget::from_request(&self.service_prefix, path, query)
    }

    /// Resolve the study's owner and, when enabled, authorize the retrieval for it.
    ///
    /// The owner is presented to the gatekeeper as the relative reference `Patient/<id>`, the
    /// same form ImagingStudy entries use. Without retrieval authorization a failed lookup is
    /// logged and `Ok(None)` returned.
    ///
    /// # Errors
    ///
    /// With retrieval authorization on: [`GatewayError::SubjectUnresolved`] if the owner cannot
    /// be determined, or any error of [`Gatekeeper::authorize_subject`].
    pub async fn admit(
        &self,
        target: &RetrievalTarget,
        headers: &HeaderMap,
    ) -> GatewayResult<Option<NonEmptyText>> {
        match resolve_study_subject(&self.archive, target).await {
            Ok(subject) => {
                tracing::info!(
                    "retrieval of {} belongs to patient {}",
                    target.archive_path(),
                    subject
                );
                if self.authorize {
                    let reference = format!("{PATIENT_REFERENCE_PREFIX}{subject}");
                    self.gatekeeper
                        .authorize_subject(&reference, headers, IMAGING_STUDY)
                        .await?;
                }
                Ok(Some(subject))
            }
            Err(e) if self.authorize => {
                tracing::error!("retrieval refused, owner unresolved: {}", e);
                Err(e)
            }
            Err(e) => {
                tracing::warn!("could not resolve owner of {}: {}", target.archive_path(), e);
                Ok(None)
            }
        }
    }

    /// Send the request to the archive and return its response head and body stream.
    ///
    /// `body` is forwarded for every method except GET and HEAD. An upload may take as long
    /// as it needs provided no gap between inbound chunks exceeds the upstream deadline; the
    /// deadline for the response head starts once the body has been handed over.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ForwardingFailure`] if no response head arrives, with
    /// `timed_out` set when the deadline expired.
    pub async fn forward<S, E>(
        &self,
        method: Method,
        target: &RetrievalTarget,
        headers: &HeaderMap,
        body: S,
    ) -> GatewayResult<RelayedResponse>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let url = target.archive_url(self.archive.base_url());
        tracing::info!("forwarding {} {}", method, url);

        let mut request = self
            .archive
            .http()
            .request(method.clone(), &url)
            .headers(forwardable_headers(headers, true));
        let mut upload = None;
        if method != Method::GET && method != Method::HEAD {
            let (body, sent) = pump_body(body, self.chunk_size, self.timeout);
            request = request.body(body);
            upload = Some(sent);
        }

        let response = match self.response_head(request.send(), upload).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(GatewayError::ForwardingFailure {
                    reason: format!("{method} {url}: {e}"),
                    timed_out: e.is_timeout(),
                })
            }
            Err(_) => {
                return Err(GatewayError::ForwardingFailure {
                    reason: format!("{method} {url}: no response within {:?}", self.timeout),
                    timed_out: true,
                })
            }
        };

        let status = response.status();
        let headers = forwardable_headers(response.headers(), false);
        let body = bounded_chunks(response.bytes_stream(), self.chunk_size)
            .map(move |chunk| {
                chunk.map_err(|e| {
                    tracing::error!("relay of {} aborted: {}", url, e);
                    GatewayError::ForwardingFailure {
                        reason: e.to_string(),
                        timed_out: e.is_timeout(),
                    }
                })
            })
            .boxed();

        Ok(RelayedResponse {
            status,
            headers,
            body,
        })
    }
}

impl RetrievalProxy {
    /// Await the response head. With an upload in progress the deadline starts when the last
    /// chunk has been handed over, or when the upload stops early.
    async fn response_head<F>(
        &self,
        send: F,
        upload: Option<oneshot::Receiver<()>>,
    ) -> Result<reqwest::Result<reqwest::Response>, tokio::time::error::Elapsed>
    where
        F: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let mut send = std::pin::pin!(send);
        if let Some(sent) = upload {
            tokio::select! {
                result = &mut send => return Ok(result),
                _ = sent => {}
            }
        }
        tokio::time::timeout(self.timeout, send).await
    }
}

/// Look up the patient owning the target study.
///
/// # Errors
///
/// Returns [`GatewayError::SubjectUnresolved`] if the path has no study UID or the archive has
/// no patient for it, and archive errors as they are.
pub async fn resolve_study_subject(
    archive: &ArchiveClient,
    target: &RetrievalTarget,
) -> GatewayResult<NonEmptyText> {
    let uid = target
        .study_uid()
        .ok_or_else(|| GatewayError::SubjectUnresolved {
            reference: target.archive_path(),
            reason: "no study UID in path".into(),
        })?;

    let records = archive
        .query(&ArchiveQuery::studies().param("StudyInstanceUID", uid))
        .await?;

    records
        .first()
        .and_then(|record| record.first(DCM_TAG_PATIENT_ID))
        .and_then(|id| NonEmptyText::new(id).ok())
        .ok_or_else(|| GatewayError::SubjectUnresolved {
            reference: uid.to_string(),
            reason: "archive has no patient for this study".into(),
        })
}

/// Copy headers in order, dropping hop-by-hop headers, anything named by `Connection`,
/// and `Host` when `drop_host` is set.
pub fn forwardable_headers(headers: &HeaderMap, drop_host: bool) -> HeaderMap {
    let connection_named: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let keep = |name: &HeaderName| {
        let name = name.as_str();
        !(HOP_BY_HOP.contains(&name)
            || connection_named.iter().any(|c| c == name)
            || (drop_host && name == HOST.as_str()))
    };

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if keep(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Re-cut a byte stream so that no chunk exceeds `chunk_size` bytes. Chunks are split without
/// copying; errors pass through in place.
pub fn bounded_chunks<S, E>(body: S, chunk_size: usize) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let chunk_size = chunk_size.max(1);
    body.flat_map(move |item| {
        let pieces = match item {
            Ok(mut bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len() / chunk_size + 1);
                while bytes.len() > chunk_size {
                    pieces.push(Ok(bytes.split_to(chunk_size)));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(bytes));
                }
                pieces
            }
            Err(e) => vec![Err(e)],
        };
        stream::iter(pieces)
    })
}

/// Feed `body` to the outbound request through a bounded channel.
///
/// The receiver resolves once the whole body has been handed to the channel, and is dropped
/// unresolved when the body fails or stays idle for longer than `idle`.
fn pump_body<S, E>(
    body: S,
    chunk_size: usize,
    idle: Duration,
) -> (reqwest::Body, oneshot::Receiver<()>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_DEPTH);
    let (sent_tx, sent_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut chunks = std::pin::pin!(bounded_chunks(body, chunk_size));
        loop {
            let chunk = match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(bytes))) => Ok(bytes),
                Ok(Some(Err(e))) => {
                    tracing::error!("inbound retrieval body failed: {}", e);
                    Err(std::io::Error::other(e.to_string()))
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("inbound retrieval body idle for {:?}", idle);
                    Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("request body idle for {idle:?}"),
                    ))
                }
            };
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                return;
            }
        }
        // the receiver is gone if the archive answered before the upload finished
        let _ = sent_tx.send(());
    });
    (reqwest::Body::wrap_stream(ReceiverStream::new(rx)), sent_rx)
}
