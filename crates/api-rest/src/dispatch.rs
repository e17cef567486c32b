//! Interceptor dispatch.
//!
//! Requests that match no explicit route reach [`dispatch`], which offers them to each
//! registered [`Interceptor`] in order. The first interceptor whose predicate accepts the
//! request handles it; if none does, the caller gets a `404` OperationOutcome.

use crate::error::outcome_response;
use crate::AppState;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use fhir::IssueType;
use std::sync::Arc;

/// Method, URI and headers of an inbound request; the body travels separately.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }
}

/// A request handler with its own acceptance predicate.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this interceptor takes the request. Must not perform I/O.
    fn handles(&self, head: &RequestHead) -> bool;

    /// Produce the complete response, errors included.
    async fn handle(&self, head: RequestHead, body: Body) -> Response;
}

/// Ordered interceptor chain.
#[derive(Clone, Default)]
pub struct Dispatcher {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Dispatcher {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let head = RequestHead {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        };

        match self.interceptors.iter().find(|i| i.handles(&head)) {
            Some(interceptor) => {
                tracing::info!(
                    "{} intercepted {} {}",
                    interceptor.name(),
                    head.method,
                    head.uri
                );
                interceptor.handle(head, body).await
            }
            None => {
                tracing::debug!("no interceptor for {} {}", head.method, head.uri);
                outcome_response(
                    StatusCode::NOT_FOUND,
                    IssueType::NotFound,
                    format!("no handler for {} {}", head.method, head.path()),
                )
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

/// Router fallback: hand the request to the interceptor chain.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    state.dispatcher.dispatch(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    struct Fixed {
        name: &'static str,
        prefix: &'static str,
    }

    #[async_trait]
    impl Interceptor for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handles(&self, head: &RequestHead) -> bool {
            head.path().starts_with(self.prefix)
        }

        async fn handle(&self, _head: RequestHead, _body: Body) -> Response {
            self.name.into_response()
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(vec![
            Arc::new(Fixed {
                name: "first",
                prefix: "/a",
            }),
            Arc::new(Fixed {
                name: "second",
                prefix: "/",
            }),
        ])
    }

    async fn text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn first_matching_interceptor_wins() {
        let dispatcher = dispatcher();
        assert_eq!(text(dispatcher.dispatch(get("/a/b")).await).await, "first");
        assert_eq!(text(dispatcher.dispatch(get("/b")).await).await, "second");
    }

    #[tokio::test]
    async fn unmatched_requests_get_not_found() {
        let response = Dispatcher::default().dispatch(get("/nothing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(text(response).await.contains("\"not-found\""));
    }
}
