//! `<prefix>/studies/...` interceptor: streams retrievals to and from the archive.

use crate::dispatch::{Interceptor, RequestHead};
use crate::error::ApiError;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use imaging_core::retrieval::RetrievalProxy;

/// Relays WADO-RS retrievals.
pub struct RetrievalInterceptor {
    proxy: RetrievalProxy,
}

impl RetrievalInterceptor {
    pub fn new(proxy: RetrievalProxy) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Interceptor for RetrievalInterceptor {
    fn name(&self) -> &'static str {
        "retrieval-proxy"
    }

    fn handles(&self, head: &RequestHead) -> bool {
        self.proxy.target(head.path(), head.query()).is_some()
    }

    async fn handle(&self, head: RequestHead, body: Body) -> Response {
        let Some(target) = self.proxy.target(head.path(), head.query()) else {
            return ApiError(imaging_core::GatewayError::InvalidParameter(format!(
                "{} is not a retrieval path",
                head.path()
            )))
            .into_response();
        };

        if let Err(e) = self.proxy.admit(&target, &head.headers).await {
            return ApiError(e).into_response();
        }

        let relayed = match self
            .proxy
            .forward(head.method, &target, &head.headers, body.into_data_stream())
            .await
        {
            Ok(relayed) => relayed,
            Err(e) => return ApiError(e).into_response(),
        };

        let mut response = Response::new(Body::from_stream(relayed.body));
        *response.status_mut() = relayed.status;
        *response.headers_mut() = relayed.headers;
        response
    }
}
