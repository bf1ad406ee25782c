//! Response side of the transformer pipeline

use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::transformers::{ProviderResponse, RequestContext, ResponseBody, Transformer};
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponsePipeline;

impl ResponsePipeline {
    pub fn new() -> Self {
        Self
    }

    /// Run the response hooks, mirroring the request order
    ///
    /// Model chain reversed, provider chain reversed, then the endpoint's
    /// `transform_response_in`. A bypassed request skips every hook.
    pub async fn finish(
        &self,
        endpoint: &Arc<dyn Transformer>,
        provider: &Provider,
        mut response: ProviderResponse,
        bypass: bool,
        ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        if bypass {
            return Ok(response);
        }

        for transformer in provider.model_chain(&ctx.model).iter().rev() {
            response = transformer.transform_response_out(response, ctx).await?;
        }
        for transformer in provider.transformer_chain().iter().rev() {
            response = transformer.transform_response_out(response, ctx).await?;
        }
        endpoint.transform_response_in(response, ctx).await
    }
}

/// Final HTTP answer: upstream status, SSE headers for streams, JSON otherwise
pub fn into_http_response(response: ProviderResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    match response.body {
        ResponseBody::Json(value) => (status, Json(value)).into_response(),
        ResponseBody::Stream(stream) => {
            let mut out = Response::new(Body::from_stream(stream));
            *out.status_mut() = status;
            let headers = out.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            out
        }
    }
}
