//! Anthropic Messages endpoint
//!
//! Handles POST /v1/messages, streaming and non-streaming. The response body
//! is whatever the answering tier produced, already in Anthropic shape; the
//! tier and backend are reported in response headers only.

use super::extractor::AnthropicJson;
use super::{AppState, BACKEND_HEADER, FORCE_TIER_HEADER, TIER_HEADER};
use crate::backends::{BackendResponse, ChunkStream, Tier};
use crate::error::{AppError, AppResult};
use crate::metrics::{RequestOutcome, log_recording_error};
use crate::middleware::RequestId;
use crate::protocol::{MessageRole, MessagesResponse, RoutedRequest, sse};
use crate::router::{Route, Routed};
use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::convert::Infallible;

/// POST /v1/messages handler
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    AnthropicJson(request): AnthropicJson<RoutedRequest>,
) -> AppResult<Response> {
    tracing::debug!(
        request_id = %request_id,
        model = %request.model(),
        messages_count = request.messages().len(),
        stream = request.stream(),
        "Received messages request"
    );

    let route = requested_route(&headers)?;

    if state.config().routing.loop_guard && request.last_role() == Some(MessageRole::Assistant) {
        tracing::info!(
            request_id = %request_id,
            model = %request.model(),
            "Last message is from the assistant; answering with an empty turn"
        );
        log_recording_error(
            "record_request",
            state.metrics().record_request(RequestOutcome::LoopGuard),
        );
        return Ok(empty_turn(&request));
    }

    let Routed {
        tier,
        backend,
        response,
        outcome,
    } = state.router().route(&request, route).await.inspect_err(|e| {
        tracing::warn!(request_id = %request_id, error = %e, "Request failed");
    })?;

    tracing::info!(
        request_id = %request_id,
        tier = %tier,
        backend = %backend,
        attempts = outcome.attempts().len(),
        "Request answered"
    );

    let mut response = match response {
        BackendResponse::Complete(body) => {
            ([(CONTENT_TYPE, "application/json")], body).into_response()
        }
        BackendResponse::Stream(chunks) => event_stream(chunks),
    };

    let headers = response.headers_mut();
    headers.insert(TIER_HEADER, HeaderValue::from(u16::from(tier.get())));
    if let Ok(value) = HeaderValue::from_str(&backend) {
        headers.insert(BACKEND_HEADER, value);
    }

    Ok(response)
}

/// Read the forced-tier header, if any
fn requested_route(headers: &HeaderMap) -> AppResult<Route> {
    let Some(value) = headers.get(FORCE_TIER_HEADER) else {
        return Ok(Route::Auto);
    };

    let tier = value
        .to_str()
        .map_err(|_| AppError::Validation(format!("{} header is not valid text", FORCE_TIER_HEADER)))?
        .parse::<Tier>()
        .map_err(|e| AppError::Validation(format!("invalid {} header: {}", FORCE_TIER_HEADER, e)))?;

    Ok(Route::Forced(tier))
}

/// Local empty `end_turn` reply in the shape the client asked for
fn empty_turn(request: &RoutedRequest) -> Response {
    if request.stream() {
        let events = sse::text_message_events(request.model(), "", 0);
        let body = futures::stream::iter(events.into_iter().map(Ok::<_, Infallible>));
        sse_response(Body::from_stream(body))
    } else {
        Json(MessagesResponse::empty_turn(request.model())).into_response()
    }
}

/// SSE response for a committed stream
///
/// A failure after commit is rendered as a final `error` event; the
/// connection is then closed normally.
fn event_stream(chunks: ChunkStream) -> Response {
    let body = chunks.map(|item| {
        Ok::<_, Infallible>(match item {
            Ok(bytes) => bytes,
            Err(e) => sse::error_event("api_error", &e.to_string()),
        })
    });
    sse_response(Body::from_stream(body))
}

fn sse_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response()
}
