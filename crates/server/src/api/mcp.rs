//! `POST /mcp`: one JSON-RPC call answered with a single SSE frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use sluice_mcp::{error_codes, JsonRpcResponse, JSONRPC_VERSION};

use crate::auth::API_KEY_HEADER;
use crate::state::AppState;

/// Runs the call on a spawned task and streams its response as exactly one
/// `data:` frame. If the client disconnects first, the call's cancellation
/// token fires so the backend can abandon the query.
///
/// A body that cannot be read (too large, broken stream) is handled as an
/// empty one, so it still gets a frame.
pub async fn mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let api_key = headers.get(API_KEY_HEADER).cloned();
    let body = body.unwrap_or_else(|rejection| {
        tracing::warn!(status = %rejection.status(), error = %rejection.body_text(), "Unreadable request body");
        Bytes::new()
    });

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(1);
    let gateway = state.gateway.clone();
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        let key = api_key.as_ref().map(|v| v.as_bytes());
        let work = gateway.handle(key, &body, cancel.clone());
        tokio::pin!(work);

        let response = tokio::select! {
            response = &mut work => response,
            _ = tx.closed() => {
                tracing::info!("Client disconnected, cancelling query");
                cancel.cancel();
                work.await
            }
        };

        let _ = tx.send(Ok(response_event(&response))).await;
    });

    Sse::new(ReceiverStream::new(rx))
}

fn response_event(response: &JsonRpcResponse) -> Event {
    match serde_json::to_string(response) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            Event::default().data(internal_error_frame())
        }
    }
}

/// Sent if a response cannot be serialized; built by hand so it cannot fail.
fn internal_error_frame() -> String {
    format!(
        r#"{{"jsonrpc":"{}","error":{{"code":{},"message":"Internal error"}},"id":null}}"#,
        JSONRPC_VERSION,
        error_codes::INTERNAL_ERROR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_frame_is_a_valid_response() {
        let resp: JsonRpcResponse = serde_json::from_str(&internal_error_frame()).unwrap();
        assert_eq!(resp.jsonrpc, "2.0");
        assert!(resp.result.is_none());
        assert_eq!(resp.error.map(|e| e.code), Some(-32603));
        assert_eq!(resp.id, serde_json::Value::Null);
    }
}
