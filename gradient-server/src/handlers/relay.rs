//! Streaming turn relay.
//!
//! Once the agent has accepted a streaming request, a relay task reads its
//! events, forwards every text fragment to the caller as an SSE frame, and
//! accumulates the reply. Whatever way streaming ends (agent `[DONE]`, body
//! closed, transport error, caller gone, explicit cancel) the accumulated
//! text is persisted as one assistant message before the task exits.
//!
//! The SSE body holds a [`DropGuard`] of the turn's cancellation token, so a
//! disconnecting caller stops the relay and closes the upstream connection.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::{Stream, StreamExt};
use gradient_agent::{AgentError, CompletionStream, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn, Instrument};

use crate::entities::dao::Message;
use crate::entities::SqliteStore;
use crate::error::ServerError;
use crate::handlers::conversation::{persist_reply, PreparedTurn};
use crate::state::{AppState, Turn};

/// Frames buffered between the relay task and the SSE body.
const RELAY_BUFFER: usize = 64;

/// Terminal frame after a successful turn.
pub const DONE_MARKER: &str = "[DONE]";

/// How the streaming phase ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Closed,
    Cancelled,
    Disconnected,
    Failed(AgentError),
}

/// SSE body of one turn. Dropping it cancels the turn.
pub struct TurnEvents {
    frames: ReceiverStream<Event>,
    _cancel_on_drop: DropGuard,
}

impl Stream for TurnEvents {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx).map(|f| f.map(Ok))
    }
}

/// Open the agent stream and hand it to a relay task.
///
/// Errors raised before the agent answers (non-2xx, unreachable) are returned
/// as ordinary HTTP errors since no response has been started.
pub async fn start(
    state: &AppState,
    prepared: PreparedTurn,
) -> Result<Sse<KeepAliveStream<TurnEvents>>, ServerError> {
    let conversation_id = prepared.turn.conversation_id().to_owned();
    let upstream = state
        .agent
        .stream(&prepared.endpoint, &prepared.history, prepared.flags)
        .await
        .inspect_err(|e| {
            warn!(conversation_id = %conversation_id, error = %e, "agent refused stream")
        })?;

    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let guard = prepared.turn.token().clone().drop_guard();
    let span = tracing::info_span!("relay", conversation_id = %conversation_id);
    tokio::spawn(relay(Arc::clone(&state.store), prepared.turn, upstream, tx).instrument(span));

    Ok(Sse::new(TurnEvents {
        frames: ReceiverStream::new(rx),
        _cancel_on_drop: guard,
    })
    .keep_alive(KeepAlive::default()))
}

async fn relay(
    store: Arc<SqliteStore>,
    turn: Turn,
    mut upstream: CompletionStream,
    tx: mpsc::Sender<Event>,
) {
    let token = turn.token().clone();
    let mut reply = String::new();
    let mut fragments = 0usize;

    info!("relay started");
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break Outcome::Cancelled,
            next = upstream.next() => next,
        };
        match next {
            Some(Ok(StreamEvent::Done)) => break Outcome::Completed,
            Some(Ok(event)) => {
                if let StreamEvent::Raw(raw) = &event {
                    debug!(raw = %raw, "forwarding unrecognised chunk verbatim");
                }
                let Some(text) = event.text() else { continue };
                reply.push_str(text);
                fragments += 1;
                if tx.send(Event::default().data(text)).await.is_err() {
                    break Outcome::Disconnected;
                }
            }
            Some(Err(e)) => break Outcome::Failed(e),
            None => break Outcome::Closed,
        }
    };
    // Closes the upstream connection before the store is touched.
    drop(upstream);

    finalize(&store, turn.conversation_id(), reply).await;
    let conversation_id = turn.conversation_id().to_owned();
    drop(turn);

    let terminal = match &outcome {
        Outcome::Completed | Outcome::Closed | Outcome::Cancelled => {
            Some(Event::default().data(DONE_MARKER))
        }
        Outcome::Failed(e) => Some(Event::default().event("error").data(e.to_string())),
        Outcome::Disconnected => None,
    };
    if let Some(frame) = terminal {
        // The caller may already be gone; nothing left to deliver then.
        let _ = tx.send(frame).await;
    }

    match outcome {
        Outcome::Failed(e) => {
            warn!(conversation_id = %conversation_id, fragments, error = %e, "relay failed mid-stream")
        }
        other => info!(conversation_id = %conversation_id, fragments, outcome = ?other, "relay finished"),
    }
}

/// Persist the accumulated reply, if any. Failures are logged: the caller has
/// already received the text and no response status can change anymore.
async fn finalize(store: &SqliteStore, conversation_id: &str, reply: String) {
    if reply.is_empty() {
        debug!("no content accumulated; nothing to persist");
        return;
    }
    let chars = reply.chars().count();
    match persist_reply(store, Message::assistant(conversation_id, reply)).await {
        Ok(()) => info!(chars, "assistant reply persisted"),
        Err(e) => warn!(error = %e, "failed to persist assistant reply"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::dao::Role;
    use crate::entities::{ConversationStore, MessageStore};
    use crate::handlers::conversation::{create, prepare_turn};
    use crate::handlers::testing::{point_at, test_state};
    use crate::middleware::AuthUser;
    use crate::schemas::conversation::{CreateConversationRequest, SendMessageRequest};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alice() -> AuthUser {
        AuthUser {
            id: "alice".into(),
            role: None,
        }
    }

    async fn agent_streaming(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body.to_owned()),
            )
            .mount(&server)
            .await;
        server
    }

    /// Run one streaming turn to completion and return the SSE body text.
    async fn run_turn(state: &AppState, conversation_id: &str) -> String {
        let prepared = prepare(state, conversation_id).await;
        let response = start(state, prepared).await.unwrap().into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn new_conversation(state: &AppState) -> String {
        create(state, &alice(), CreateConversationRequest::default())
            .await
            .unwrap()
            .id
    }

    /// The relay deregisters the turn right after persisting; wait for it.
    async fn wait_idle(state: &AppState, id: &str) {
        for _ in 0..100 {
            if !state.turns.is_active(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("turn on {id} never finished");
    }

    #[tokio::test]
    async fn deltas_are_forwarded_in_order_and_persisted() {
        let server = agent_streaming(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
             data: [DONE]\n\n",
        )
        .await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        let body = run_turn(&state, &id).await;
        let hel = body.find("data: Hel\n").expect("first delta");
        let lo = body.find("data: lo\n").expect("second delta");
        let done = body.find("data: [DONE]").expect("terminal marker");
        assert!(hel < lo && lo < done);

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello");
        wait_idle(&state, &id).await;
    }

    #[tokio::test]
    async fn empty_stream_creates_no_assistant_message() {
        let server = agent_streaming(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
             data: [DONE]\n\n",
        )
        .await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        let body = run_turn(&state, &id).await;
        assert_eq!(body.matches("data:").count(), 1, "only the marker: {body:?}");

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        let conversation = state.store.get_conversation(&id, "alice").await.unwrap().unwrap();
        assert_eq!(conversation.title, None);
    }

    #[tokio::test]
    async fn malformed_chunk_is_forwarded_and_accumulated() {
        let server = agent_streaming(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
             data: {not json\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\
             data: [DONE]\n",
        )
        .await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        let body = run_turn(&state, &id).await;
        assert!(body.contains("data: {not json\n"));
        assert!(body.contains("data: b\n"));

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages[1].content, "a{not jsonb");
    }

    #[tokio::test]
    async fn long_first_reply_sets_title() {
        let reply = "y".repeat(75);
        let server = agent_streaming(&format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{reply}\"}}}}]}}\n\ndata: [DONE]\n\n"
        ))
        .await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        run_turn(&state, &id).await;
        let conversation = state.store.get_conversation(&id, "alice").await.unwrap().unwrap();
        assert_eq!(conversation.title, Some("y".repeat(60)));
    }

    #[tokio::test]
    async fn stream_without_done_still_finalizes() {
        let server =
            agent_streaming("data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n").await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        let body = run_turn(&state, &id).await;
        assert!(body.contains("data: partial\n"));
        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("partial"));
    }

    #[tokio::test]
    async fn upstream_error_is_returned_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let state = test_state().await;
        point_at(&state, &server.uri()).await;
        let id = new_conversation(&state).await;

        let prepared = prepare(&state, &id).await;
        let err = start(&state, prepared).await.err().expect("upstream error");
        assert!(matches!(err, ServerError::Upstream { status: 500 }));

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!state.turns.is_active(&id));
    }

    /// An agent that sends response headers and `first` then holds the
    /// connection open. The returned handle finishes once the client hangs up.
    async fn stalling_agent(first: &'static str) -> (String, tokio::task::JoinHandle<()>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(first.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            // Drain until EOF, i.e. until the relay drops the upstream body.
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });
        (format!("http://{addr}"), handle)
    }

    /// An agent that starts a chunked response, sends `first` as one chunk and
    /// closes the socket without the terminating chunk.
    async fn truncating_agent(first: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            let chunk = format!("{:x}\r\n{first}\r\n", first.len());
            socket.write_all(chunk.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    async fn prepare(state: &AppState, id: &str) -> PreparedTurn {
        prepare_turn(
            state,
            &alice(),
            id,
            SendMessageRequest {
                content: "hello".into(),
            },
        )
        .await
        .unwrap()
    }

    /// Read SSE frames until `needle` has been seen.
    async fn read_until(body: &mut axum::body::Body, needle: &str) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
                .await
                .expect("frame in time")
                .expect("body open")
                .unwrap();
            if let Ok(data) = frame.into_data() {
                seen.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
        seen
    }

    #[tokio::test]
    async fn upstream_failure_mid_stream_keeps_partial_reply() {
        let uri = truncating_agent("data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n\n").await;
        let state = test_state().await;
        point_at(&state, &uri).await;
        let id = new_conversation(&state).await;

        let body = tokio::time::timeout(Duration::from_secs(5), run_turn(&state, &id))
            .await
            .expect("turn ends after the agent hangs up");
        assert!(body.contains("data: part\n"), "{body:?}");
        assert!(body.contains("event: error\n"), "{body:?}");
        assert!(!body.contains(DONE_MARKER), "{body:?}");

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "part");
        wait_idle(&state, &id).await;
    }

    #[tokio::test]
    async fn disconnect_finalizes_partial_reply_and_closes_upstream() {
        let (uri, agent) =
            stalling_agent("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n").await;
        let state = test_state().await;
        point_at(&state, &uri).await;
        let id = new_conversation(&state).await;

        let prepared = prepare(&state, &id).await;
        let token = prepared.turn.token().clone();
        let mut body = start(&state, prepared).await.unwrap().into_response().into_body();
        read_until(&mut body, "data: par").await;

        drop(body);
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .expect("upstream connection closed")
            .unwrap();

        wait_idle(&state, &id).await;
        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "par");
    }

    #[tokio::test]
    async fn explicit_cancel_finalizes_partial_reply_and_closes_upstream() {
        let (uri, agent) =
            stalling_agent("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n").await;
        let state = test_state().await;
        point_at(&state, &uri).await;
        let id = new_conversation(&state).await;

        let prepared = prepare(&state, &id).await;
        let mut body = start(&state, prepared).await.unwrap().into_response().into_body();
        read_until(&mut body, "data: par").await;

        assert!(state.turns.cancel(&id));
        let rest = tokio::time::timeout(Duration::from_secs(5), body.collect())
            .await
            .expect("stream ends after cancel")
            .unwrap()
            .to_bytes();
        assert!(String::from_utf8_lossy(&rest).contains("data: [DONE]"));

        tokio::time::timeout(Duration::from_secs(5), agent)
            .await
            .expect("upstream connection closed")
            .unwrap();

        let messages = state.store.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "par");
        wait_idle(&state, &id).await;
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected() {
        let (uri, _agent) =
            stalling_agent("data: {\"choices\":[{\"delta\":{\"content\":\"busy\"}}]}\n\n").await;
        let state = test_state().await;
        point_at(&state, &uri).await;
        let id = new_conversation(&state).await;
        let send = || SendMessageRequest {
            content: "hello".into(),
        };

        let first = prepare_turn(&state, &alice(), &id, send()).await.unwrap();
        let sse = start(&state, first).await.unwrap();

        let second = prepare_turn(&state, &alice(), &id, send()).await;
        assert!(matches!(second, Err(ServerError::Conflict(_))));
        // The rejected turn wrote nothing.
        assert_eq!(state.store.list_messages(&id).await.unwrap().len(), 1);

        drop(sse);
        wait_idle(&state, &id).await;
        assert!(state.turns.begin(&id).is_some());
    }
}
