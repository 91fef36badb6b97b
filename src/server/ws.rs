//! Realtime channel: one WebSocket per browser connection.
//!
//! Incoming frames start or cancel sessions. Every session of a connection
//! writes to the connection's single outbound queue, which one writer task
//! drains into the socket, so events keep their order per connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::session::{CancelRequest, ClientEvent, EventSink, SessionController};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Tokens of the sessions a connection is running, by destination name.
type Running = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Sessions started on one connection.
struct Connection {
    sessions: Arc<SessionController>,
    events: EventSink,
    /// Cancelled on disconnect; parent of every session token.
    token: CancellationToken,
    running: Running,
}

impl Connection {
    fn new(sessions: Arc<SessionController>, events: EventSink, token: CancellationToken) -> Self {
        Self {
            sessions,
            events,
            token,
            running: Arc::default(),
        }
    }

    /// Handles one text frame. Returns the spawned session, if any.
    fn handle_text(&self, text: &str) -> Option<JoinHandle<()>> {
        match ClientEvent::parse(text) {
            Ok(ClientEvent::StartDownload(request)) => {
                let admission = self.sessions.admit(&request, &self.events).ok()?;
                let name = admission.name().to_string();
                let session_token = self.token.child_token();
                lock(&self.running).insert(name.clone(), session_token.clone());

                let sessions = Arc::clone(&self.sessions);
                let events = self.events.clone();
                let running = Arc::clone(&self.running);
                Some(tokio::spawn(async move {
                    let _ = sessions.execute(&admission, events, session_token).await;
                    // The name is still reserved here, so the entry is ours.
                    lock(&running).remove(&name);
                    drop(admission);
                }))
            }
            Ok(ClientEvent::CancelDownload(CancelRequest { directory_name })) => {
                let token = lock(&self.running).remove(directory_name.trim());
                match token {
                    Some(token) => {
                        log::info!("Cancelling download {directory_name}");
                        token.cancel();
                    }
                    None => self
                        .events
                        .log(format!("[Error] No download named {directory_name} is running")),
                }
                None
            }
            Err(e) => {
                log::debug!("Rejected frame: {e}");
                self.events.log(format!("[Error] {e}"));
                None
            }
        }
    }

    /// Cancels every session started on this connection.
    fn close(&self) {
        self.token.cancel();
    }
}

fn lock(running: &Running) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    log::info!("New client connected");
    let (mut sender, mut receiver) = socket.split();
    let (events, rx) = EventSink::channel();

    let writer = tokio::spawn(async move {
        let mut outbound = UnboundedReceiverStream::new(rx);
        while let Some(event) = outbound.next().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let connection = Connection::new(
        Arc::clone(&state.sessions),
        events,
        state.shutdown.child_token(),
    );

    loop {
        let frame = tokio::select! {
            () = connection.token.cancelled() => break,
            frame = receiver.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                connection.handle_text(text.as_str());
            }
            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }

    log::info!("Client disconnected");
    connection.close();
    drop(connection);
    let _ = writer.await;
}
