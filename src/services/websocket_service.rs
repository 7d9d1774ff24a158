use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dao::models::RoomEntity,
    dto::{
        room::RoomView,
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    services::{code_registry, room_service},
    state::{SharedState, room::RoomKey},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Internal error type for socket message handling, distinct from the HTTP-facing
/// [`ServiceError`] it wraps.
#[derive(Debug, Error)]
enum SocketError {
    /// Writer channel closed; the connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
    /// The identification message did not name a room the user can enter.
    #[error("{message}")]
    Rejected { code: &'static str, message: String },
    /// Error from the settlement engine or the store.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl SocketError {
    fn to_frame(&self) -> ServerMessage {
        match self {
            SocketError::ConnectionClosed => ServerMessage::error("connection_closed", self.to_string()),
            SocketError::Rejected { code, message } => ServerMessage::error(*code, message.clone()),
            SocketError::Service(err) => ServerMessage::error(err.reason_code(), err.to_string()),
        }
    }
}

/// Identity of a registered socket.
struct Session {
    key: RoomKey,
    user_id: String,
}

/// Handle the full lifecycle of one room WebSocket connection.
///
/// The first frame must be `join-room`; it registers the socket with the presence
/// tracker and subscribes it to the room namespace. Disconnecting unregisters it,
/// which may arm the room's grace timer.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (session, room) = match identify(&state, &initial_message).await {
        Ok(identified) => identified,
        Err(err) => {
            warn!(error = %err, "room socket rejected");
            let _ = send_message_to_websocket(&outbound_tx, &err.to_frame());
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    // Subscribe before registering so nothing broadcast after the ack is missed.
    let forwarder = spawn_forwarder(&state, &session.key, outbound_tx.clone());
    let connections = state.presence().register(&session.key, &session.user_id);
    info!(room = %session.key, user_id = %session.user_id, connections, "room socket registered");

    let ack = ServerMessage::Joined {
        game_type: session.key.game_type,
        room: RoomView::from(&room),
    };
    if send_message_to_websocket(&outbound_tx, &ack).is_ok() {
        if connections == 1 {
            state.channels().publish(
                &session.key,
                ServerMessage::PresenceChanged {
                    room_code: session.key.code.clone(),
                    user_id: session.user_id.clone(),
                    online: true,
                },
            );
        }
        read_loop(&state, &session, &mut receiver, &outbound_tx).await;
    }

    forwarder.abort();
    let armed = state.presence().unregister(&session.key, &session.user_id);
    if state
        .presence()
        .user_connections(&session.key, &session.user_id)
        == 0
    {
        state.channels().publish(
            &session.key,
            ServerMessage::PresenceChanged {
                room_code: session.key.code.clone(),
                user_id: session.user_id.clone(),
                online: false,
            },
        );
    }
    state.channels().cleanup(&session.key);
    info!(room = %session.key, user_id = %session.user_id, grace_armed = armed, "room socket disconnected");

    finalize(writer_task, outbound_tx).await;
}

async fn read_loop(
    state: &SharedState,
    session: &Session,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(room = %session.key, user_id = %session.user_id, payload = %text, "received room message");
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Move { payload }) => {
                        if let Err(err) = handle_move(state, session, &payload).await {
                            warn!(room = %session.key, user_id = %session.user_id, error = %err, "move rejected");
                            if send_message_to_websocket(outbound_tx, &err.to_frame()).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(ClientMessage::LeaveRoom) => {
                        info!(room = %session.key, user_id = %session.user_id, "socket left room");
                        let _ = outbound_tx.send(Message::Close(None));
                        break;
                    }
                    Ok(ClientMessage::JoinRoom { .. }) => {
                        warn!(room = %session.key, "ignoring duplicate join-room message");
                    }
                    Ok(ClientMessage::Unknown) => {
                        let frame = ServerMessage::error("unknown_message", "unsupported message type");
                        if send_message_to_websocket(outbound_tx, &frame).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(room = %session.key, error = %err, "failed to parse room message");
                        let frame = ServerMessage::error("invalid_message", err.to_string());
                        if send_message_to_websocket(outbound_tx, &frame).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(room = %session.key, error = %err, "websocket error");
                break;
            }
        }
    }
}

/// Parse and authorize the `join-room` message.
async fn identify(state: &SharedState, text: &str) -> Result<(Session, RoomEntity), SocketError> {
    let message: ClientMessage = serde_json::from_str(text).map_err(|err| SocketError::Rejected {
        code: "invalid_message",
        message: err.to_string(),
    })?;
    let Some((room_code, user_id)) = message.join_request() else {
        return Err(SocketError::Rejected {
            code: "identification_required",
            message: "first message must be join-room".into(),
        });
    };
    if !code_registry::is_valid_code(room_code) {
        return Err(SocketError::Rejected {
            code: "invalid_room_code",
            message: format!("room code `{room_code}` is malformed"),
        });
    }

    let room = room_service::find_room(state, room_code).await?;
    if room.status.is_terminal() {
        return Err(SocketError::Rejected {
            code: "already_terminal",
            message: format!("room `{room_code}` is already {}", room.status),
        });
    }
    if !room.has_participant(user_id) {
        return Err(SocketError::Rejected {
            code: "not_participant",
            message: format!("user `{user_id}` is not a participant of room `{room_code}`"),
        });
    }

    let session = Session {
        key: RoomKey::new(room.game_type, room.code.clone()),
        user_id: user_id.to_owned(),
    };
    Ok((session, room))
}

async fn handle_move(
    state: &SharedState,
    session: &Session,
    payload: &serde_json::Value,
) -> Result<(), SocketError> {
    room_service::play_move(state, &session.key.code, &session.user_id, payload).await?;
    Ok(())
}

/// Relay the room namespace to this socket until the writer closes.
fn spawn_forwarder(
    state: &SharedState,
    key: &RoomKey,
    outbound_tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    let mut messages = state.channels().subscribe(key);
    let key = key.clone();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => {
                    if send_message_to_websocket(&outbound_tx, &message).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room = %key, skipped, "room socket lagged behind broadcasts");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is reported as
/// [`SocketError::ConnectionClosed`].
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), SocketError>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| SocketError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
