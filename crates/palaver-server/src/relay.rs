//! Real-time relay: the WebSocket endpoint and event routing.
//!
//! Each connection authenticates on upgrade, registers in the presence
//! registry, then has its inbound events processed **sequentially** — that
//! single-reader loop is what preserves send order per sender/recipient
//! pair.  Durable messages are persisted before any delivery attempt and
//! the sender is always acknowledged; everything else is ephemeral and is
//! silently dropped when the target is offline.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use palaver_shared::{ClientEvent, Message, ServerEvent, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::presence::ConnectionHandle;

#[derive(Deserialize)]
pub struct WsParams {
    /// Bearer credential.  Carried in the query string because browsers
    /// cannot set headers on a WebSocket upgrade.
    token: String,
}

/// `GET /ws?token=…` — authenticate, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user = state.auth.verify(&params.token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, user, socket)))
}

async fn handle_socket(state: AppState, user: UserId, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let (handle, mut rx) = ConnectionHandle::new();
    let connection_id = handle.connection_id();
    state.presence.register(user.clone(), handle.clone()).await;
    info!(user = %user, connection = %connection_id, "realtime connection established");

    // Writer task: drain the handle's queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to encode server event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(user = %user, error = %e, "socket error");
                break;
            }
        };

        match msg {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = dispatch_event(&state, &user, &handle, event).await {
                        handle.send(ServerEvent::Error {
                            message: relay_error_message(&e),
                        });
                    }
                }
                Err(e) => {
                    handle.send(ServerEvent::Error {
                        message: format!("unrecognized event: {e}"),
                    });
                }
            },
            WsMessage::Close(_) => break,
            // Ping/pong keep-alives are answered by the transport layer.
            _ => {}
        }
    }

    // Compare-and-delete: a quick reconnect may already own the mapping.
    state.presence.unregister(&user, connection_id).await;
    writer.abort();
    info!(user = %user, connection = %connection_id, "realtime connection closed");
}

/// What a relay client gets to see of a failure.  Store and internal
/// details stay in the log, matching the HTTP error mapping.
fn relay_error_message(e: &ServerError) -> String {
    match e {
        ServerError::StoreUnavailable(_) | ServerError::Internal(_) => {
            tracing::error!(error = %e, "relay event failed");
            "temporary server error, try again".to_string()
        }
        other => other.to_string(),
    }
}

/// Route one validated client event.
///
/// `sender_handle` is this connection's own queue, used for acknowledgments
/// and error replies.
pub(crate) async fn dispatch_event(
    state: &AppState,
    sender: &UserId,
    sender_handle: &ConnectionHandle,
    event: ClientEvent,
) -> Result<(), ServerError> {
    match event {
        ClientEvent::MessageSend {
            to,
            text,
            image_url,
        } => {
            let message = store_and_forward(state, sender, &to, text, image_url).await?;
            // The ack goes back whether or not the recipient was reachable.
            sender_handle.send(ServerEvent::MessageAck { message });
        }
        ClientEvent::TypingStart { to } => {
            forward(
                state,
                &to,
                ServerEvent::TypingStart {
                    from: sender.clone(),
                },
            )
            .await;
        }
        ClientEvent::TypingStop { to } => {
            forward(
                state,
                &to,
                ServerEvent::TypingStop {
                    from: sender.clone(),
                },
            )
            .await;
        }
        ClientEvent::CallOffer {
            to,
            channel,
            caller_name,
        } => {
            let delivered = forward(
                state,
                &to,
                ServerEvent::CallOffer {
                    from: sender.clone(),
                    channel: channel.clone(),
                    caller_name,
                },
            )
            .await;
            state.calls.on_offer(&channel, sender, &to, delivered).await;
        }
        ClientEvent::CallAnswer { to, channel } => {
            forward(
                state,
                &to,
                ServerEvent::CallAnswer {
                    from: sender.clone(),
                    channel: channel.clone(),
                },
            )
            .await;
            state.calls.on_answer(&channel).await;
        }
        ClientEvent::CallReject { to, channel } => {
            forward(
                state,
                &to,
                ServerEvent::CallReject {
                    from: sender.clone(),
                    channel: channel.clone(),
                },
            )
            .await;
            state.calls.on_reject(&channel).await;
        }
        ClientEvent::CallEnd { to, channel } => {
            forward(
                state,
                &to,
                ServerEvent::CallEnd {
                    from: sender.clone(),
                    channel: channel.clone(),
                },
            )
            .await;
            state.calls.on_end(&channel).await;
        }
    }
    Ok(())
}

/// Persist a message, then attempt live delivery.
///
/// Persistence comes first: whatever happens on the delivery side, the
/// recipient can discover the message later through the inbox.  Shared by
/// the relay and the REST send endpoint (where the HTTP response is the
/// acknowledgment).
pub(crate) async fn store_and_forward(
    state: &AppState,
    sender: &UserId,
    to: &UserId,
    text: Option<String>,
    image_url: Option<String>,
) -> Result<Message, ServerError> {
    let message = {
        let db = state.db.lock().await;
        db.append_message(sender, to, text, image_url)?
    };

    if let Some(target) = state.presence.lookup(to).await {
        if !target.send(ServerEvent::MessageNew {
            message: message.clone(),
        }) {
            debug!(
                recipient = %to,
                message_id = %message.id,
                "recipient queue full, they will catch up via inbox"
            );
        }
    }

    Ok(message)
}

/// Forward an ephemeral event to `to`'s current connection, if any.
///
/// Returns whether the event was queued for delivery.  An offline target is
/// a normal outcome, not an error; nothing is queued for later.
async fn forward(state: &AppState, to: &UserId, event: ServerEvent) -> bool {
    match state.presence.lookup(to).await {
        Some(handle) => handle.send(event),
        None => {
            debug!(target = %to, "target offline, dropping ephemeral event");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{mpsc, Mutex};

    use palaver_store::Database;

    use super::*;
    use crate::auth::Authenticator;
    use crate::config::ServerConfig;
    use crate::presence::PresenceRegistry;
    use crate::signaling::CallSignaling;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn test_state() -> AppState {
        let config = ServerConfig::default();
        AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            presence: PresenceRegistry::new(),
            calls: CallSignaling::from_config(&config),
            auth: Arc::new(Authenticator::new(config.auth_secret)),
            config: Arc::new(config),
        }
    }

    async fn register(
        state: &AppState,
        user: &UserId,
    ) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (handle, mut rx) = ConnectionHandle::new();
        state.presence.register(user.clone(), handle.clone()).await;
        // Swallow the presence snapshot broadcast on registration.
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, ServerEvent::Presence { .. }));
        }
        (handle, rx)
    }

    fn send_event(to: &UserId, text: &str) -> ClientEvent {
        ClientEvent::MessageSend {
            to: to.clone(),
            text: Some(text.to_string()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn online_recipient_gets_the_message_and_sender_gets_an_ack() {
        let state = test_state();
        let (alice, bob) = (uid("alice"), uid("bob"));

        let (alice_handle, mut alice_rx) = register(&state, &alice).await;
        let (_bob_handle, mut bob_rx) = register(&state, &bob).await;
        // Alice also hears bob's registration broadcast.
        let _ = alice_rx.try_recv();

        dispatch_event(&state, &alice, &alice_handle, send_event(&bob, "hi"))
            .await
            .unwrap();

        let ack = alice_rx.try_recv().unwrap();
        let delivered = bob_rx.try_recv().unwrap();
        let (ack_msg, new_msg) = match (ack, delivered) {
            (ServerEvent::MessageAck { message: a }, ServerEvent::MessageNew { message: n }) => {
                (a, n)
            }
            other => panic!("unexpected events: {other:?}"),
        };

        // Both sides saw the same persisted record.
        assert_eq!(ack_msg.id, new_msg.id);
        assert_eq!(new_msg.text.as_deref(), Some("hi"));
        assert_eq!(new_msg.sender_id, alice);
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_durable_delivery() {
        let state = test_state();
        let (alice, bob) = (uid("alice"), uid("bob"));

        let (alice_handle, mut alice_rx) = register(&state, &alice).await;
        // Bob never registers.

        dispatch_event(&state, &alice, &alice_handle, send_event(&bob, "hi"))
            .await
            .unwrap();

        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::MessageAck { .. }
        ));

        let db = state.db.lock().await;
        let page = db.history(&alice, &bob, 1, 30).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn invalid_send_is_an_error_and_persists_nothing() {
        let state = test_state();
        let alice = uid("alice");
        let (alice_handle, _rx) = register(&state, &alice).await;

        let err = dispatch_event(&state, &alice, &alice_handle, send_event(&alice, "me"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidArgument(_)));

        let db = state.db.lock().await;
        assert!(db.inbox_rows(&alice).unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_events_are_forwarded_or_dropped() {
        let state = test_state();
        let (alice, bob) = (uid("alice"), uid("bob"));

        let (alice_handle, _alice_rx) = register(&state, &alice).await;
        let (_bob_handle, mut bob_rx) = register(&state, &bob).await;

        dispatch_event(
            &state,
            &alice,
            &alice_handle,
            ClientEvent::TypingStart { to: bob.clone() },
        )
        .await
        .unwrap();
        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::TypingStart {
                from: alice.clone()
            }
        );

        // To an offline target the event simply vanishes.
        dispatch_event(
            &state,
            &alice,
            &alice_handle,
            ClientEvent::TypingStop {
                to: uid("nobody"),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn call_offer_reaches_online_callee_and_tracks_state() {
        use crate::signaling::{call_channel, CalleeState, CallerState};

        let state = test_state();
        let (alice, bob) = (uid("alice"), uid("bob"));
        let channel = call_channel(&alice, &bob);

        let (alice_handle, _alice_rx) = register(&state, &alice).await;
        let (bob_handle, mut bob_rx) = register(&state, &bob).await;

        dispatch_event(
            &state,
            &alice,
            &alice_handle,
            ClientEvent::CallOffer {
                to: bob.clone(),
                channel: channel.clone(),
                caller_name: "Alice".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::CallOffer {
                from: alice.clone(),
                channel: channel.clone(),
                caller_name: "Alice".into(),
            }
        );
        assert_eq!(
            state.calls.session_states(&channel).await,
            Some((CallerState::Ringing, CalleeState::OfferReceived))
        );

        // Reject tears the session down and notifies the caller.  Alice is
        // re-registered to get a receiver with no pending broadcasts.
        let (_alice_handle2, mut alice_rx) = register(&state, &alice).await;
        dispatch_event(
            &state,
            &bob,
            &bob_handle,
            ClientEvent::CallReject {
                to: alice.clone(),
                channel: channel.clone(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::CallReject { .. }
        ));
        assert_eq!(state.calls.session_states(&channel).await, None);
    }

    // The end-to-end offline-delivery scenario: send while offline, discover
    // via inbox, mark read.
    #[tokio::test]
    async fn offline_message_flows_through_the_inbox() {
        let state = test_state();
        let (u1, u2) = (uid("u1"), uid("u2"));

        let (u1_handle, _u1_rx) = register(&state, &u1).await;
        dispatch_event(&state, &u1, &u1_handle, send_event(&u2, "hi"))
            .await
            .unwrap();

        {
            let db = state.db.lock().await;
            let page = db.history(&u1, &u2, 1, 30).unwrap();
            assert_eq!(page.items.len(), 1);
            assert_eq!(page.items[0].text.as_deref(), Some("hi"));
            assert!(page.items[0].read_at.is_none());
        }

        // u2 comes online and reads their inbox.
        let (_u2_handle, _u2_rx) = register(&state, &u2).await;
        {
            let db = state.db.lock().await;
            let rows = db.inbox_rows(&u2).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].counterpart.id, u1);
            assert_eq!(rows[0].unread, 1);

            assert_eq!(db.mark_read(&u2, &u1).unwrap(), 1);
            assert_eq!(db.inbox_rows(&u2).unwrap()[0].unread, 0);
        }
    }
}
