use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use lucidcare_core::{
    Disconnected, Generator, InboundEvent, Outbound, Registry, SessionId, SessionLease,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, info, warn};

const OUTBOX_CAPACITY: usize = 64;

/// Shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub generator: Arc<dyn Generator>,
}

/// Handles WebSocket upgrade requests on the walkthrough endpoints.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let lease = state.registry.open();
    let span = tracing::info_span!("walkthrough", session = %lease.id());
    run_connection(socket, &state.registry, lease, state.generator.as_ref())
        .instrument(span)
        .await;
}

/// Drives one connection until the peer leaves.
///
/// Outbound messages go through a channel to a dedicated writer task, so a turn
/// notices a dead peer the next time it emits. Inbound frames are handled strictly
/// one at a time. The lease is dropped on return, which removes the session from
/// the registry.
async fn run_connection(
    socket: WebSocket,
    registry: &Registry,
    lease: SessionLease,
    generator: &dyn Generator,
) {
    info!("WebSocket connection established");

    let (mut sink, mut frames) = socket.split();
    let (outbox, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(
        async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode outbound message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // Binary, ping and pong frames carry nothing for the walkthrough.
            Ok(_) => continue,
            Err(e) => {
                info!(error = %e, "WebSocket error");
                break;
            }
        };

        if dispatch(text.as_str(), registry, lease.id(), generator, &outbox)
            .await
            .is_err()
        {
            info!("Client went away mid-turn");
            break;
        }
    }

    drop(outbox);
    let _ = writer.await;
    info!("WebSocket connection closed");
}

/// Decodes one text frame and runs the resulting turn against session `id`.
///
/// A frame that is not a valid event is answered with an error message and leaves
/// the session untouched. A session that is no longer registered is treated as a
/// disconnect.
pub(crate) async fn dispatch(
    text: &str,
    registry: &Registry,
    id: SessionId,
    generator: &dyn Generator,
    outbox: &mpsc::Sender<Outbound>,
) -> Result<(), Disconnected> {
    let event = match serde_json::from_str::<InboundEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected malformed client frame");
            return outbox
                .send(Outbound::error(format!("Invalid message: {e}")))
                .await
                .map_err(|_| Disconnected);
        }
    };

    let Some(session) = registry.get(id) else {
        warn!("Event for a session that is no longer registered");
        return Err(Disconnected);
    };
    let mut session = session.lock().await;
    session.handle_event(&event, generator, outbox).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lucidcare_core::generator::single_fragment;
    use lucidcare_core::prompts::Prompts;
    use lucidcare_core::{TextStream, TurnPolicy, WalkthroughPhase};

    /// Answers every instruction with a fixed sentence.
    struct CannedGenerator;

    #[async_trait]
    impl Generator for CannedGenerator {
        async fn generate(&self, _instruction: &str) -> anyhow::Result<TextStream> {
            Ok(single_fragment("Here is what that means for you."))
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(Prompts::default()),
            TurnPolicy::default(),
        ))
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_and_session_stays_usable() {
        let registry = registry();
        let lease = registry.open();
        let (tx, mut rx) = mpsc::channel(16);

        dispatch("{not json", &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();

        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Outbound::Error { error } if error.starts_with("Invalid message: ")));
        assert_eq!(lease.session().lock().await.phase(), WalkthroughPhase::Empty);

        let init = r####"{"action":"init","document":"###SECTION###\nGlucose: 156"}"####;
        dispatch(init, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                Outbound::message("Here is what that means for you."),
                Outbound::End {
                    section: "introduction".to_string(),
                    progress: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn unknown_action_is_invalid() {
        let registry = registry();
        let lease = registry.open();
        let (tx, mut rx) = mpsc::channel(16);

        dispatch(r#"{"action":"skip"}"#, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Outbound::Error { error }] if error.starts_with("Invalid message: ")
        ));
    }

    #[tokio::test]
    async fn legacy_summary_field_walks_through_the_report() {
        let registry = registry();
        let lease = registry.open();
        let (tx, mut rx) = mpsc::channel(16);

        let init = r####"{"action":"init","summary":"###SECTION###\nGlucose: 156\n###SECTION###\nTSH: 2.3"}"####;
        dispatch(init, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();
        drain(&mut rx);

        let next = r#"{"action":"next","emotion":null}"#;
        dispatch(next, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                Outbound::message("Here is what that means for you."),
                Outbound::End {
                    section: "Glucose".to_string(),
                    progress: Some("1/2".to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn next_before_any_report_is_an_error() {
        let registry = registry();
        let lease = registry.open();
        let (tx, mut rx) = mpsc::channel(16);

        dispatch(r#"{"action":"next"}"#, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec![Outbound::error("No report loaded")]);
    }

    #[tokio::test]
    async fn closed_outbox_surfaces_as_disconnect() {
        let registry = registry();
        let lease = registry.open();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let result = dispatch("garbage", &registry, lease.id(), &CannedGenerator, &tx).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn each_event_resolves_the_session_through_the_registry() {
        let registry = registry();
        let lease = registry.open();
        let (tx, mut rx) = mpsc::channel(16);

        let init = r####"{"action":"init","document":"###SECTION###\nGlucose: 156"}"####;
        dispatch(init, &registry, lease.id(), &CannedGenerator, &tx)
            .await
            .unwrap();
        drain(&mut rx);
        assert!(lease.session().lock().await.is_introduced());

        registry.close(lease.id());
        let result = dispatch(r#"{"action":"next"}"#, &registry, lease.id(), &CannedGenerator, &tx).await;

        assert_eq!(result, Err(Disconnected));
        assert!(drain(&mut rx).is_empty());
    }
}
