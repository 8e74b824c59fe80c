use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionViewResponse,
        sse::{HANDSHAKE_EVENT, Handshake, SYSTEM_STATUS_EVENT, SystemStatus, VIEW_EVENT},
    },
    error::ServiceError,
    services::reconciliation::{ContextOptions, SessionContext},
    state::{SharedState, state_machine::Role},
};

/// Start a reconciliation context for `session_id` on behalf of a stream subscriber.
pub async fn open_session_context(
    state: &SharedState,
    session_id: Uuid,
    role: Role,
) -> Result<SessionContext, ServiceError> {
    let service = state.session_service().await?;
    Ok(SessionContext::spawn(
        service,
        state.event_channel(),
        session_id,
        ContextOptions::from_config(role, state.config()),
    ))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Host => "host",
        Role::Player(_) => "player",
        Role::Observer => "observer",
    }
}

fn encode<T: serde::Serialize>(name: &str, payload: &T) -> Option<Event> {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, event = name, "failed to serialise SSE payload");
            None
        }
    }
}

/// Stream every view change of `context` as SSE, tearing the context down
/// once the client disconnects.
pub fn to_sse_stream(
    context: SessionContext,
    mut degraded: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: owns the context, reads view changes and pushes into mpsc
    tokio::spawn(async move {
        let session_id = context.session_id();
        let role = context.role();
        let player_stream = matches!(role, Role::Player(_));
        let mut views = context.watch();
        views.mark_changed();

        let handshake = Handshake {
            session_id,
            role: role_name(role).into(),
            message: "session stream connected".into(),
            degraded: *degraded.borrow(),
        };
        let mut pending = encode(HANDSHAKE_EVENT, &handshake);

        loop {
            if let Some(event) = pending.take() {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    let payload =
                        SessionViewResponse::from_view(&view, player_stream, *degraded.borrow());
                    pending = encode(VIEW_EVENT, &payload);
                }
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = SystemStatus { degraded: *degraded.borrow_and_update() };
                    pending = encode(SYSTEM_STATUS_EVENT, &status);
                }
            }
        }

        drop(context);
        info!(session_id = %session_id, role = role_name(role), "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
