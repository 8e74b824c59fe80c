use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod sessions;

/// Compose all route trees and bind the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sessions::router())
        .merge(docs::router())
        .with_state(state)
}
