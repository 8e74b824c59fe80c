pub mod session;
pub mod state_machine;
pub mod timer;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::session_store::SessionStore,
    error::ServiceError,
    events::{BroadcastChannel, EventChannel},
    services::session_service::SessionService,
};

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

/// Central application state holding the store handle, the event channel and configuration.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    channel: Arc<BroadcastChannel>,
    config: AppConfig,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            channel: Arc::new(BroadcastChannel::new()),
            config,
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Event channel shared by every store write and reconciliation context.
    pub fn channel(&self) -> Arc<BroadcastChannel> {
        self.channel.clone()
    }

    /// Same channel, as the trait object contexts consume.
    pub fn event_channel(&self) -> Arc<dyn EventChannel> {
        self.channel.clone()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Session operations over the installed store, or [`ServiceError::Degraded`].
    pub async fn session_service(&self) -> Result<SessionService, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        let store = self.session_store().await.ok_or(ServiceError::Degraded)?;
        Ok(SessionService::new(store, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::session_store::MemorySessionStore;

    #[tokio::test]
    async fn starts_degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.session_service().await,
            Err(ServiceError::Degraded)
        ));

        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
        assert!(state.session_service().await.is_ok());

        state.clear_session_store().await;
        assert!(state.is_degraded());
    }

    #[tokio::test]
    async fn unchanged_flag_is_not_rebroadcast() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        state.set_degraded(true);
        assert!(!watcher.has_changed().unwrap());
        state.set_degraded(false);
        assert!(watcher.has_changed().unwrap());
        watcher.borrow_and_update();
    }
}
