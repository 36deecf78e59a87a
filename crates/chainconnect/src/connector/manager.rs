//! Connection state machine.
//!
//! All state transitions happen here, under one short mutex section. Listeners
//! are notified after the state is updated and outside the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chainconnect_core::ChainId;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::connector::{Connector, ConnectorData, ConnectorEvent, ConnectorState};
use crate::error::Error;
use crate::listeners::Listeners;
use crate::storage::{ClientStorage, PersistedSnapshot};
use crate::watch::Unwatch;

/// One state transition, delivered to manager listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub previous: ConnectorState,
    pub current: ConnectorState,
}

struct Inner {
    state: ConnectorState,
    active: Option<Arc<dyn Connector>>,
    /// Forwards the active connector's events into `apply_event`.
    pump: Option<JoinHandle<()>>,
    /// Bumped on every connect attempt and every disconnect; stale attempts
    /// and stale pumps compare against it.
    epoch: u64,
}

pub struct ConnectorManager {
    connectors: Vec<Arc<dyn Connector>>,
    storage: ClientStorage,
    inner: Mutex<Inner>,
    listeners: Listeners<StateChange>,
}

impl ConnectorManager {
    pub fn new(connectors: Vec<Arc<dyn Connector>>, storage: ClientStorage) -> Arc<Self> {
        Arc::new(Self {
            connectors,
            storage,
            inner: Mutex::new(Inner {
                state: ConnectorState::Disconnected,
                active: None,
                pump: None,
                epoch: 0,
            }),
            listeners: Listeners::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(inner: &mut Inner, next: ConnectorState) -> StateChange {
        let previous = std::mem::replace(&mut inner.state, next);
        StateChange {
            previous,
            current: inner.state.clone(),
        }
    }

    /// Drop the active connector and return to `Disconnected`.
    fn reset(inner: &mut Inner) -> StateChange {
        inner.epoch += 1;
        inner.active = None;
        inner.pump = None;
        Self::replace(inner, ConnectorState::Disconnected)
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectorState {
        self.lock().state.clone()
    }

    pub fn active_connector(&self) -> Option<Arc<dyn Connector>> {
        self.lock().active.clone()
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    pub fn connector(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.id() == id).cloned()
    }

    pub fn subscribe(&self, callback: impl Fn(&StateChange) + Send + Sync + 'static) -> Unwatch {
        self.listeners.subscribe(callback)
    }

    // ─── Transitions ─────────────────────────────────────────────────────────

    pub async fn connect(
        self: &Arc<Self>,
        connector_id: &str,
        chain_id: Option<ChainId>,
    ) -> Result<ConnectorData, Error> {
        let connector = self
            .connector(connector_id)
            .ok_or_else(|| Error::ConnectorNotFound {
                connector_id: connector_id.to_string(),
            })?;

        let (epoch, change) = {
            let mut inner = self.lock();
            if inner.state.is_connected() || inner.state.is_pending() {
                return Err(Error::ConnectorAlreadyConnected);
            }
            inner.epoch += 1;
            (inner.epoch, Self::replace(&mut inner, ConnectorState::Connecting))
        };
        self.listeners.emit(&change);

        tracing::info!(connector = connector_id, ?chain_id, "connecting");
        self.establish(connector, chain_id, epoch, false).await
    }

    /// Silently reconnect the persisted connector, if it is still authorized.
    /// Failures leave the manager `Disconnected` and are only logged.
    pub async fn autoconnect(self: &Arc<Self>) -> Option<ConnectorData> {
        let snapshot = match self.storage.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "could not read persisted connection state");
                return None;
            }
        };
        let connector_id = snapshot.last_connector_id?;
        let Some(connector) = self.connector(&connector_id) else {
            tracing::debug!(connector = %connector_id, "persisted connector is no longer configured");
            return None;
        };
        if !connector.ready() || !connector.is_authorized().await {
            tracing::debug!(connector = %connector_id, "persisted connector not authorized; skipping autoconnect");
            return None;
        }

        let (epoch, change) = {
            let mut inner = self.lock();
            if inner.state.is_connected() || inner.state.is_pending() {
                return None;
            }
            inner.epoch += 1;
            (inner.epoch, Self::replace(&mut inner, ConnectorState::Reconnecting))
        };
        self.listeners.emit(&change);

        tracing::info!(connector = %connector_id, "reconnecting");
        match self.establish(connector, None, epoch, true).await {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(connector = %connector_id, error = %e, "autoconnect failed");
                None
            }
        }
    }

    async fn establish(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
        chain_id: Option<ChainId>,
        epoch: u64,
        silent: bool,
    ) -> Result<ConnectorData, Error> {
        let connector_id = connector.id().to_string();

        let data = match connector.connect(chain_id).await {
            Ok(data) => data,
            Err(e) => {
                let err = Error::from_connector(&connector_id, e);
                let changes = {
                    let mut inner = self.lock();
                    if inner.epoch != epoch {
                        Vec::new()
                    } else if silent {
                        vec![Self::replace(&mut inner, ConnectorState::Disconnected)]
                    } else {
                        vec![
                            Self::replace(
                                &mut inner,
                                ConnectorState::Error {
                                    reason: err.to_string(),
                                },
                            ),
                            Self::replace(&mut inner, ConnectorState::Disconnected),
                        ]
                    }
                };
                for change in &changes {
                    self.listeners.emit(change);
                }
                tracing::warn!(connector = %connector_id, error = %err, "connect failed");
                return Err(err);
            }
        };

        let change = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                None
            } else {
                inner.active = Some(Arc::clone(&connector));
                inner.pump = Some(self.spawn_pump(&connector, epoch));
                Some(Self::replace(
                    &mut inner,
                    ConnectorState::Connected {
                        connector_id: connector_id.clone(),
                        account: data.account,
                        chain_id: data.chain_id,
                    },
                ))
            }
        };

        let Some(change) = change else {
            tracing::debug!(connector = %connector_id, "connect superseded by disconnect");
            if let Err(e) = connector.disconnect().await {
                tracing::debug!(connector = %connector_id, error = %e, "disconnect after superseded connect failed");
            }
            return Err(Error::Connector(format!(
                "{connector_id}: connection attempt superseded by disconnect"
            )));
        };

        if let Err(e) = self.storage.save_snapshot(&PersistedSnapshot {
            last_connector_id: Some(connector_id.clone()),
        }) {
            tracing::warn!(error = %e, "could not persist connection state");
        }
        tracing::info!(connector = %connector_id, account = %data.account, chain_id = data.chain_id, "connected");
        self.listeners.emit(&change);
        Ok(data)
    }

    /// Always ends `Disconnected` and always notifies listeners.
    pub async fn disconnect(&self) {
        let (active, change) = {
            let mut inner = self.lock();
            let active = inner.active.take();
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.epoch += 1;
            (active, Self::replace(&mut inner, ConnectorState::Disconnected))
        };

        if let Some(connector) = active {
            if let Err(e) = connector.disconnect().await {
                tracing::warn!(connector = connector.id(), error = %e, "connector disconnect failed");
            }
            tracing::info!(connector = connector.id(), "disconnected");
        }
        if let Err(e) = self.storage.clear_snapshot() {
            tracing::warn!(error = %e, "could not clear persisted connection state");
        }
        self.listeners.emit(&change);
    }

    /// Record a chain the active connector switched to. No-op (and no
    /// notification) when not connected or already on `chain_id`.
    pub fn set_chain(&self, chain_id: ChainId) -> bool {
        let change = {
            let mut inner = self.lock();
            match inner.state.clone() {
                ConnectorState::Connected {
                    connector_id,
                    account,
                    chain_id: current,
                } if current != chain_id => Some(Self::replace(
                    &mut inner,
                    ConnectorState::Connected {
                        connector_id,
                        account,
                        chain_id,
                    },
                )),
                _ => None,
            }
        };
        match change {
            Some(change) => {
                self.listeners.emit(&change);
                true
            }
            None => false,
        }
    }

    fn spawn_pump(self: &Arc<Self>, connector: &Arc<dyn Connector>, epoch: u64) -> JoinHandle<()> {
        let mut events = connector.events();
        let manager = Arc::downgrade(self);
        let connector_id = connector.id().to_string();

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(connector = %connector_id, skipped, "connector events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else { break };
                if !manager.apply_event(epoch, event) {
                    break;
                }
            }
        })
    }

    /// Apply one connector event. Returns `false` once the connection the
    /// event belongs to is gone.
    fn apply_event(&self, epoch: u64, event: ConnectorEvent) -> bool {
        let (change, keep_going) = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return false;
            }
            let ConnectorState::Connected {
                connector_id,
                account,
                chain_id,
            } = inner.state.clone()
            else {
                return false;
            };

            tracing::debug!(connector = %connector_id, ?event, "connector event");
            match event {
                ConnectorEvent::AccountsChanged(accounts) => match accounts.first() {
                    None => (Some(Self::reset(&mut inner)), false),
                    Some(&next) if next != account => (
                        Some(Self::replace(
                            &mut inner,
                            ConnectorState::Connected {
                                connector_id,
                                account: next,
                                chain_id,
                            },
                        )),
                        true,
                    ),
                    Some(_) => (None, true),
                },
                ConnectorEvent::ChainChanged(next) if next != chain_id => (
                    Some(Self::replace(
                        &mut inner,
                        ConnectorState::Connected {
                            connector_id,
                            account,
                            chain_id: next,
                        },
                    )),
                    true,
                ),
                ConnectorEvent::ChainChanged(_) => (None, true),
                ConnectorEvent::Disconnect => (Some(Self::reset(&mut inner)), false),
            }
        };

        if !keep_going {
            if let Err(e) = self.storage.clear_snapshot() {
                tracing::warn!(error = %e, "could not clear persisted connection state");
            }
        }
        if let Some(change) = change {
            self.listeners.emit(&change);
        }
        keep_going
    }

    /// Stop event processing and drop listeners without touching the wallet.
    pub fn shutdown(&self) {
        if let Some(pump) = self.lock().pump.take() {
            pump.abort();
        }
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectionStatus, MockConnector, MockConnectorOptions};
    use crate::storage::MemoryStorage;
    use alloy_primitives::Address;

    fn setup(options: MockConnectorOptions) -> (Arc<ConnectorManager>, Arc<MockConnector>, ClientStorage) {
        let mock = Arc::new(MockConnector::new(options));
        let storage = ClientStorage::new(Arc::new(MemoryStorage::new()), "test");
        let manager = ConnectorManager::new(vec![mock.clone() as Arc<dyn Connector>], storage.clone());
        (manager, mock, storage)
    }

    fn record(manager: &ConnectorManager) -> (Arc<Mutex<Vec<ConnectionStatus>>>, Unwatch) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let unwatch = manager.subscribe(move |change| s.lock().unwrap().push(change.current.status()));
        (seen, unwatch)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_then_reject_second_connect() {
        let (manager, _mock, storage) = setup(MockConnectorOptions::default());
        let data = manager.connect("mock", Some(5)).await.unwrap();
        assert_eq!(data.chain_id, 5);
        assert!(manager.state().is_connected());
        assert_eq!(
            storage.snapshot().unwrap().last_connector_id.as_deref(),
            Some("mock")
        );

        let err = manager.connect("mock", None).await.unwrap_err();
        assert_eq!(err, Error::ConnectorAlreadyConnected);
    }

    #[tokio::test]
    async fn unknown_connector() {
        let (manager, _, _) = setup(MockConnectorOptions::default());
        assert!(matches!(
            manager.connect("nope", None).await,
            Err(Error::ConnectorNotFound { .. })
        ));
        assert_eq!(manager.state(), ConnectorState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_passes_through_error_state() {
        let (manager, _, _) = setup(MockConnectorOptions {
            fail_connect: true,
            ..Default::default()
        });
        let (seen, _unwatch) = record(&manager);

        let err = manager.connect("mock", None).await.unwrap_err();
        assert_eq!(err, Error::UserRejectedRequest);
        assert_eq!(
            *seen.lock().unwrap(),
            [
                ConnectionStatus::Connecting,
                ConnectionStatus::Error,
                ConnectionStatus::Disconnected
            ]
        );
    }

    #[tokio::test]
    async fn double_disconnect_is_safe_and_always_emits() {
        let (manager, mock, storage) = setup(MockConnectorOptions::default());
        manager.connect("mock", None).await.unwrap();
        let (seen, _unwatch) = record(&manager);

        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectorState::Disconnected);
        assert!(!mock.is_connected());
        assert_eq!(storage.snapshot().unwrap().last_connector_id, None);
        assert_eq!(
            *seen.lock().unwrap(),
            [ConnectionStatus::Disconnected, ConnectionStatus::Disconnected]
        );
    }

    #[tokio::test]
    async fn empty_accounts_event_disconnects() {
        let (manager, mock, _) = setup(MockConnectorOptions::default());
        manager.connect("mock", None).await.unwrap();

        mock.emit(ConnectorEvent::AccountsChanged(vec![]));
        settle().await;

        assert_eq!(manager.state(), ConnectorState::Disconnected);
        assert!(manager.active_connector().is_none());
    }

    #[tokio::test]
    async fn account_and_chain_events_update_state() {
        let (manager, mock, _) = setup(MockConnectorOptions::default());
        manager.connect("mock", Some(1)).await.unwrap();

        let next = Address::repeat_byte(0x42);
        mock.emit(ConnectorEvent::AccountsChanged(vec![next]));
        mock.emit(ConnectorEvent::ChainChanged(10));
        settle().await;

        let state = manager.state();
        assert_eq!(state.account(), Some(next));
        assert_eq!(state.chain_id(), Some(10));
    }

    #[tokio::test]
    async fn set_chain_is_deduplicated() {
        let (manager, _, _) = setup(MockConnectorOptions::default());
        manager.connect("mock", Some(1)).await.unwrap();
        assert!(manager.set_chain(10));
        assert!(!manager.set_chain(10));
    }

    #[tokio::test]
    async fn autoconnect_uses_persisted_connector() {
        let (manager, _, storage) = setup(MockConnectorOptions {
            authorized: true,
            ..Default::default()
        });
        storage
            .save_snapshot(&PersistedSnapshot {
                last_connector_id: Some("mock".into()),
            })
            .unwrap();
        let (seen, _unwatch) = record(&manager);

        assert!(manager.autoconnect().await.is_some());
        assert!(manager.state().is_connected());
        assert_eq!(
            *seen.lock().unwrap(),
            [ConnectionStatus::Reconnecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test]
    async fn autoconnect_failure_is_silent() {
        let (manager, _, storage) = setup(MockConnectorOptions {
            authorized: true,
            fail_connect: true,
            ..Default::default()
        });
        storage
            .save_snapshot(&PersistedSnapshot {
                last_connector_id: Some("mock".into()),
            })
            .unwrap();

        assert!(manager.autoconnect().await.is_none());
        assert_eq!(manager.state(), ConnectorState::Disconnected);
    }

    #[tokio::test]
    async fn autoconnect_skips_unauthorized() {
        let (manager, mock, storage) = setup(MockConnectorOptions::default());
        storage
            .save_snapshot(&PersistedSnapshot {
                last_connector_id: Some("mock".into()),
            })
            .unwrap();
        assert!(manager.autoconnect().await.is_none());
        assert_eq!(mock.connect_calls(), 0);
    }
}
