//! In-memory connector for tests and demos.

use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::{address, Address};
use async_trait::async_trait;
use chainconnect_core::ChainId;
use tokio::sync::broadcast;

use crate::connector::{Connector, ConnectorData, ConnectorError, ConnectorEvent};

#[derive(Debug, Clone)]
pub struct MockConnectorOptions {
    pub id: String,
    pub name: String,
    pub account: Address,
    /// Chain reported when `connect` is called without one.
    pub chain_id: ChainId,
    pub ready: bool,
    pub authorized: bool,
    pub fail_connect: bool,
    pub supports_switch_chain: bool,
    /// Chain reported after any switch, whatever the target was.
    pub switch_reports: Option<ChainId>,
}

impl Default for MockConnectorOptions {
    fn default() -> Self {
        Self {
            id: "mock".into(),
            name: "Mock".into(),
            account: address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
            chain_id: 1,
            ready: true,
            authorized: false,
            fail_connect: false,
            supports_switch_chain: true,
            switch_reports: None,
        }
    }
}

struct MockState {
    connected: bool,
    account: Address,
    chain_id: ChainId,
    fail_connect: bool,
    connect_calls: usize,
}

pub struct MockConnector {
    options: MockConnectorOptions,
    state: Mutex<MockState>,
    events: broadcast::Sender<ConnectorEvent>,
}

impl MockConnector {
    pub fn new(options: MockConnectorOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MockState {
                connected: false,
                account: options.account,
                chain_id: options.chain_id,
                fail_connect: options.fail_connect,
                connect_calls: 0,
            }),
            options,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate a wallet-side change.
    pub fn emit(&self, event: ConnectorEvent) {
        {
            let mut state = self.lock();
            match &event {
                ConnectorEvent::AccountsChanged(accounts) => match accounts.first() {
                    Some(account) => state.account = *account,
                    None => state.connected = false,
                },
                ConnectorEvent::ChainChanged(chain_id) => state.chain_id = *chain_id,
                ConnectorEvent::Disconnect => state.connected = false,
            }
        }
        let _ = self.events.send(event);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn id(&self) -> &str {
        &self.options.id
    }

    fn name(&self) -> &str {
        &self.options.name
    }

    fn ready(&self) -> bool {
        self.options.ready
    }

    async fn connect(&self, chain_id: Option<ChainId>) -> Result<ConnectorData, ConnectorError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(ConnectorError::UserRejected);
        }
        if let Some(chain_id) = chain_id {
            state.chain_id = chain_id;
        }
        state.connected = true;
        Ok(ConnectorData {
            account: state.account,
            chain_id: state.chain_id,
        })
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.lock().connected = false;
        Ok(())
    }

    async fn account(&self) -> Result<Address, ConnectorError> {
        let state = self.lock();
        if state.connected {
            Ok(state.account)
        } else {
            Err(ConnectorError::Other("not connected".into()))
        }
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectorError> {
        Ok(self.lock().chain_id)
    }

    async fn is_authorized(&self) -> bool {
        self.options.authorized
    }

    fn supports_switch_chain(&self) -> bool {
        self.options.supports_switch_chain
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<ChainId, ConnectorError> {
        if !self.options.supports_switch_chain {
            return Err(ConnectorError::SwitchChainNotSupported);
        }
        let reported = self.options.switch_reports.unwrap_or(chain_id);
        self.emit(ConnectorEvent::ChainChanged(reported));
        Ok(reported)
    }

    fn events(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }
}
