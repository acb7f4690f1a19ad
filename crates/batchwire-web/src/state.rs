//! Application state.

use std::sync::Arc;

use crate::auth::SessionStore;
use crate::bridge::{EventBridge, FactSender, DEFAULT_FACT_CAPACITY};
use crate::broker::{BrokerConfig, ConnectionBroker};
use crate::config::ServerConfig;
use crate::dispatch::AnalysisDispatcher;
use crate::ledger::OutcomeLedger;
use crate::staging::UploadStaging;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<ConnectionBroker>,
    pub facts: FactSender,
    pub ledger: Arc<OutcomeLedger>,
    pub staging: Arc<UploadStaging>,
    pub dispatcher: Arc<dyn AnalysisDispatcher>,
    pub sessions: Arc<SessionStore>,
    pub internal_token: Arc<str>,
}

impl AppState {
    /// Build the state and start the event bridge. Must run inside a Tokio runtime.
    pub fn new(config: &ServerConfig, dispatcher: Arc<dyn AnalysisDispatcher>) -> Self {
        let broker = Arc::new(ConnectionBroker::new(BrokerConfig {
            outbound_capacity: config.outbound_capacity,
        }));
        let (facts, _bridge) = EventBridge::new(Arc::clone(&broker)).spawn(DEFAULT_FACT_CAPACITY);

        Self {
            broker,
            facts,
            ledger: Arc::new(OutcomeLedger::new(config.ledger_capacity)),
            staging: Arc::new(UploadStaging::new(config.max_upload_bytes)),
            dispatcher,
            sessions: Arc::new(SessionStore::new(config.sessions.clone())),
            internal_token: Arc::from(config.internal_token.as_str()),
        }
    }
}
