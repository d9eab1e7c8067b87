use std::{
    fmt::Debug,
    sync::Arc,
    time::Duration,
};

use tokio::runtime::Handle;

use crate::{
    core::{
        roles::ClientRole,
        state::SessionState,
    },
    peer::incident::Incident,
};

pub const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Receives [`Incident`]s reported by a session.
pub type IncidentSlot = Arc<dyn Fn(Incident) + Send + Sync>;

/// Receives every state change of a session.
pub type StateChangeSlot = Arc<dyn Fn(SessionState) + Send + Sync>;

/// Configuration for a [`Session`][`crate::peer::session::Session`].
#[derive(Clone)]
pub struct SessionConfig {
    /// Name of the session, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router.
    pub agent: String,
    /// Roles implemented by the session.
    pub roles: Vec<ClientRole>,
    /// Timeout for operations that do not specify their own.
    pub fallback_timeout: Option<Duration>,
    /// Executor for user handlers that are not bound to their own executor.
    ///
    /// Defaults to the runtime the session was created on.
    pub user_executor: Option<Handle>,
    /// How long to wait for the transport to flush an ABORT or close.
    pub abort_timeout: Duration,
    pub incident_slot: Option<IncidentSlot>,
    pub state_change_slot: Option<StateChangeSlot>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            roles: Vec::from(ClientRole::ALL),
            fallback_timeout: None,
            user_executor: None,
            abort_timeout: Duration::from_secs(5),
            incident_slot: None,
            state_change_slot: None,
        }
    }
}

impl Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("roles", &self.roles)
            .field("fallback_timeout", &self.fallback_timeout)
            .field("user_executor", &self.user_executor.is_some())
            .field("abort_timeout", &self.abort_timeout)
            .field("incident_slot", &self.incident_slot.is_some())
            .field("state_change_slot", &self.state_change_slot.is_some())
            .finish()
    }
}
