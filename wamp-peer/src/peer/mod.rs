mod client;
pub mod config;
pub mod connector;
pub mod engine;
pub mod handlers;
pub mod incident;
pub mod petition;
pub mod pub_sub;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod streaming;
pub mod timeout;

pub use config::{
    DEFAULT_AGENT,
    IncidentSlot,
    SessionConfig,
    StateChangeSlot,
};
pub use connector::{
    connector::{
        ConnectionWish,
        Connector,
    },
    web_socket_connector::WebSocketHost,
};
pub use handlers::{
    BoundSlot,
    CallSlot,
    ChallengeSlot,
    EventSlot,
    InterruptSlot,
    StreamSlot,
    bind_executor,
};
pub use incident::{
    Incident,
    IncidentKind,
};
pub use petition::{
    Authentication,
    Challenge,
    Petition,
    Reason,
    Welcome,
};
pub use pub_sub::{
    Event,
    Pub,
    PubOptions,
    ScopedSubscription,
    Subscription,
    Topic,
};
pub use rpc::{
    CallChit,
    Interruption,
    Invocation,
    Outcome,
    PendingCall,
    Procedure,
    ProgressiveCall,
    Registration,
    Responder,
    Rpc,
    RpcOptions,
    RpcResult,
    ScopedRegistration,
};
pub use session::Session;
pub use streaming::{
    CalleeChannel,
    CallerChannel,
    CallerChunk,
    StreamMode,
    StreamRequest,
};
