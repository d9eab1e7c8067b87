pub mod cancel;
pub mod error;
pub mod hash;
pub mod id;
pub mod invocation_policy;
pub mod match_policy;
pub mod roles;
pub mod state;
pub mod uri;
