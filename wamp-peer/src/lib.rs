//! An asynchronous client peer for the [Web Application Messaging Protocol](https://wamp-proto.org/).
//!
//! A [`peer::Session`] joins a realm on a router and acts as any combination of publisher,
//! subscriber, caller, and callee. All protocol state for a session is owned by a single task, so
//! sessions can be cloned and shared freely.
pub mod codec;
pub mod core;
pub mod message;
pub mod peer;
pub mod transport;
