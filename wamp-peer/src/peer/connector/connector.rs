use std::{
    fmt::Debug,
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    codec::codec::CodecId,
    transport::transport::Transport,
};

/// A type for opening a transport to a router.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Opens a transport that carries messages encoded with the given codec.
    async fn connect(&self, codec: CodecId) -> Result<Box<dyn Transport>>;
}

/// One way of reaching a router, tried by
/// [`Session::connect`][`crate::peer::session::Session::connect`].
#[derive(Debug, Clone)]
pub struct ConnectionWish {
    pub connector: Arc<dyn Connector>,
    pub codec: CodecId,
}

impl ConnectionWish {
    pub fn new<C>(connector: C, codec: CodecId) -> Self
    where
        C: Connector + 'static,
    {
        Self {
            connector: Arc::new(connector),
            codec,
        }
    }
}
