use anyhow::Result;
use async_trait::async_trait;

use crate::{
    codec::codec::CodecId,
    peer::connector::connector::Connector,
    transport::{
        direct::DirectDialer,
        transport::Transport,
    },
};

#[async_trait]
impl Connector for DirectDialer {
    async fn connect(&self, codec: CodecId) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.dial(codec)?))
    }
}
