pub mod codec;
pub mod json;
pub mod message_pack;
