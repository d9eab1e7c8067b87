pub mod common;
pub mod kind;
pub mod message;
