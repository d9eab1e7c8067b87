pub mod connector;
mod direct_connector;
pub mod web_socket_connector;
