pub mod client;
pub mod download;
pub mod gateway;
pub mod resolver;
pub mod stream;
