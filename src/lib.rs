pub mod error;
pub mod http;
pub mod massive;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;

pub use error::ServerError;
pub use server::{McpServer, Settings};
