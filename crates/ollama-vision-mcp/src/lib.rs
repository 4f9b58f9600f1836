//! Ollama Vision MCP Server — image analysis tools backed by local Ollama vision models.

pub mod config;
pub mod logging;
pub mod protocol;
pub mod repl;
pub mod service;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{load_config, resolve_config_path};
pub use protocol::ProtocolHandler;
pub use service::VisionService;
pub use transport::StdioTransport;
