//! MCP tool implementations.

pub mod analyze_image;
pub mod describe_image;
pub mod identify_objects;
pub mod params;
pub mod read_text;
pub mod registry;

pub use registry::ToolRegistry;
