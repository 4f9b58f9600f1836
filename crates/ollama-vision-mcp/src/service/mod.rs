//! Image analysis service shared by every tool call.

pub mod vision;

pub use vision::VisionService;
