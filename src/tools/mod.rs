//! Tool manifests, arguments, and results.

pub mod arguments;
pub mod content;
pub mod manifest;

pub use arguments::ToolArguments;
pub use content::ToolContent;
pub use manifest::ToolManifestEntry;
