//! Backend capability sessions.

use async_trait::async_trait;

use crate::error::Result;
use crate::tools::{ToolArguments, ToolContent, ToolManifestEntry};

/// An already-connected backend that advertises and executes tools.
///
/// Connection lifecycle is owned by whoever created the session; the
/// registry and dispatcher only borrow it.
#[async_trait]
pub trait CapabilitySession: Send + Sync {
    /// Stable name used in logs and collision reports.
    fn name(&self) -> &str;

    /// Tools this session advertises.
    async fn list_tools(&self) -> Result<Vec<ToolManifestEntry>>;

    /// Execute a tool. The first returned item is the primary result.
    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ToolContent>>;
}
