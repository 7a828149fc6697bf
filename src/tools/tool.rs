use async_trait::async_trait;
use schemars::schema::RootSchema;
use serde_json::Value;

use super::{SecurityPolicy, ToolError};

/// A named side-effect operation the engine can dispatch a `tool` step to.
///
/// Implementations parse their own arguments (serde over the declared
/// schema) and consult the [`SecurityPolicy`] before touching anything
/// outside the process. `call` may suspend on I/O; the engine treats every
/// invocation as potentially blocking.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier used in step configs and the tool enablement set.
    fn name(&self) -> String;

    /// What the tool does and when to use it.
    fn description(&self) -> String;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> RootSchema;

    /// Executes the tool. Security violations surface as
    /// [`ToolError::SecurityDenied`] without the operation being attempted.
    async fn call(&self, args: Value, policy: &SecurityPolicy) -> Result<String, ToolError>;
}
