//! Late substitution/reference resolution (spec.md §1, §4.4 step 2) —
//! external collaborator. Populating a resource's spec from references to
//! other resources' computed fields is out of this core's scope; the
//! Resource Executor only knows to call this trait when a dotted path under
//! the resource appears in `ChangeSet::resolve_on_deploy`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait SpecResolver: Send + Sync {
    /// Finalise `spec` for `resource_name`, substituting any dotted
    /// references that were deferred to deploy time.
    async fn resolve(&self, resource_name: &str, spec: Value) -> Result<Value>;
}
