//! Provider plugin interfaces (spec.md §6) — external collaborators.
//!
//! Concrete resource/link provider implementations (e.g. a Kubernetes
//! deployment provider, an IAM policy link provider) are out of this core's
//! scope; this module only defines the trait boundary the executors call
//! through: method-per-RPC, `async_trait`, typed error classification.

use async_trait::async_trait;
use serde_json::Value;

use crate::retry::RetryPolicy;
use crate::status::LinkUpdateKind;

/// Classification of a provider-reported failure (spec.md §6/§7). Only
/// `Fatal` is allowed to escape the executor as a `deploy_engine::Error`;
/// `Retryable` and `Terminal` are always folded into status events.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Transient failure; the caller should retry per the provider's
    /// `RetryPolicy`.
    Retryable(String),
    /// Non-retryable failure specific to a resource deploy call.
    ResourceDeploy(String),
    /// Non-retryable failure specific to a resource destroy call.
    ResourceDestroy(String),
    /// Non-retryable failure specific to a link's resource-A update stage.
    LinkUpdateResourceA(String),
    /// Non-retryable failure specific to a link's resource-B update stage.
    LinkUpdateResourceB(String),
    /// Non-retryable failure specific to a link's intermediaries stage.
    LinkUpdateIntermediaries(String),
    /// Unclassified/infrastructure failure. Must be explicitly mapped by the
    /// caller into a `deploy_engine::Error` — there is no blanket `From`
    /// impl, so a fatal error can never silently masquerade as a status
    /// event.
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Retryable(m)
            | ProviderError::ResourceDeploy(m)
            | ProviderError::ResourceDestroy(m)
            | ProviderError::LinkUpdateResourceA(m)
            | ProviderError::LinkUpdateResourceB(m)
            | ProviderError::LinkUpdateIntermediaries(m)
            | ProviderError::Fatal(m) => m,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ProviderError {}

/// Input to a resource provider call: the fully resolved spec plus any
/// previously computed metadata (for updates).
#[derive(Debug, Clone, Default)]
pub struct ResourceProviderInput {
    pub spec: Value,
    pub prior_metadata: Option<Value>,
}

/// Output of a successful resource deploy call.
#[derive(Debug, Clone, Default)]
pub struct ResourceProviderOutput {
    /// Computed field values to merge back into the cached resolved spec.
    pub computed_fields: Value,
    pub metadata: Value,
}

/// Whether a resource provider reports the underlying system as stabilised.
#[derive(Debug, Clone, Copy, Default)]
pub struct StabilisationStatus {
    pub stabilised: bool,
}

/// Link kind — whether one endpoint strictly depends on the other reaching
/// a stable state (spec.md glossary: "hard link").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Hard,
    Soft,
}

/// Which endpoint of a link must exist/update first (spec.md glossary:
/// "priority resource"). `None` means the link contributes no dependency
/// edge at all (DESIGN.md Open Question #3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritySide {
    ResourceA,
    ResourceB,
    None,
}

/// Input/output for a single link pipeline stage. `kind` tells the provider
/// whether this call is creating, updating, or unwinding the link — the
/// three pipeline stages (`update_resource_a`/`update_resource_b`/
/// `update_intermediary_resources`) serve all three update kinds, there is
/// no separate provider-level destroy call (spec.md §6 lists only the three
/// `UpdateResourceA|B|IntermediaryResources` operations for links).
#[derive(Debug, Clone)]
pub struct LinkStageInput {
    pub kind: LinkUpdateKindInput,
    pub resource_a_spec: Value,
    pub resource_b_spec: Value,
}

/// Mirrors `LinkUpdateKind` at the provider boundary; kept as a distinct
/// type so provider implementors don't need to depend on `deploy_core::status`
/// for a single field.
pub type LinkUpdateKindInput = LinkUpdateKind;

#[derive(Debug, Clone, Default)]
pub struct LinkStageOutput {
    pub link_data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct IntermediaryResourceState {
    pub resource_name: String,
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct IntermediaryResourcesOutput {
    pub link_data: Value,
    pub intermediary_resource_states: Vec<IntermediaryResourceState>,
}

/// Trait for resource providers, consumed by the Resource Executor (C4).
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn resource_type(&self) -> &str;

    /// Resource types that must reach `Stabilised` (not merely
    /// `ConfigComplete`) before a resource of this type may start
    /// deploying when depending on one of them (spec.md §4.7).
    fn stabilised_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn retry_policy(&self) -> RetryPolicy;

    async fn deploy(
        &self,
        input: ResourceProviderInput,
    ) -> std::result::Result<ResourceProviderOutput, ProviderError>;

    async fn has_stabilised(
        &self,
        spec: &Value,
        metadata: &Value,
    ) -> std::result::Result<StabilisationStatus, ProviderError>;

    async fn destroy(&self, spec: &Value) -> std::result::Result<(), ProviderError>;
}

/// Trait for link providers, consumed by the Link Executor (C5).
#[async_trait]
pub trait LinkProvider: Send + Sync {
    fn kind(&self) -> LinkKind;

    fn priority_side(&self) -> PrioritySide;

    async fn retry_policy(&self) -> RetryPolicy;

    async fn update_resource_a(
        &self,
        input: &LinkStageInput,
    ) -> std::result::Result<LinkStageOutput, ProviderError>;

    async fn update_resource_b(
        &self,
        input: &LinkStageInput,
    ) -> std::result::Result<LinkStageOutput, ProviderError>;

    async fn update_intermediary_resources(
        &self,
        input: &LinkStageInput,
    ) -> std::result::Result<IntermediaryResourcesOutput, ProviderError>;
}
