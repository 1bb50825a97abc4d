//! In-memory test doubles for the persistent store and the provider/resolver
//! plugin boundaries (spec.md §6, §8): a scripted stand-in with a
//! `Mutex`-guarded `HashMap` backing it, since the store has real state to
//! hold across calls, not just a canned response sequence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use deploy_core::error::{Error, Result};
use deploy_core::id::ResourceId;
use deploy_core::instance::{InstanceState, LinkState, ResourceState};
use deploy_core::provider::{
    IntermediaryResourcesOutput, LinkKind, LinkProvider, LinkStageInput, LinkStageOutput,
    PrioritySide, ProviderError, ResourceProvider, ResourceProviderInput, ResourceProviderOutput,
    StabilisationStatus,
};
use deploy_core::resolver::SpecResolver;
use deploy_core::retry::RetryPolicy;
use deploy_core::status::InstanceStatus;
use deploy_core::store::{ChildStore, InstanceStore, LinkStore, ResourceStore};

/// An in-memory `StateStore`, indexed the way a real backing store's
/// composite keys would be (instance id, then logical name).
#[derive(Default)]
pub struct InMemoryStore {
    instances: Mutex<HashMap<ResourceId, InstanceState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance directly, bypassing `save`, for test setup.
    pub fn seed(&self, state: InstanceState) {
        self.instances.lock().unwrap().insert(state.id, state);
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn get(&self, id: ResourceId) -> Result<InstanceState> {
        self.instances
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn save(&self, state: InstanceState) -> Result<()> {
        self.instances.lock().unwrap().insert(state.id, state);
        Ok(())
    }

    async fn update_status(&self, id: ResourceId, status: InstanceStatus) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        instance.status = status;
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, instance_id: ResourceId, name: &str) -> Result<ResourceState> {
        self.instances
            .lock()
            .unwrap()
            .get(&instance_id)
            .and_then(|i| i.resources.get(name).cloned())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn save(&self, instance_id: ResourceId, state: ResourceState) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;
        instance.resources.insert(state.resource_name.clone(), state);
        Ok(())
    }

    async fn remove(&self, instance_id: ResourceId, name: &str) -> Result<()> {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(&instance_id) {
            instance.resources.remove(name);
        }
        Ok(())
    }

    async fn save_dependencies(
        &self,
        instance_id: ResourceId,
        resource_name: &str,
        depends_on: Vec<String>,
    ) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;
        for dependency in depends_on {
            if let Some(dep) = instance.resources.get_mut(&dependency) {
                if !dep.depended_on_by.iter().any(|d| d == resource_name) {
                    dep.depended_on_by.push(resource_name.to_string());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for InMemoryStore {
    async fn get_by_name(
        &self,
        instance_id: ResourceId,
        resource_a: &str,
        resource_b: &str,
    ) -> Result<LinkState> {
        self.instances
            .lock()
            .unwrap()
            .get(&instance_id)
            .and_then(|i| i.links.get(&format!("{resource_a}::{resource_b}")).cloned())
            .ok_or_else(|| Error::NotFound(format!("{resource_a}::{resource_b}")))
    }

    async fn save(&self, instance_id: ResourceId, state: LinkState) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(&instance_id)
            .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;
        let key = format!("{}::{}", state.resource_a, state.resource_b);
        instance.links.insert(key, state);
        Ok(())
    }

    async fn remove(&self, instance_id: ResourceId, resource_a: &str, resource_b: &str) -> Result<()> {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(&instance_id) {
            instance.links.remove(&format!("{resource_a}::{resource_b}"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChildStore for InMemoryStore {
    async fn get(&self, parent_id: ResourceId, name: &str) -> Result<InstanceState> {
        self.instances
            .lock()
            .unwrap()
            .get(&parent_id)
            .and_then(|i| i.child_blueprints.get(name).cloned())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn attach(&self, parent_id: ResourceId, name: &str, child_id: ResourceId) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        let parent = instances
            .get_mut(&parent_id)
            .ok_or_else(|| Error::NotFound(parent_id.to_string()))?;
        parent
            .child_blueprints
            .entry(name.to_string())
            .or_insert_with(|| InstanceState::new(child_id));
        Ok(())
    }

    async fn detach(&self, parent_id: ResourceId, name: &str) -> Result<()> {
        if let Some(parent) = self.instances.lock().unwrap().get_mut(&parent_id) {
            parent.child_blueprints.remove(name);
        }
        Ok(())
    }
}

/// A scripted resource provider: always succeeds, reports stable on the
/// first poll, unless `fail_deploy`/`fail_destroy` is set.
pub struct ScriptedResourceProvider {
    pub resource_type: String,
    pub fail_deploy: bool,
    pub fail_destroy: bool,
    pub retryable: bool,
}

impl ScriptedResourceProvider {
    pub fn succeeding(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            fail_deploy: false,
            fail_destroy: false,
            retryable: false,
        }
    }

    pub fn failing(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            fail_deploy: true,
            fail_destroy: false,
            retryable: false,
        }
    }
}

#[async_trait]
impl ResourceProvider for ScriptedResourceProvider {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        }
    }

    async fn deploy(
        &self,
        input: ResourceProviderInput,
    ) -> std::result::Result<ResourceProviderOutput, ProviderError> {
        if self.fail_deploy {
            return if self.retryable {
                Err(ProviderError::Retryable("scripted failure".to_string()))
            } else {
                Err(ProviderError::ResourceDeploy("scripted failure".to_string()))
            };
        }
        Ok(ResourceProviderOutput {
            computed_fields: input.spec,
            metadata: Value::String(format!("{}-metadata", self.resource_type)),
        })
    }

    async fn has_stabilised(
        &self,
        _spec: &Value,
        _metadata: &Value,
    ) -> std::result::Result<StabilisationStatus, ProviderError> {
        Ok(StabilisationStatus { stabilised: true })
    }

    async fn destroy(&self, _spec: &Value) -> std::result::Result<(), ProviderError> {
        if self.fail_destroy {
            Err(ProviderError::ResourceDestroy("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A scripted link provider: resource A has priority, all three stages
/// succeed trivially.
pub struct ScriptedLinkProvider {
    pub priority: PrioritySide,
    pub fail: bool,
}

impl ScriptedLinkProvider {
    pub fn succeeding(priority: PrioritySide) -> Self {
        Self { priority, fail: false }
    }
}

#[async_trait]
impl LinkProvider for ScriptedLinkProvider {
    fn kind(&self) -> LinkKind {
        LinkKind::Hard
    }

    fn priority_side(&self) -> PrioritySide {
        self.priority
    }

    async fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        }
    }

    async fn update_resource_a(
        &self,
        _input: &LinkStageInput,
    ) -> std::result::Result<LinkStageOutput, ProviderError> {
        if self.fail {
            return Err(ProviderError::LinkUpdateResourceA("scripted failure".to_string()));
        }
        Ok(LinkStageOutput::default())
    }

    async fn update_resource_b(
        &self,
        _input: &LinkStageInput,
    ) -> std::result::Result<LinkStageOutput, ProviderError> {
        Ok(LinkStageOutput::default())
    }

    async fn update_intermediary_resources(
        &self,
        _input: &LinkStageInput,
    ) -> std::result::Result<IntermediaryResourcesOutput, ProviderError> {
        Ok(IntermediaryResourcesOutput::default())
    }
}

/// A resolver that returns the spec unchanged — sufficient for scenarios
/// that don't exercise late substitution.
pub struct NoopResolver;

#[async_trait]
impl SpecResolver for NoopResolver {
    async fn resolve(&self, _resource_name: &str, spec: Value) -> Result<Value> {
        Ok(spec)
    }
}
