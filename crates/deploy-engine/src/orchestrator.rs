//! Orchestrator (C1): public `deploy`/`destroy` entry points, the phase
//! pipeline, and the listen-and-dispatch loop (spec.md §4.1).
//!
//! `tokio::spawn` returns immediately; a phase sequence runs in the
//! background with a loop reacting to stage completion, a five-phase
//! pipeline, a phase-status interceptor, and rollback as spec.md §4.1
//! describes.
//!
//! **Dependent-release scheduling** (spec.md §4.4): the Deployment Planner
//! (C3) annotates every node with its `direct_dependencies`; Phase 5 starts
//! a node the moment those dependencies are satisfied rather than waiting
//! for its whole group to finish, dispatching everything through a single
//! `FuturesUnordered` so dependents of a fast resource can start while
//! slower siblings in the same group are still running. A dependency is
//! satisfied once it reaches `ConfigComplete` unless the dependent's
//! provider lists the dependency's resource type in
//! `stabilised_dependencies()` (spec.md §4.7), in which case the dependency
//! must reach full stability first.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tracing::{info, instrument, warn};

use deploy_core::changeset::ChangeSet;
use deploy_core::instance::{InstanceState, ResourceState};
use deploy_core::node::{AnnotatedNode, DeploymentNode, ElementKey};
use deploy_core::provider::ResourceProvider;
use deploy_core::resolver::SpecResolver;
use deploy_core::status::{ChangeKind, LinkUpdateKind};
use deploy_core::store::{ChildStore, InstanceStore, LinkStore, ResourceStore, StateStore};
use deploy_core::config::OrchestratorConfig;
use deploy_core::ResourceId;

use crate::bus::EventSenders;
use crate::child::{run_child, ChildContext, ChildMode, ChildOutcome};
use crate::error::Error;
use crate::events::{DeploymentUpdateMessage, Event, FinishMessage};
use crate::link::{deploy_link, LinkDeployResult, LinkOutcome};
use crate::planner::{plan_direct_dependencies, LinkProviderMap};
use crate::removal::{plan_removals, RemovalElement};
use crate::resource::{deploy_resource, destroy_resource, ResourceOutcome};
use crate::state::{DeploymentState, ElementStage};
use crate::status_algebra::{determine_instance_status, preparing_status, InstanceOperation, Phase};

/// Everything the orchestrator needs to run a deployment that doesn't vary
/// per call: the persistent store, the provider registries, and tuning
/// config. Providers are keyed by logical resource/link-pair name rather
/// than resource *type* — wiring a type to a concrete plugin instance is
/// itself an external-collaborator concern (spec.md §1), so this context
/// simply holds whatever map the caller (the "Plan" phase's resource-provider
/// map, spec.md §4.1 step 2) already resolved.
pub struct OrchestratorContext {
    pub store: Arc<dyn StateStore>,
    pub resource_providers: HashMap<String, Arc<dyn ResourceProvider>>,
    pub link_providers: LinkProviderMap,
    pub resolver: Arc<dyn SpecResolver>,
    pub config: OrchestratorConfig,
}

/// Input to `deploy`/`destroy` (spec.md §4.1's `DeployInput`/`DestroyInput`).
pub struct DeployInput {
    pub instance_id: Option<ResourceId>,
    pub changes: ChangeSet,
    pub rollback: bool,
    /// Precomputed parallel groups of resource/child nodes for the deploy
    /// phase (authoring the DAG is out of this core's scope, spec.md §1).
    /// Links are never members of a group — they are dispatched by the
    /// pending-link gate once both endpoints stabilise (spec.md §4.5).
    pub groups: Vec<Vec<DeploymentNode>>,
    pub tree_path: Vec<ResourceId>,
    pub include_path: Vec<String>,
    /// Per-resource spec, already resolved except for any dotted path listed
    /// in `changes.resolve_on_deploy` (spec.md §4.4 step 1/2).
    pub partially_resolved_resources: HashMap<String, Value>,
}

impl Default for DeployInput {
    fn default() -> Self {
        Self {
            instance_id: None,
            changes: ChangeSet::default(),
            rollback: false,
            groups: Vec::new(),
            tree_path: Vec::new(),
            include_path: Vec::new(),
            partially_resolved_resources: HashMap::new(),
        }
    }
}

/// Deploy: spawns the pipeline and returns immediately (spec.md §4.1 —
/// "both are non-blocking"). Completion is observed on `external`.
pub fn deploy(
    ctx: Arc<OrchestratorContext>,
    input: DeployInput,
    external: EventSenders,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(ctx, input, external, InstanceOperation::Deploy))
}

/// Destroy: same shape as `deploy`, `input.changes` must enumerate what is
/// being removed (spec.md §4.1). The entire removal path runs; group
/// dispatch naturally finds nothing left to deploy when `changes` contains
/// only removals.
pub fn destroy(
    ctx: Arc<OrchestratorContext>,
    input: DeployInput,
    external: EventSenders,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(ctx, input, external, InstanceOperation::Destroy))
}

async fn emit_deployment_update(
    ctx: &OrchestratorContext,
    external: &EventSenders,
    instance_id: ResourceId,
    status: deploy_core::status::InstanceStatus,
) {
    if let Err(e) = InstanceStore::update_status(ctx.store.as_ref(), instance_id, status).await {
        warn!(error = %e, "failed to persist instance status");
    }
    let message = DeploymentUpdateMessage {
        instance_id,
        status,
        timestamp: chrono::Utc::now().timestamp(),
    };
    let _ = external.deployment_update.send(message).await;
}

async fn emit_finish(
    ctx: &OrchestratorContext,
    external: &EventSenders,
    instance_id: ResourceId,
    status: deploy_core::status::InstanceStatus,
    failure_reasons: Vec<String>,
) {
    if let Err(e) = InstanceStore::update_status(ctx.store.as_ref(), instance_id, status).await {
        warn!(error = %e, "failed to persist instance status");
    }
    let message = FinishMessage {
        instance_id,
        status,
        failure_reasons,
        timestamp: chrono::Utc::now().timestamp(),
    };
    let _ = external.finish.send(message).await;
}

/// The five-phase pipeline shared by `deploy` and `destroy` (spec.md §4.1).
#[instrument(skip(ctx, input, external))]
async fn run(
    ctx: Arc<OrchestratorContext>,
    input: DeployInput,
    external: EventSenders,
    requested: InstanceOperation,
) {
    if input.tree_path.len() > ctx.config.max_blueprint_depth {
        let _ = external
            .err
            .send(Error::DepthExceeded {
                max: ctx.config.max_blueprint_depth,
            })
            .await;
        return;
    }

    // --- Phase 1: Prepare ---
    let is_new = input.instance_id.is_none();
    let instance_id = input.instance_id.unwrap_or_else(ResourceId::new);

    let mut instance = if is_new {
        InstanceState::new(instance_id)
    } else {
        match InstanceStore::get(ctx.store.as_ref(), instance_id).await {
            Ok(state) => state,
            Err(e) => {
                let _ = external.err.send(Error::StateStore(e)).await;
                return;
            }
        }
    };

    if !is_new && instance.is_busy() {
        let failed = determine_instance_status(requested, Phase::Failed, input.rollback, false);
        emit_finish(
            &ctx,
            &external,
            instance_id,
            failed,
            vec![format!("instance {instance_id} is busy (status: {:?})", instance.status)],
        )
        .await;
        return;
    }

    if input.changes.is_empty() {
        if is_new {
            let failed = determine_instance_status(requested, Phase::Failed, input.rollback, true);
            emit_finish(&ctx, &external, instance_id, failed, vec!["empty changes".to_string()]).await;
        } else {
            // Idempotent no-op re-run: affirm the current status, no element
            // work (spec.md §8 "re-running Deploy on an already-deployed
            // instance with an empty change set yields a finish message").
            emit_finish(&ctx, &external, instance_id, instance.status, Vec::new()).await;
        }
        return;
    }

    emit_deployment_update(&ctx, &external, instance_id, preparing_status()).await;
    let prepare_start = Instant::now();

    let state = DeploymentState::new();
    let mut failure_reasons: Vec<String> = Vec::new();

    // --- Phase 2: Plan ---
    let annotated_groups = plan_direct_dependencies(&input.groups, &input.changes, &ctx.link_providers);

    let nodes_to_be_deployed: HashSet<String> = input
        .groups
        .iter()
        .flatten()
        .map(|n| n.logical_name().to_string())
        .collect();

    register_pending_links(&state, &input.changes);

    // --- Phase 3: Remove ---
    match plan_removals(&instance, &input.changes, &nodes_to_be_deployed) {
        Ok(removal_groups) => {
            if !removal_groups
                .iter()
                .all(|group| run_removal_group(&ctx, &mut instance, instance_id, input.rollback, group, &external, &mut failure_reasons).await)
            {
                // A removal group reported failures; stop here rather than
                // proceeding to deploy on top of a partially-removed state.
                let status = determine_instance_status(requested, Phase::Failed, input.rollback, is_new);
                emit_finish(&ctx, &external, instance_id, status, failure_reasons).await;
                return;
            }
        }
        Err(e) => {
            let status = determine_instance_status(requested, Phase::Failed, input.rollback, is_new);
            emit_finish(&ctx, &external, instance_id, status, vec![e.to_string()]).await;
            return;
        }
    }

    state.set_prepare_duration(prepare_start.elapsed());

    // --- Phase 4: Persist skeleton ---
    let deploying_status = determine_instance_status(requested, Phase::Starting, input.rollback, is_new);
    if is_new {
        instance.status = deploying_status;
        if let Err(e) = InstanceStore::save(ctx.store.as_ref(), instance.clone()).await {
            let _ = external.err.send(Error::StateStore(e)).await;
            return;
        }
    }
    emit_deployment_update(&ctx, &external, instance_id, deploying_status).await;

    // --- Phase 5: Deploy (dependent-release dispatch, spec.md §4.4) ---
    run_deploy_phase(&ctx, &state, &input, &mut instance, instance_id, annotated_groups, &external, &mut failure_reasons).await;

    let any_failure = !failure_reasons.is_empty();
    let final_status = determine_instance_status(
        requested,
        if any_failure { Phase::Failed } else { Phase::Completed },
        input.rollback,
        is_new,
    );

    if let Err(e) = InstanceStore::update_status(ctx.store.as_ref(), instance_id, final_status).await {
        warn!(error = %e, "failed to persist final instance status");
    }
    emit_finish(&ctx, &external, instance_id, final_status, failure_reasons).await;
    info!(%instance_id, ?final_status, "deployment run finished");
}

/// Register every outbound link this run will create/update into the
/// pending-link gate (spec.md §4.5). Removed links bypass this entirely —
/// they're handled by the Removal Planner independently of resource
/// completion.
fn register_pending_links(state: &DeploymentState, changes: &ChangeSet) {
    for (resource_name, change) in &changes.resource_changes {
        for link in &change.new_outbound_links {
            state.register_pending_link(resource_name, &link.target_resource_name);
        }
        for link in &change.outbound_link_changes {
            state.register_pending_link(resource_name, &link.target_resource_name);
        }
    }
}

fn link_update_kind(changes: &ChangeSet, a: &str, b: &str) -> LinkUpdateKind {
    if let Some(change) = changes.resource_changes.get(a) {
        if change.new_outbound_links.iter().any(|l| l.target_resource_name == b) {
            return LinkUpdateKind::Create;
        }
    }
    LinkUpdateKind::Update
}

/// Which side of a completed link declared the outbound edge — i.e. which
/// one depends on the other for the Removal Planner's "live dependents"
/// check (spec.md §4.2/§7). `None` for a link `changes` doesn't mention an
/// outbound edge for (e.g. one only being torn down).
fn link_dependency_edge_for_save(changes: &ChangeSet, a: &str, b: &str) -> Option<(String, String)> {
    let declares_link_to = |from: &str, to: &str| {
        changes.resource_changes.get(from).is_some_and(|change| {
            change
                .new_outbound_links
                .iter()
                .chain(&change.outbound_link_changes)
                .any(|link| link.target_resource_name == to)
        })
    };
    if declares_link_to(a, b) {
        Some((a.to_string(), b.to_string()))
    } else if declares_link_to(b, a) {
        Some((b.to_string(), a.to_string()))
    } else {
        None
    }
}

/// Whether `dependent_name`'s dependency on `dependency` is satisfied enough
/// to start: `ConfigComplete` suffices unless `dependent_name`'s provider
/// lists the dependency's resource type in `stabilised_dependencies()`, in
/// which case full stability is required (spec.md §4.7).
fn dependency_satisfied(
    ctx: &OrchestratorContext,
    state: &DeploymentState,
    dependent_name: &str,
    dependency: &ElementKey,
) -> bool {
    let ElementKey::Resource(dependency_name) = dependency else {
        return true;
    };

    let requires_full_stability = ctx
        .resource_providers
        .get(dependent_name)
        .zip(ctx.resource_providers.get(dependency_name))
        .is_some_and(|(dependent_provider, dependency_provider)| {
            dependent_provider
                .stabilised_dependencies()
                .iter()
                .any(|t| t == dependency_provider.resource_type())
        });

    if requires_full_stability {
        state.is_stable(dependency)
    } else {
        state.is_config_complete(dependency) || state.is_stable(dependency)
    }
}

/// Outcome of dispatching one resource/child node, reported back to the
/// central dispatch loop for it to apply (store writes + `instance`
/// mutation happen there, never inside the future itself — spec.md §9's
/// single-writer discipline, generalised from the event bus to `instance`).
enum NodeResult {
    ResourceDeployed(ResourceState),
    ChildDeployed(ResourceId),
    Untouched,
    Failed,
}

enum DispatchOutcome {
    Node {
        key: ElementKey,
        result: NodeResult,
    },
    Link {
        resource_a: String,
        resource_b: String,
        result: Option<LinkDeployResult>,
    },
}

type DispatchFuture<'a> = Pin<Box<dyn std::future::Future<Output = DispatchOutcome> + Send + 'a>>;

/// Flatten the planner's per-group annotation into a single dependency map
/// plus a flat pending list, then dispatch nodes as soon as their direct
/// dependencies are satisfied and links as soon as both endpoints stabilise,
/// until nothing is left pending or in flight.
#[allow(clippy::too_many_arguments)]
async fn run_deploy_phase(
    ctx: &Arc<OrchestratorContext>,
    state: &DeploymentState,
    input: &DeployInput,
    instance: &mut InstanceState,
    instance_id: ResourceId,
    annotated_groups: Vec<Vec<AnnotatedNode>>,
    external: &EventSenders,
    failure_reasons: &mut Vec<String>,
) {
    let mut dependencies: HashMap<ElementKey, HashSet<ElementKey>> = HashMap::new();
    let mut pending: Vec<DeploymentNode> = Vec::new();
    for annotated in annotated_groups.into_iter().flatten() {
        dependencies.insert(annotated.key(), annotated.direct_dependencies);
        pending.push(annotated.node);
    }

    let mut in_flight: FuturesUnordered<DispatchFuture<'_>> = FuturesUnordered::new();

    loop {
        let mut i = 0;
        while i < pending.len() {
            let deps = dependencies.get(&pending[i].key()).cloned().unwrap_or_default();
            let ready = deps
                .iter()
                .all(|dep| dependency_satisfied(ctx, state, pending[i].logical_name(), dep));
            if ready {
                let node = pending.remove(i);
                in_flight.push(dispatch_node(ctx, state, input, instance, instance_id, node, external));
            } else {
                i += 1;
            }
        }

        if in_flight.is_empty() {
            for node in pending.drain(..) {
                failure_reasons.push(format!(
                    "{} could not be scheduled: unsatisfied dependency",
                    node.logical_name()
                ));
            }
            break;
        }

        let Some(outcome) = in_flight.next().await else {
            break;
        };

        match outcome {
            DispatchOutcome::Node { key, result } => {
                match result {
                    NodeResult::ResourceDeployed(resource_state) => {
                        instance
                            .resources
                            .insert(resource_state.resource_name.clone(), resource_state.clone());
                        let _ = ResourceStore::save(ctx.store.as_ref(), instance_id, resource_state).await;
                    }
                    NodeResult::ChildDeployed(child_id) => {
                        if let ElementKey::Child(name) = &key {
                            let _ = ChildStore::attach(ctx.store.as_ref(), instance_id, name, child_id).await;
                            if let Ok(child_state) = InstanceStore::get(ctx.store.as_ref(), child_id).await {
                                instance.child_blueprints.insert(name.clone(), child_state);
                            }
                        }
                    }
                    NodeResult::Untouched => {}
                    NodeResult::Failed => {
                        failure_reasons.push(format!("{key} failed to deploy"));
                    }
                }

                if let ElementKey::Resource(name) = &key {
                    for (a, b) in state.update_link_deployment_state(name) {
                        in_flight.push(dispatch_link(ctx, state, input, instance_id, a, b, external));
                    }
                }
            }
            DispatchOutcome::Link {
                resource_a,
                resource_b,
                result,
            } => match result {
                Some(link_result) => {
                    let link_state = deploy_core::instance::LinkState {
                        resource_a: resource_a.clone(),
                        resource_b: resource_b.clone(),
                        intermediary_resource_ids: link_result
                            .intermediary_resource_states
                            .iter()
                            .map(|s| s.id.clone())
                            .collect(),
                    };
                    instance
                        .links
                        .insert(format!("{resource_a}::{resource_b}"), link_state.clone());
                    let _ = LinkStore::save(ctx.store.as_ref(), instance_id, link_state).await;

                    if let Some((dependent, dependency)) =
                        link_dependency_edge_for_save(&input.changes, &resource_a, &resource_b)
                    {
                        let _ = ResourceStore::save_dependencies(
                            ctx.store.as_ref(),
                            instance_id,
                            &dependent,
                            vec![dependency.clone()],
                        )
                        .await;
                        if let Some(dep_res) = instance.resources.get_mut(&dependency) {
                            if !dep_res.depended_on_by.iter().any(|d| d == &dependent) {
                                dep_res.depended_on_by.push(dependent);
                            }
                        }
                    }
                }
                None => {
                    failure_reasons.push(format!("link {resource_a}::{resource_b} failed"));
                }
            },
        }
    }
}

fn dispatch_node<'a>(
    ctx: &'a Arc<OrchestratorContext>,
    state: &'a DeploymentState,
    input: &'a DeployInput,
    instance: &InstanceState,
    instance_id: ResourceId,
    node: DeploymentNode,
    external: &'a EventSenders,
) -> DispatchFuture<'a> {
    match node {
        DeploymentNode::Resource(chain_link) => {
            let resource_name = chain_link.resource_name;
            let prior_metadata = instance.resources.get(&resource_name).map(|r| r.metadata.clone());
            let existing_depended_on_by = instance
                .resources
                .get(&resource_name)
                .map(|r| r.depended_on_by.clone())
                .unwrap_or_default();
            Box::pin(async move {
                let result = deploy_resource_node(
                    ctx,
                    state,
                    input,
                    prior_metadata,
                    existing_depended_on_by,
                    instance_id,
                    &resource_name,
                    external,
                )
                .await;
                DispatchOutcome::Node {
                    key: ElementKey::Resource(resource_name),
                    result,
                }
            })
        }
        DeploymentNode::Child(child_ref) => {
            let child_name = child_ref.child_name;
            let existing_child_id = instance.child_blueprints.get(&child_name).map(|c| c.id);
            Box::pin(async move {
                let result =
                    deploy_child_node(ctx, input, instance_id, &child_name, existing_child_id, external).await;
                DispatchOutcome::Node {
                    key: ElementKey::Child(child_name),
                    result,
                }
            })
        }
    }
}

fn dispatch_link<'a>(
    ctx: &'a Arc<OrchestratorContext>,
    state: &'a DeploymentState,
    input: &'a DeployInput,
    instance_id: ResourceId,
    resource_a: String,
    resource_b: String,
    external: &'a EventSenders,
) -> DispatchFuture<'a> {
    Box::pin(async move {
        let result = run_link(ctx, state, input, instance_id, &resource_a, &resource_b, external).await;
        DispatchOutcome::Link {
            resource_a,
            resource_b,
            result,
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_link(
    ctx: &OrchestratorContext,
    state: &DeploymentState,
    input: &DeployInput,
    instance_id: ResourceId,
    resource_a: &str,
    resource_b: &str,
    external: &EventSenders,
) -> Option<LinkDeployResult> {
    let Some(provider) = ctx
        .link_providers
        .get(&(resource_a.to_string(), resource_b.to_string()))
    else {
        warn!(resource_a, resource_b, "missing link provider");
        return None;
    };

    let kind = link_update_kind(&input.changes, resource_a, resource_b);
    let spec_a = state
        .resource_data(resource_a)
        .map(|d| d.spec)
        .unwrap_or(Value::Null);
    let spec_b = state
        .resource_data(resource_b)
        .map(|d| d.spec)
        .unwrap_or(Value::Null);

    let key = ElementKey::Link(resource_a.to_string(), resource_b.to_string());
    state.transition(key.clone(), ElementStage::InProgress);

    let outcome = deploy_link(
        instance_id,
        resource_a,
        resource_b,
        kind,
        input.rollback,
        spec_a,
        spec_b,
        provider.as_ref(),
        state,
        external,
    )
    .await;

    match outcome {
        LinkOutcome::Completed(result) => {
            state.transition(key, ElementStage::Created);
            Some(result)
        }
        LinkOutcome::Failed => {
            state.clear(&key);
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn deploy_resource_node(
    ctx: &Arc<OrchestratorContext>,
    state: &DeploymentState,
    input: &DeployInput,
    prior_metadata: Option<Value>,
    existing_depended_on_by: Vec<String>,
    instance_id: ResourceId,
    resource_name: &str,
    external: &EventSenders,
) -> NodeResult {
    if !state.check_and_set_deployment_started(&ElementKey::Resource(resource_name.to_string())) {
        return NodeResult::Untouched;
    }

    let kind = if input.changes.new_resources.iter().any(|n| n == resource_name) {
        ChangeKind::Create
    } else if input.changes.resource_changes.contains_key(resource_name) {
        ChangeKind::Update
    } else {
        // Untouched resource that merely appears in the externally supplied
        // dependency DAG (e.g. a dependency of something being redeployed):
        // nothing to do, but its dependents may still be waiting on it.
        state.transition(ElementKey::Resource(resource_name.to_string()), ElementStage::Updated);
        return NodeResult::Untouched;
    };

    let Some(mut spec) = input.partially_resolved_resources.get(resource_name).cloned() else {
        warn!(resource_name, "missing partially resolved resource");
        return NodeResult::Failed;
    };

    if input.changes.has_resolve_on_deploy(resource_name) {
        match ctx.resolver.resolve(resource_name, spec.clone()).await {
            Ok(resolved) => spec = resolved,
            Err(e) => {
                warn!(resource_name, error = %e, "late resolution failed");
                return NodeResult::Failed;
            }
        }
    }

    let Some(provider) = ctx.resource_providers.get(resource_name) else {
        warn!(resource_name, "missing resource provider");
        return NodeResult::Failed;
    };

    let key = ElementKey::Resource(resource_name.to_string());
    state.transition(key.clone(), ElementStage::InProgress);

    let outcome = deploy_resource(
        instance_id,
        resource_name,
        kind,
        input.rollback,
        spec.clone(),
        prior_metadata,
        provider.as_ref(),
        ctx.config.stability_polling,
        state,
        external,
    )
    .await;

    match outcome {
        ResourceOutcome::Deployed { metadata } => {
            let final_stage = match kind {
                ChangeKind::Create => ElementStage::Created,
                _ => ElementStage::Updated,
            };
            state.transition(key, final_stage);
            let resolved_spec = state.resource_data(resource_name).map(|d| d.spec).unwrap_or(spec);
            NodeResult::ResourceDeployed(ResourceState {
                id: ResourceId::new(),
                resource_name: resource_name.to_string(),
                spec: resolved_spec,
                metadata,
                depended_on_by: existing_depended_on_by,
            })
        }
        ResourceOutcome::Failed => {
            state.clear(&key);
            NodeResult::Failed
        }
    }
}

async fn deploy_child_node(
    ctx: &Arc<OrchestratorContext>,
    input: &DeployInput,
    instance_id: ResourceId,
    child_name: &str,
    existing_child_id: Option<ResourceId>,
    external: &EventSenders,
) -> NodeResult {
    let Some(child_changes) = input.changes.child_changes.get(child_name) else {
        return NodeResult::Untouched;
    };

    let parent = ChildContext {
        tree_path: input.tree_path.clone(),
        include_path: input.include_path.clone(),
        inherited_params: Value::Null,
        overrides: Value::Null,
    };

    let outcome = run_child(
        ctx.clone(),
        instance_id,
        existing_child_id,
        child_name,
        child_changes.clone(),
        input.rollback,
        ChildMode::Deploy,
        &parent,
        external,
    )
    .await;

    match outcome {
        ChildOutcome::Completed(status, child_id) if !status.is_failure() => NodeResult::ChildDeployed(child_id),
        _ => NodeResult::Failed,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_removal_group(
    ctx: &Arc<OrchestratorContext>,
    instance: &mut InstanceState,
    instance_id: ResourceId,
    rollback: bool,
    group: &[RemovalElement],
    external: &EventSenders,
    failure_reasons: &mut Vec<String>,
) -> bool {
    let snapshot = &*instance;
    let results = join_all(
        group
            .iter()
            .map(|element| remove_element(ctx, snapshot, instance_id, rollback, element, external)),
    )
    .await;

    let mut all_ok = true;
    for (element, ok) in group.iter().zip(results.into_iter()) {
        if ok {
            match element {
                RemovalElement::Resource(name) => {
                    instance.resources.remove(name);
                    let _ = ResourceStore::remove(ctx.store.as_ref(), instance_id, name).await;
                }
                RemovalElement::Child(name) => {
                    instance.child_blueprints.remove(name);
                    let _ = ChildStore::detach(ctx.store.as_ref(), instance_id, name).await;
                }
                RemovalElement::Link(a, b) => {
                    instance.links.remove(&format!("{a}::{b}"));
                    let _ = LinkStore::remove(ctx.store.as_ref(), instance_id, a, b).await;
                    // Whichever side declared the edge may have recorded the
                    // other as a dependent; drop it now that the link is gone
                    // (spec.md §4.2's dependents check reads this in-memory).
                    if let Some(r) = instance.resources.get_mut(b) {
                        r.depended_on_by.retain(|d| d != a);
                    }
                    if let Some(r) = instance.resources.get_mut(a) {
                        r.depended_on_by.retain(|d| d != b);
                    }
                }
            }
        } else {
            all_ok = false;
            failure_reasons.push(format!("failed to remove {element:?}"));
        }
    }
    all_ok
}

async fn remove_element(
    ctx: &Arc<OrchestratorContext>,
    instance: &InstanceState,
    instance_id: ResourceId,
    rollback: bool,
    element: &RemovalElement,
    external: &EventSenders,
) -> bool {
    match element {
        RemovalElement::Resource(name) => {
            let Some(provider) = ctx.resource_providers.get(name) else {
                warn!(resource_name = %name, "missing resource provider for removal");
                return false;
            };
            let spec = Value::Null;
            matches!(
                destroy_resource(instance_id, name, rollback, &spec, provider.as_ref(), external).await,
                ResourceOutcome::Deployed { .. }
            )
        }
        RemovalElement::Link(a, b) => {
            let Some(provider) = ctx.link_providers.get(&(a.clone(), b.clone())) else {
                warn!(resource_a = %a, resource_b = %b, "missing link provider for removal");
                return false;
            };
            let state = DeploymentState::new();
            matches!(
                deploy_link(
                    instance_id,
                    a,
                    b,
                    LinkUpdateKind::Destroy,
                    rollback,
                    Value::Null,
                    Value::Null,
                    provider.as_ref(),
                    &state,
                    external,
                )
                .await,
                LinkOutcome::Completed(_)
            )
        }
        RemovalElement::Child(name) => {
            let Some(child_state) = instance.child_blueprints.get(name) else {
                // Nothing persisted for this child; treat as already removed.
                return true;
            };
            let parent = ChildContext::default();
            let outcome = run_child(
                ctx.clone(),
                instance_id,
                Some(child_state.id),
                name,
                full_teardown_changeset(child_state),
                rollback,
                ChildMode::Destroy,
                &parent,
                external,
            )
            .await;
            matches!(outcome, ChildOutcome::Completed(status, _) if !status.is_failure())
        }
    }
}

/// A change set that removes everything currently recorded in `state`, used
/// to tear down a child blueprint instance in full when the child itself is
/// being removed (spec.md §4.2 "recreate/remove children").
fn full_teardown_changeset(state: &InstanceState) -> ChangeSet {
    ChangeSet {
        removed_resources: state.resources.keys().cloned().collect(),
        removed_links: state
            .links
            .values()
            .map(|l| (l.resource_a.clone(), l.resource_b.clone()))
            .collect(),
        removed_children: state.child_blueprints.keys().cloned().collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use deploy_core::changeset::ResourceChange;
    use deploy_core::instance::LinkState;
    use deploy_core::node::ChainLinkRef;
    use deploy_core::provider::PrioritySide;
    use deploy_core::status::InstanceStatus;
    use serde_json::json;

    use crate::bus::channel;
    use crate::testing::{InMemoryStore, NoopResolver, ScriptedLinkProvider, ScriptedResourceProvider};

    fn test_context(
        resource_providers: Vec<(&str, ScriptedResourceProvider)>,
        link_providers: Vec<((&str, &str), ScriptedLinkProvider)>,
        store: InMemoryStore,
    ) -> Arc<OrchestratorContext> {
        let mut resources: HashMap<String, Arc<dyn ResourceProvider>> = HashMap::new();
        for (name, provider) in resource_providers {
            resources.insert(name.to_string(), Arc::new(provider));
        }
        let mut links: LinkProviderMap = HashMap::new();
        for ((a, b), provider) in link_providers {
            links.insert((a.to_string(), b.to_string()), Arc::new(provider));
        }
        Arc::new(OrchestratorContext {
            store: Arc::new(store),
            resource_providers: resources,
            link_providers: links,
            resolver: Arc::new(NoopResolver),
            config: OrchestratorConfig::default(),
        })
    }

    /// Runs `input` through `deploy`/`destroy`, draining every non-`finish`
    /// topic in the background so capacity-1 channels never deadlock the
    /// run, and returns the terminal `FinishMessage`.
    async fn run_to_finish(
        ctx: Arc<OrchestratorContext>,
        input: DeployInput,
        destroy_run: bool,
    ) -> FinishMessage {
        let (senders, mut receivers) = channel();
        let handle = if destroy_run {
            destroy(ctx, input, senders)
        } else {
            deploy(ctx, input, senders)
        };

        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(_) = receivers.resource_update.recv() => {}
                    Some(_) = receivers.link_update.recv() => {}
                    Some(_) = receivers.child_update.recv() => {}
                    Some(_) = receivers.deployment_update.recv() => {}
                    Some(err) = receivers.err.recv() => panic!("unexpected orchestrator error: {err}"),
                    Some(msg) = receivers.finish.recv() => return msg,
                    else => panic!("event bus closed before a finish message arrived"),
                }
            }
        });

        let finish = drain.await.expect("drain task panicked");
        handle.await.expect("orchestrator task panicked");
        finish
    }

    fn resource_node(name: &str) -> DeploymentNode {
        DeploymentNode::Resource(ChainLinkRef {
            resource_name: name.to_string(),
            links_to: Vec::new(),
            linked_from: Vec::new(),
        })
    }

    fn child_node(name: &str) -> DeploymentNode {
        DeploymentNode::Child(deploy_core::node::ChildRef {
            child_name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn save_order_function_create_deploys_a_new_resource() {
        let ctx = test_context(
            vec![("save_order_function", ScriptedResourceProvider::succeeding("function"))],
            vec![],
            InMemoryStore::new(),
        );

        let input = DeployInput {
            instance_id: None,
            changes: ChangeSet {
                new_resources: vec!["save_order_function".to_string()],
                ..Default::default()
            },
            groups: vec![vec![resource_node("save_order_function")]],
            partially_resolved_resources: HashMap::from([(
                "save_order_function".to_string(),
                json!({"runtime": "nodejs"}),
            )]),
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::Deployed);
        assert!(finish.failure_reasons.is_empty());

        let saved = InstanceStore::get(ctx.store.as_ref(), finish.instance_id)
            .await
            .unwrap();
        assert!(saved.resources.contains_key("save_order_function"));
    }

    #[tokio::test]
    async fn process_order_function_update_redeploys_an_existing_resource() {
        let store = InMemoryStore::new();
        let instance_id = ResourceId::new();
        let mut instance = InstanceState::new(instance_id);
        instance.status = InstanceStatus::Deployed;
        instance.resources.insert(
            "process_order_function".to_string(),
            ResourceState {
                id: ResourceId::new(),
                resource_name: "process_order_function".to_string(),
                spec: json!({"runtime": "nodejs16"}),
                metadata: json!({"arn": "old"}),
                depended_on_by: Vec::new(),
            },
        );
        store.seed(instance);

        let ctx = test_context(
            vec![(
                "process_order_function",
                ScriptedResourceProvider::succeeding("function"),
            )],
            vec![],
            store,
        );

        let input = DeployInput {
            instance_id: Some(instance_id),
            changes: ChangeSet {
                resource_changes: HashMap::from([(
                    "process_order_function".to_string(),
                    ResourceChange {
                        resource_name: "process_order_function".to_string(),
                        ..Default::default()
                    },
                )]),
                ..Default::default()
            },
            groups: vec![vec![resource_node("process_order_function")]],
            partially_resolved_resources: HashMap::from([(
                "process_order_function".to_string(),
                json!({"runtime": "nodejs18"}),
            )]),
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::Deployed);

        let saved = InstanceStore::get(ctx.store.as_ref(), instance_id).await.unwrap();
        let updated = &saved.resources["process_order_function"];
        assert_eq!(updated.metadata, json!("function-metadata"));
    }

    #[tokio::test]
    async fn orders_table_link_is_torn_down_on_removal() {
        let store = InMemoryStore::new();
        let instance_id = ResourceId::new();
        let mut instance = InstanceState::new(instance_id);
        instance.status = InstanceStatus::Deployed;
        for name in ["save_order_function", "orders_table"] {
            instance.resources.insert(
                name.to_string(),
                ResourceState {
                    id: ResourceId::new(),
                    resource_name: name.to_string(),
                    spec: json!({}),
                    metadata: json!({}),
                    depended_on_by: Vec::new(),
                },
            );
        }
        instance.links.insert(
            "save_order_function::orders_table".to_string(),
            LinkState {
                resource_a: "save_order_function".to_string(),
                resource_b: "orders_table".to_string(),
                intermediary_resource_ids: Vec::new(),
            },
        );
        store.seed(instance);

        let ctx = test_context(
            vec![],
            vec![(
                ("save_order_function", "orders_table"),
                ScriptedLinkProvider::succeeding(PrioritySide::ResourceA),
            )],
            store,
        );

        let input = DeployInput {
            instance_id: Some(instance_id),
            changes: ChangeSet {
                removed_links: vec![("save_order_function".to_string(), "orders_table".to_string())],
                ..Default::default()
            },
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::Deployed);
        assert!(finish.failure_reasons.is_empty());

        let saved = InstanceStore::get(ctx.store.as_ref(), instance_id).await.unwrap();
        assert!(!saved.links.contains_key("save_order_function::orders_table"));
    }

    #[tokio::test]
    async fn a_terminal_resource_failure_fails_the_whole_run() {
        let ctx = test_context(
            vec![("intermediaries", ScriptedResourceProvider::failing("queue"))],
            vec![],
            InMemoryStore::new(),
        );

        let input = DeployInput {
            instance_id: None,
            changes: ChangeSet {
                new_resources: vec!["intermediaries".to_string()],
                ..Default::default()
            },
            groups: vec![vec![resource_node("intermediaries")]],
            partially_resolved_resources: HashMap::from([(
                "intermediaries".to_string(),
                json!({}),
            )]),
            ..Default::default()
        };

        let finish = run_to_finish(ctx, input, false).await;
        assert_eq!(finish.status, InstanceStatus::DeployFailed);
        assert!(!finish.failure_reasons.is_empty());
    }

    #[tokio::test]
    async fn rollback_of_an_in_progress_deploy_reports_rollback_complete() {
        let store = InMemoryStore::new();
        let instance_id = ResourceId::new();
        let mut instance = InstanceState::new(instance_id);
        instance.status = InstanceStatus::Deploying;
        store.seed(instance);

        let ctx = test_context(
            vec![("save_order_function", ScriptedResourceProvider::succeeding("function"))],
            vec![],
            store,
        );

        let input = DeployInput {
            instance_id: Some(instance_id),
            changes: ChangeSet {
                new_resources: vec!["save_order_function".to_string()],
                ..Default::default()
            },
            rollback: true,
            groups: vec![vec![resource_node("save_order_function")]],
            partially_resolved_resources: HashMap::from([(
                "save_order_function".to_string(),
                json!({}),
            )]),
            ..Default::default()
        };

        let finish = run_to_finish(ctx, input, false).await;
        assert_eq!(finish.status, InstanceStatus::DeployRollbackComplete);
    }

    #[tokio::test]
    async fn removal_blocked_by_a_surviving_dependent_fails_fast_without_touching_providers() {
        let store = InMemoryStore::new();
        let instance_id = ResourceId::new();
        let mut instance = InstanceState::new(instance_id);
        instance.status = InstanceStatus::Deployed;
        instance.resources.insert(
            "orders_table".to_string(),
            ResourceState {
                id: ResourceId::new(),
                resource_name: "orders_table".to_string(),
                spec: json!({}),
                metadata: json!({}),
                depended_on_by: vec!["save_order_function".to_string()],
            },
        );
        instance.resources.insert(
            "save_order_function".to_string(),
            ResourceState {
                id: ResourceId::new(),
                resource_name: "save_order_function".to_string(),
                spec: json!({}),
                metadata: json!({}),
                depended_on_by: Vec::new(),
            },
        );
        store.seed(instance);

        let ctx = test_context(vec![], vec![], store);

        let input = DeployInput {
            instance_id: Some(instance_id),
            changes: ChangeSet {
                removed_resources: vec!["orders_table".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::DeployFailed);
        assert_eq!(finish.failure_reasons.len(), 1);
        assert!(finish.failure_reasons[0].contains("save_order_function"));

        let saved = InstanceStore::get(ctx.store.as_ref(), instance_id).await.unwrap();
        assert!(saved.resources.contains_key("orders_table"));
    }

    #[tokio::test]
    async fn a_new_child_blueprint_deploys_its_own_new_resource() {
        let ctx = test_context(
            vec![("networking_vpc", ScriptedResourceProvider::succeeding("vpc"))],
            vec![],
            InMemoryStore::new(),
        );

        let child_changes = ChangeSet {
            new_resources: vec!["networking_vpc".to_string()],
            groups: vec![vec![resource_node("networking_vpc")]],
            partially_resolved_resources: HashMap::from([(
                "networking_vpc".to_string(),
                json!({"cidr": "10.0.0.0/16"}),
            )]),
            ..Default::default()
        };

        let input = DeployInput {
            instance_id: None,
            changes: ChangeSet {
                new_children: vec!["networking".to_string()],
                child_changes: HashMap::from([("networking".to_string(), child_changes)]),
                ..Default::default()
            },
            groups: vec![vec![child_node("networking")]],
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::Deployed);
        assert!(finish.failure_reasons.is_empty());

        let saved = InstanceStore::get(ctx.store.as_ref(), finish.instance_id)
            .await
            .unwrap();
        let child = saved
            .child_blueprints
            .get("networking")
            .expect("child blueprint attached");
        assert!(child.resources.contains_key("networking_vpc"));
    }

    #[tokio::test]
    async fn a_completed_link_is_persisted_and_blocks_a_later_removal() {
        let ctx = test_context(
            vec![
                ("save_order_function", ScriptedResourceProvider::succeeding("function")),
                ("orders_table", ScriptedResourceProvider::succeeding("table")),
            ],
            vec![(
                ("save_order_function", "orders_table"),
                ScriptedLinkProvider::succeeding(PrioritySide::ResourceA),
            )],
            InMemoryStore::new(),
        );

        let input = DeployInput {
            instance_id: None,
            changes: ChangeSet {
                new_resources: vec!["save_order_function".to_string(), "orders_table".to_string()],
                resource_changes: HashMap::from([(
                    "save_order_function".to_string(),
                    ResourceChange {
                        resource_name: "save_order_function".to_string(),
                        new_outbound_links: vec![deploy_core::changeset::LinkChange {
                            link_name: "orders".to_string(),
                            target_resource_name: "orders_table".to_string(),
                        }],
                        ..Default::default()
                    },
                )]),
                ..Default::default()
            },
            groups: vec![
                vec![resource_node("save_order_function"), resource_node("orders_table")],
            ],
            partially_resolved_resources: HashMap::from([
                ("save_order_function".to_string(), json!({})),
                ("orders_table".to_string(), json!({})),
            ]),
            ..Default::default()
        };

        let finish = run_to_finish(ctx.clone(), input, false).await;
        assert_eq!(finish.status, InstanceStatus::Deployed);
        assert!(finish.failure_reasons.is_empty());

        let saved = InstanceStore::get(ctx.store.as_ref(), finish.instance_id)
            .await
            .unwrap();
        assert!(saved
            .links
            .contains_key("save_order_function::orders_table"));
        assert_eq!(
            saved.resources["orders_table"].depended_on_by,
            vec!["save_order_function".to_string()]
        );

        let removal_input = DeployInput {
            instance_id: Some(finish.instance_id),
            changes: ChangeSet {
                removed_resources: vec!["orders_table".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let removal_finish = run_to_finish(ctx.clone(), removal_input, false).await;
        assert_eq!(removal_finish.status, InstanceStatus::DeployFailed);
        assert!(removal_finish.failure_reasons[0].contains("save_order_function"));
    }
}
