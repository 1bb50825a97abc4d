//! Deployment node — the unit the scheduler orders and dispatches.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A namespaced key identifying one element in a deployment run, used as the
/// key into `DeploymentState`'s insertion-ordered maps (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKey {
    Resource(String),
    Child(String),
    Link(String, String),
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKey::Resource(name) => write!(f, "resources.{name}"),
            ElementKey::Child(name) => write!(f, "children.{name}"),
            ElementKey::Link(a, b) => write!(f, "link({a}::{b})"),
        }
    }
}

/// A chain-link: a resource node together with the names of resources it
/// links to and that link to it (spec.md glossary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainLinkRef {
    pub resource_name: String,
    pub links_to: Vec<String>,
    pub linked_from: Vec<String>,
}

/// A reference into a nested blueprint's include tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildRef {
    pub child_name: String,
}

/// A single node in the deployment dependency DAG: either a resource
/// (chain-link) or a nested child blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeploymentNode {
    Resource(ChainLinkRef),
    Child(ChildRef),
}

impl DeploymentNode {
    pub fn logical_name(&self) -> &str {
        match self {
            DeploymentNode::Resource(r) => &r.resource_name,
            DeploymentNode::Child(c) => &c.child_name,
        }
    }

    pub fn key(&self) -> ElementKey {
        match self {
            DeploymentNode::Resource(r) => ElementKey::Resource(r.resource_name.clone()),
            DeploymentNode::Child(c) => ElementKey::Child(c.child_name.clone()),
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, DeploymentNode::Resource(_))
    }

    pub fn is_child(&self) -> bool {
        matches!(self, DeploymentNode::Child(_))
    }
}

/// A node annotated with its direct dependencies, as populated by the
/// Deployment Planner (C3). `DirectDependencies` drives "who unblocks whom"
/// decisions in the orchestrator's listen-loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedNode {
    pub node: DeploymentNode,
    pub direct_dependencies: HashSet<ElementKey>,
}

impl AnnotatedNode {
    pub fn new(node: DeploymentNode) -> Self {
        Self {
            node,
            direct_dependencies: HashSet::new(),
        }
    }

    pub fn key(&self) -> ElementKey {
        self.node.key()
    }
}
