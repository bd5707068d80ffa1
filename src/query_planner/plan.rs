use serde::Serialize;

use super::operation::{Operation, OperationKind, SelectionSet};

/// A query plan: how to obtain every field of one client operation from the
/// subgraphs. `node` is `None` when the gateway answers the whole operation
/// itself (introspection, root `__typename`).
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<PlanNode>,
    #[serde(skip)]
    pub operation: Operation,
}

impl QueryPlan {
    /// Every fetch of the plan, in execution order.
    pub fn fetch_nodes(&self) -> Vec<&FetchNode> {
        let mut nodes = Vec::new();
        if let Some(node) = &self.node {
            node.collect_fetches(&mut nodes);
        }
        nodes
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum PlanNode {
    Sequence { nodes: Vec<PlanNode> },
    Parallel { nodes: Vec<PlanNode> },
    Fetch(FetchNode),
}

impl PlanNode {
    pub(crate) fn sequence(mut nodes: Vec<PlanNode>) -> Option<PlanNode> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(PlanNode::Sequence { nodes }),
        }
    }

    pub(crate) fn parallel(mut nodes: Vec<PlanNode>) -> Option<PlanNode> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(PlanNode::Parallel { nodes }),
        }
    }

    fn collect_fetches<'a>(&'a self, out: &mut Vec<&'a FetchNode>) {
        match self {
            PlanNode::Sequence { nodes } | PlanNode::Parallel { nodes } => {
                nodes.iter().for_each(|node| node.collect_fetches(out))
            }
            PlanNode::Fetch(fetch) => out.push(fetch),
        }
    }
}

/// One request to one subgraph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    pub id: usize,
    pub subgraph: String,
    pub operation: String,
    pub operation_kind: OperationKind,
    pub variable_usages: Vec<String>,
    /// Set for `_entities` fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<EntityRequirement>,
    /// Where the fetched data lands: response keys, with `@` stepping into
    /// every element of a list.
    pub merge_path: Vec<String>,
    pub depends_on: Vec<usize>,
    /// The fields this fetch contributes below its merge path.
    #[serde(skip)]
    pub selection: SelectionSet,
}

/// The representations an entity fetch sends, selected from the objects
/// found at its merge path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRequirement {
    pub type_names: Vec<String>,
    pub selection: String,
    #[serde(skip)]
    pub representation: SelectionSet,
}
