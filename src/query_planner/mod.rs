//! Query planning.
//!
//! A client operation is normalized ([`Operation`]), validated against the
//! supergraph and split into fetch groups: one per root subgraph, plus one
//! `_entities` fetch wherever the walk has to cross into another subgraph.
//! Groups are then scheduled by depth into a [`QueryPlan`].

pub mod operation;
mod plan;

use std::collections::BTreeSet;

use serde_json::Map;
use tracing::debug;

pub use operation::{Operation, OperationKind};
pub use plan::{EntityRequirement, FetchNode, PlanNode, QueryPlan};

use crate::GraphQLRequest;
use crate::composition::{FieldDefinition, FieldSet, Supergraph, TypeDefinition};
use crate::error::PlanningError;
use operation::{Field, Selection, SelectionSet};

/// Root fields the gateway answers without calling a subgraph.
pub(crate) const GATEWAY_ROOT_FIELDS: [&str; 3] = ["__typename", "__schema", "__type"];

pub trait QueryPlanner: Send + Sync {
    fn plan_query(
        &self,
        request: &GraphQLRequest,
        supergraph: &Supergraph,
    ) -> Result<QueryPlan, PlanningError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FederatedQueryPlanner;

impl FederatedQueryPlanner {
    pub fn new() -> Self {
        FederatedQueryPlanner
    }
}

impl QueryPlanner for FederatedQueryPlanner {
    fn plan_query(
        &self,
        request: &GraphQLRequest,
        supergraph: &Supergraph,
    ) -> Result<QueryPlan, PlanningError> {
        let no_variables = Map::new();
        let variables = request.variables.as_ref().unwrap_or(&no_variables);
        let operation_name = request.operation_name.as_deref();
        let operation = Operation::parse(&request.query, operation_name, variables)?;

        let node = PlanBuilder::new(supergraph, &operation).build()?;
        let plan = QueryPlan { node, operation };
        debug!(
            operation = plan.operation.name.as_deref().unwrap_or("<anonymous>"),
            fetches = plan.fetch_nodes().len(),
            "planned operation"
        );
        Ok(plan)
    }
}

struct FetchGroup {
    subgraph: String,
    parent: Option<usize>,
    merge_path: Vec<String>,
    entity_types: BTreeSet<String>,
    representation: SelectionSet,
    selection: SelectionSet,
    depends_on: BTreeSet<usize>,
}

impl FetchGroup {
    fn into_fetch(self, id: usize, operation: &Operation) -> FetchNode {
        let is_entity = self.parent.is_some();

        let mut used = BTreeSet::new();
        self.selection.collect_variables(&mut used);
        let mut definitions = Vec::new();
        if is_entity {
            definitions.push("$representations: [_Any!]!".to_string());
        }
        definitions.extend(
            operation
                .variables
                .iter()
                .filter(|variable| used.contains(&variable.name))
                .map(ToString::to_string),
        );

        let kind = if is_entity { OperationKind::Query } else { operation.kind };
        let mut header = kind.to_string();
        if let Some(name) = &operation.name {
            header.push_str(&format!(" {name}__{}__{id}", self.subgraph));
        }
        if !definitions.is_empty() {
            header.push_str(&format!("({})", definitions.join(", ")));
        }
        let body = if is_entity {
            format!("{{ _entities(representations: $representations) {} }}", self.selection)
        } else {
            self.selection.to_string()
        };

        let requires = if is_entity {
            Some(EntityRequirement {
                type_names: self.entity_types.into_iter().collect(),
                selection: self.representation.to_string(),
                representation: self.representation,
            })
        } else {
            None
        };

        FetchNode {
            id,
            subgraph: self.subgraph,
            operation: format!("{header} {body}"),
            operation_kind: kind,
            variable_usages: used.into_iter().collect(),
            requires,
            merge_path: self.merge_path,
            depends_on: self.depends_on.into_iter().collect(),
            selection: self.selection,
        }
    }
}

struct PlanBuilder<'a> {
    supergraph: &'a Supergraph,
    operation: &'a Operation,
    groups: Vec<FetchGroup>,
}

impl<'a> PlanBuilder<'a> {
    fn new(supergraph: &'a Supergraph, operation: &'a Operation) -> Self {
        PlanBuilder {
            supergraph,
            operation,
            groups: Vec::new(),
        }
    }

    fn build(mut self) -> Result<Option<PlanNode>, PlanningError> {
        if self.operation.kind == OperationKind::Mutation && !self.supergraph.has_mutation_type() {
            return Err(PlanningError::NoMutationType);
        }
        self.check_variables()?;
        let roots = self.plan_root()?;
        Ok(self.into_plan(roots))
    }

    fn check_variables(&self) -> Result<(), PlanningError> {
        let mut used = BTreeSet::new();
        self.operation.selection_set.collect_variables(&mut used);
        match used.into_iter().find(|name| self.operation.variable(name).is_none()) {
            Some(name) => Err(PlanningError::UndefinedVariable(name)),
            None => Ok(()),
        }
    }

    fn plan_root(&mut self) -> Result<Vec<usize>, PlanningError> {
        let operation = self.operation;
        let root_type = operation.root_type();
        self.type_definition(root_type)?;

        let mut fields = Vec::new();
        root_fields(&operation.selection_set, root_type, &mut fields);

        let mut roots: Vec<usize> = Vec::new();
        for field in fields {
            if GATEWAY_ROOT_FIELDS.contains(&field.name.as_str()) {
                continue;
            }
            let definition = self.field_definition(root_type, &field.name)?;
            let Some(owner) = definition.owners.first() else {
                return Err(PlanningError::Unreachable {
                    type_name: root_type.to_string(),
                    field: field.name.clone(),
                });
            };

            // Mutation fields keep document order, so only consecutive fields
            // may share a fetch.
            let existing = match operation.kind {
                OperationKind::Query => roots
                    .iter()
                    .copied()
                    .find(|&id| self.groups[id].subgraph == owner.subgraph),
                OperationKind::Mutation => roots
                    .last()
                    .copied()
                    .filter(|&id| self.groups[id].subgraph == owner.subgraph),
            };
            let group = match existing {
                Some(id) => id,
                None => {
                    let id = self.push_group(&owner.subgraph, None, Vec::new());
                    roots.push(id);
                    id
                }
            };

            let provides = owner.provides.as_ref();
            let planned = self.plan_local_field(group, root_type, field, &[], provides)?;
            self.groups[group].selection.add_field(planned);
        }
        Ok(roots)
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_selection(
        &mut self,
        group: usize,
        parent_type: &str,
        selection: &SelectionSet,
        client: &SelectionSet,
        path: &[String],
        provided: Option<&'a FieldSet>,
    ) -> Result<SelectionSet, PlanningError> {
        let mut out = SelectionSet::default();
        for item in &selection.items {
            match item {
                Selection::Field(field) => {
                    self.plan_nested_field(
                        group,
                        parent_type,
                        field,
                        client,
                        path,
                        provided,
                        &mut out,
                    )?;
                }
                Selection::InlineFragment(fragment) => {
                    let condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
                    self.type_definition(condition)?;
                    let nested = &fragment.selection_set;
                    let planned =
                        self.plan_selection(group, condition, nested, client, path, provided)?;
                    if condition == parent_type {
                        out.merge(planned);
                    } else {
                        out.fragment_mut(condition).merge(planned);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Plans one client field in `group`. `client` is the whole client
    /// selection of the enclosing object, which decides whether the fields
    /// injected next to `field` need a reserved alias.
    #[allow(clippy::too_many_arguments)]
    fn plan_nested_field(
        &mut self,
        group: usize,
        parent_type: &str,
        field: &Field,
        client: &SelectionSet,
        path: &[String],
        provided: Option<&'a FieldSet>,
        out: &mut SelectionSet,
    ) -> Result<(), PlanningError> {
        let supergraph = self.supergraph;
        if field.name == "__typename" {
            out.add_field(Field {
                alias: field.alias.clone(),
                ..Field::new("__typename")
            });
            return Ok(());
        }

        let definition = self.field_definition(parent_type, &field.name)?;
        let subgraph = self.groups[group].subgraph.clone();

        let provided_item = provided.and_then(|fields| fields.get(&field.name));
        if provided_item.is_some() || supergraph.can_resolve(parent_type, &field.name, &subgraph) {
            let provides = match provided_item {
                Some(item) => Some(&item.selections).filter(|selections| !selections.is_empty()),
                None => definition.owner(&subgraph).and_then(|owner| owner.provides.as_ref()),
            };
            let planned = self.plan_local_field(group, parent_type, field, path, provides)?;
            out.add_field(planned);
            return Ok(());
        }

        if supergraph.is_abstract(parent_type) {
            // Entities are fetched per concrete type.
            for possible in supergraph.possible_types(parent_type) {
                let mut planned = SelectionSet::default();
                self.plan_nested_field(group, possible, field, client, path, None, &mut planned)?;
                out.fragment_mut(possible).merge(planned);
            }
            return Ok(());
        }

        let target = definition.owners.iter().find_map(|owner| {
            supergraph
                .entity_key(parent_type, &owner.subgraph, &subgraph)
                .map(|key| (owner, key))
        });
        let Some((owner, key)) = target else {
            return Err(PlanningError::Unreachable {
                type_name: parent_type.to_string(),
                field: field.name.clone(),
            });
        };

        out.add_internal_typename(client);
        out.add_internal_field_set(&key.fields, client);
        let child = self.entity_group(group, &owner.subgraph, path, parent_type, &key.fields);

        if let Some(requires) = &owner.requires {
            let name = &field.name;
            self.plan_requires(group, child, parent_type, name, requires, client, path, out)?;
        }

        let provides = owner.provides.as_ref();
        let planned = self.plan_local_field(child, parent_type, field, path, provides)?;
        self.groups[child].selection.fragment_mut(parent_type).add_field(planned);
        Ok(())
    }

    /// Plans `field` as resolved by `group` itself.
    fn plan_local_field(
        &mut self,
        group: usize,
        parent_type: &str,
        field: &Field,
        path: &[String],
        provides: Option<&'a FieldSet>,
    ) -> Result<Field, PlanningError> {
        let definition = self.field_definition(parent_type, &field.name)?;
        let field_type = self.type_definition(definition.ty.named_type())?;

        let mut selection_set = SelectionSet::default();
        if field_type.is_leaf() {
            if !field.selection_set.is_empty() {
                return Err(PlanningError::UnexpectedSelection {
                    type_name: parent_type.to_string(),
                    field: field.name.clone(),
                    field_type: definition.ty.to_string(),
                });
            }
        } else {
            if field.selection_set.is_empty() {
                return Err(PlanningError::MissingSelection {
                    type_name: parent_type.to_string(),
                    field: field.name.clone(),
                    field_type: definition.ty.to_string(),
                });
            }
            let path = child_path(path, field, definition);
            let client = &field.selection_set;
            let type_name = &field_type.name;
            selection_set = self.plan_selection(group, type_name, client, client, &path, provides)?;
            if field_type.is_abstract() {
                selection_set.add_internal_typename(client);
            }
        }

        Ok(Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            selection_set,
        })
    }

    /// Makes the `@requires` fields of an entity field part of the
    /// representation, fetching them from a sibling subgraph when the
    /// current one cannot.
    #[allow(clippy::too_many_arguments)]
    fn plan_requires(
        &mut self,
        group: usize,
        child: usize,
        parent_type: &str,
        field: &str,
        requires: &FieldSet,
        client: &SelectionSet,
        path: &[String],
        out: &mut SelectionSet,
    ) -> Result<(), PlanningError> {
        let supergraph = self.supergraph;
        let subgraph = self.groups[group].subgraph.clone();
        self.groups[child]
            .representation
            .fragment_mut(parent_type)
            .add_field_set(requires);

        if supergraph.can_resolve_field_set(parent_type, requires, &subgraph) {
            out.add_internal_field_set(requires, client);
            return Ok(());
        }

        let child_subgraph = &self.groups[child].subgraph;
        let provider = supergraph
            .subgraph_names()
            .filter(|name| *name != child_subgraph.as_str())
            .filter(|name| supergraph.can_resolve_field_set(parent_type, requires, name))
            .find_map(|name| {
                supergraph
                    .entity_key(parent_type, name, &subgraph)
                    .map(|key| (name, key))
            });
        let Some((provider, key)) = provider else {
            return Err(PlanningError::Unreachable {
                type_name: parent_type.to_string(),
                field: field.to_string(),
            });
        };

        out.add_internal_typename(client);
        out.add_internal_field_set(&key.fields, client);
        let sibling = self.entity_group(group, provider, path, parent_type, &key.fields);
        self.groups[sibling]
            .selection
            .fragment_mut(parent_type)
            .add_internal_field_set(requires, client);
        self.groups[child].depends_on.insert(sibling);
        Ok(())
    }

    /// The entity fetch of `subgraph` below `parent` at `path`, created on
    /// first use, with `key` added to its representation for `type_name`.
    fn entity_group(
        &mut self,
        parent: usize,
        subgraph: &str,
        path: &[String],
        type_name: &str,
        key: &FieldSet,
    ) -> usize {
        let existing = self.groups.iter().position(|group| {
            group.parent == Some(parent) && group.subgraph == subgraph && group.merge_path == path
        });
        let id = existing.unwrap_or_else(|| self.push_group(subgraph, Some(parent), path.to_vec()));

        let group = &mut self.groups[id];
        group.entity_types.insert(type_name.to_string());
        let representation = group.representation.fragment_mut(type_name);
        representation.add_typename();
        representation.add_field_set(key);
        id
    }

    fn push_group(
        &mut self,
        subgraph: &str,
        parent: Option<usize>,
        merge_path: Vec<String>,
    ) -> usize {
        self.groups.push(FetchGroup {
            subgraph: subgraph.to_string(),
            parent,
            merge_path,
            entity_types: BTreeSet::new(),
            representation: SelectionSet::default(),
            selection: SelectionSet::default(),
            depends_on: parent.into_iter().collect(),
        });
        self.groups.len() - 1
    }

    fn type_definition(&self, name: &str) -> Result<&'a TypeDefinition, PlanningError> {
        self.supergraph
            .type_definition(name)
            .ok_or_else(|| PlanningError::UnknownType(name.to_string()))
    }

    fn field_definition(
        &self,
        type_name: &str,
        field: &str,
    ) -> Result<&'a FieldDefinition, PlanningError> {
        self.supergraph
            .field(type_name, field)
            .ok_or_else(|| PlanningError::UnknownField {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
    }

    /// Depth of every group: roots are 0, anything else runs one step after
    /// the deepest group it depends on.
    fn levels(&self) -> Vec<usize> {
        let mut memo = vec![None; self.groups.len()];
        (0..self.groups.len()).map(|id| self.level(id, &mut memo)).collect()
    }

    fn level(&self, id: usize, memo: &mut Vec<Option<usize>>) -> usize {
        if let Some(level) = memo[id] {
            return level;
        }
        let level = self.groups[id]
            .depends_on
            .iter()
            .map(|&dependency| self.level(dependency, memo) + 1)
            .max()
            .unwrap_or(0);
        memo[id] = Some(level);
        level
    }

    fn into_plan(self, roots: Vec<usize>) -> Option<PlanNode> {
        let levels = self.levels();
        let max_level = levels.iter().copied().max().unwrap_or(0);
        let operation = self.operation;

        let mut fetches: Vec<Option<FetchNode>> = self
            .groups
            .into_iter()
            .enumerate()
            .map(|(id, group)| Some(group.into_fetch(id, operation)))
            .collect();
        let mut take = |id: usize| fetches[id].take().map(PlanNode::Fetch);

        let root_nodes: Vec<PlanNode> = roots.iter().filter_map(|&id| take(id)).collect();
        let mut stages: Vec<PlanNode> = match operation.kind {
            OperationKind::Query => PlanNode::parallel(root_nodes).into_iter().collect(),
            OperationKind::Mutation => root_nodes,
        };
        for level in 1..=max_level {
            let nodes = (0..levels.len())
                .filter(|&id| levels[id] == level)
                .filter_map(&mut take)
                .collect();
            stages.extend(PlanNode::parallel(nodes));
        }
        PlanNode::sequence(stages)
    }
}

fn root_fields<'o>(selection: &'o SelectionSet, root_type: &str, out: &mut Vec<&'o Field>) {
    for item in &selection.items {
        match item {
            Selection::Field(field) => out.push(field),
            Selection::InlineFragment(fragment) => {
                let condition = fragment.type_condition.as_deref();
                if condition.is_none_or(|condition| condition == root_type) {
                    root_fields(&fragment.selection_set, root_type, out);
                }
            }
        }
    }
}

fn child_path(path: &[String], field: &Field, definition: &FieldDefinition) -> Vec<String> {
    let mut path = path.to_vec();
    path.push(field.response_key().to_string());
    path.extend(std::iter::repeat_n("@".to_string(), definition.ty.list_depth()));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::compose;
    use crate::test_support::{descriptor, products_and_images};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn plan(supergraph: &Supergraph, query: &str) -> Result<QueryPlan, PlanningError> {
        FederatedQueryPlanner::new().plan_query(&GraphQLRequest::new(query), supergraph)
    }

    fn entities_query(selection: &str) -> String {
        let entities = format!("_entities(representations: $representations) {{ {selection} }}");
        format!("query($representations: [_Any!]!) {{ {entities} }}")
    }

    fn operations(plan: &QueryPlan) -> Vec<(&str, &str)> {
        plan.fetch_nodes()
            .into_iter()
            .map(|fetch| (fetch.subgraph.as_str(), fetch.operation.as_str()))
            .collect()
    }

    #[test]
    fn single_subgraph_query_is_one_fetch() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, "{ products { name price } }").unwrap();

        assert!(matches!(plan.node, Some(PlanNode::Fetch(_))));
        assert_eq!(operations(&plan), vec![("products", "query { products { name price } }")]);
    }

    #[test]
    fn entity_reference_adds_one_dependent_fetch() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, r#"{ product(id: "1") { name image } }"#).unwrap();

        let Some(PlanNode::Sequence { nodes }) = &plan.node else {
            panic!("expected a sequence, got {:?}", plan.node);
        };
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            operations(&plan),
            vec![
                ("products", r#"query { product(id: "1") { name __typename id } }"#),
                ("images", entities_query("... on Product { image }").as_str()),
            ]
        );

        let fetches = plan.fetch_nodes();
        let entities = fetches[1];
        assert_eq!(entities.merge_path, vec!["product".to_string()]);
        assert_eq!(entities.depends_on, vec![fetches[0].id]);
        let requires = entities.requires.as_ref().unwrap();
        assert_eq!(requires.type_names, vec!["Product".to_string()]);
        assert_eq!(requires.selection, "{ ... on Product { __typename id } }");
    }

    #[test]
    fn entity_fetches_below_lists_step_into_elements() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, "{ products { image thumbnail { alt } } }").unwrap();

        let fetches = plan.fetch_nodes();
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[1].merge_path, vec!["products".to_string(), "@".to_string()]);
        assert_eq!(
            fetches[1].operation,
            entities_query("... on Product { image thumbnail { alt } }")
        );
    }

    #[test]
    fn independent_root_fields_run_in_parallel() {
        let supergraph = products_and_images();
        let query = "{ topProduct { id } images { url } products { name } }";
        let plan = plan(&supergraph, query).unwrap();

        let Some(PlanNode::Parallel { nodes }) = &plan.node else {
            panic!("expected a parallel node, got {:?}", plan.node);
        };
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            operations(&plan),
            vec![
                ("products", "query { topProduct { id } products { name } }"),
                ("images", "query { images { url } }"),
            ]
        );
    }

    #[test]
    fn mutations_keep_document_order() {
        let supergraph = products_and_images();
        let plan = plan(
            &supergraph,
            r#"mutation Seed {
              a: createProduct(name: "a") { id }
              uploadImage(url: "u") { url }
              b: createProduct(name: "b") { id }
            }"#,
        )
        .unwrap();

        assert_eq!(
            operations(&plan),
            vec![
                (
                    "products",
                    r#"mutation Seed__products__0 { a: createProduct(name: "a") { id } }"#
                ),
                ("images", r#"mutation Seed__images__1 { uploadImage(url: "u") { url } }"#),
                (
                    "products",
                    r#"mutation Seed__products__2 { b: createProduct(name: "b") { id } }"#
                ),
            ]
        );
        assert!(matches!(&plan.node, Some(PlanNode::Sequence { nodes }) if nodes.len() == 3));
    }

    #[test]
    fn forwards_only_the_variables_a_fetch_uses() {
        let supergraph = products_and_images();
        let request = GraphQLRequest::new("query($id: ID!) { product(id: $id) { name image } }")
            .with_variables(json!({ "id": "1" }).as_object().unwrap().clone());
        let plan = FederatedQueryPlanner::new().plan_query(&request, &supergraph).unwrap();

        let fetches = plan.fetch_nodes();
        assert_eq!(
            fetches[0].operation,
            "query($id: ID!) { product(id: $id) { name __typename id } }"
        );
        assert_eq!(fetches[0].variable_usages, vec!["id".to_string()]);
        assert!(fetches[1].variable_usages.is_empty());
    }

    #[test]
    fn gateway_fields_need_no_fetch() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, "{ __typename __schema { queryType { name } } }").unwrap();
        assert!(plan.node.is_none());
    }

    #[test]
    fn provides_keeps_fields_in_the_providing_subgraph() {
        let reviews = r#"
            type Query { topReview: Review }
            type Review @key(fields: "id") {
              id: ID!
              body: String
              author: User! @provides(fields: "name")
            }
            type User @key(fields: "id") { id: ID! name: String @external }
        "#;
        let accounts = r#"
            type Query { me: User }
            type User @key(fields: "id") { id: ID! name: String }
        "#;
        let supergraph =
            compose(&[descriptor("reviews", reviews), descriptor("accounts", accounts)]).unwrap();

        let plan = plan(&supergraph, "{ topReview { author { name } } }").unwrap();
        assert_eq!(
            operations(&plan),
            vec![("reviews", "query { topReview { author { name } } }")]
        );
    }

    #[test]
    fn requires_fields_join_the_representation() {
        let catalog = r#"
            type Query { product: Product }
            type Product @key(fields: "id") { id: ID! weight: Float }
        "#;
        let shipping = r#"
            type Product @key(fields: "id") {
              id: ID!
              weight: Float @external
              shippingCost: Float @requires(fields: "weight")
            }
        "#;
        let supergraph =
            compose(&[descriptor("catalog", catalog), descriptor("shipping", shipping)]).unwrap();

        let plan = plan(&supergraph, "{ product { shippingCost } }").unwrap();
        let fetches = plan.fetch_nodes();
        assert_eq!(fetches[0].operation, "query { product { __typename id weight } }");
        assert_eq!(
            fetches[1].requires.as_ref().unwrap().selection,
            "{ ... on Product { __typename id weight } }"
        );
    }

    #[test]
    fn required_fields_from_a_third_subgraph_are_fetched_first() {
        let catalog = r#"
            type Query { product: Product }
            type Product @key(fields: "id") { id: ID! }
        "#;
        let inventory = r#"
            type Product @key(fields: "id") { id: ID! weight: Float }
        "#;
        let shipping = r#"
            type Product @key(fields: "id") {
              id: ID!
              weight: Float @external
              shippingCost: Float @requires(fields: "weight")
            }
        "#;
        let supergraph = compose(&[
            descriptor("catalog", catalog),
            descriptor("inventory", inventory),
            descriptor("shipping", shipping),
        ])
        .unwrap();

        let plan = plan(&supergraph, "{ product { shippingCost } }").unwrap();
        let order: Vec<&str> = plan
            .fetch_nodes()
            .iter()
            .map(|fetch| fetch.subgraph.as_str())
            .collect();
        assert_eq!(order, vec!["catalog", "inventory", "shipping"]);
        assert!(matches!(&plan.node, Some(PlanNode::Sequence { nodes }) if nodes.len() == 3));

        let shipping_fetch = plan.fetch_nodes()[2];
        assert_eq!(shipping_fetch.depends_on.len(), 2);
    }

    #[test]
    fn required_fields_come_from_the_first_listed_provider() {
        let catalog = r#"
            type Query { product: Product }
            type Product @key(fields: "id") { id: ID! }
        "#;
        let weights = r#"
            type Product @key(fields: "id") { id: ID! weight: Float }
        "#;
        let shipping = r#"
            type Product @key(fields: "id") {
              id: ID!
              weight: Float @external
              shippingCost: Float @requires(fields: "weight")
            }
        "#;
        let supergraph = compose(&[
            descriptor("catalog", catalog),
            descriptor("zeta", weights),
            descriptor("alpha", weights),
            descriptor("shipping", shipping),
        ])
        .unwrap();

        let plan = plan(&supergraph, "{ product { shippingCost } }").unwrap();
        let order: Vec<&str> = plan
            .fetch_nodes()
            .iter()
            .map(|fetch| fetch.subgraph.as_str())
            .collect();
        assert_eq!(order, vec!["catalog", "zeta", "shipping"]);
    }

    #[test]
    fn injected_fields_move_aside_for_client_aliases() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, r#"{ product(id: "1") { id: name image } }"#).unwrap();

        let fetches = plan.fetch_nodes();
        assert_eq!(
            fetches[0].operation,
            r#"query { product(id: "1") { id: name __typename __fedgate_id: id } }"#
        );
        assert_eq!(
            fetches[1].requires.as_ref().unwrap().selection,
            "{ ... on Product { __typename id } }"
        );
    }

    #[test]
    fn required_fields_move_aside_for_client_aliases() {
        let catalog = r#"
            type Query { product: Product }
            type Product @key(fields: "id") { id: ID! weight: Float }
        "#;
        let shipping = r#"
            type Product @key(fields: "id") {
              id: ID!
              weight: Float @external
              shippingCost: Float @requires(fields: "weight")
            }
        "#;
        let supergraph =
            compose(&[descriptor("catalog", catalog), descriptor("shipping", shipping)]).unwrap();

        let plan = plan(&supergraph, "{ product { weight: id shippingCost } }").unwrap();
        assert_eq!(
            plan.fetch_nodes()[0].operation,
            "query { product { weight: id __typename id __fedgate_weight: weight } }"
        );
    }

    #[test]
    fn unreachable_fields_fail_planning() {
        let things = r#"
            type Query { thing: Thing }
            type Thing @key(fields: "id") { id: ID! }
        "#;
        let extras = r#"
            type Query { other: Int }
            type Thing @key(fields: "sku") { sku: String! extra: String }
        "#;
        let supergraph =
            compose(&[descriptor("things", things), descriptor("extras", extras)]).unwrap();

        let error = plan(&supergraph, "{ thing { extra } }").unwrap_err();
        assert_eq!(
            error,
            PlanningError::Unreachable {
                type_name: "Thing".into(),
                field: "extra".into()
            }
        );
        assert_eq!(error.code(), "QUERY_PLANNING_FAILED");
    }

    #[test]
    fn rejects_invalid_selections() {
        let supergraph = products_and_images();

        assert_eq!(
            plan(&supergraph, "{ product(id: 1) { colour } }").unwrap_err(),
            PlanningError::UnknownField {
                type_name: "Product".into(),
                field: "colour".into()
            }
        );
        assert!(matches!(
            plan(&supergraph, "{ products }").unwrap_err(),
            PlanningError::MissingSelection { .. }
        ));
        assert!(matches!(
            plan(&supergraph, "{ products { name { first } } }").unwrap_err(),
            PlanningError::UnexpectedSelection { .. }
        ));
        assert_eq!(
            plan(&supergraph, "{ product(id: $id) { name } }").unwrap_err(),
            PlanningError::UndefinedVariable("id".into())
        );
    }

    #[test]
    fn plans_serialize_with_node_kinds() {
        let supergraph = products_and_images();
        let plan = plan(&supergraph, r#"{ product(id: "1") { image } }"#).unwrap();
        let value = serde_json::to_value(&plan).unwrap();

        assert_eq!(value["node"]["kind"], "Sequence");
        assert_eq!(value["node"]["nodes"][0]["kind"], "Fetch");
        assert_eq!(value["node"]["nodes"][1]["subgraph"], "images");
        assert_eq!(value["node"]["nodes"][1]["mergePath"], json!(["product"]));
    }
}
