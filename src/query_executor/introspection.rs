//! `__schema` and `__type` answered from the composed supergraph.

use serde_json::{Map, Value};

use crate::composition::{
    ArgumentDefinition, EnumValueDefinition, FieldDefinition, MUTATION_TYPE, QUERY_TYPE, Supergraph,
    TypeDefinition, TypeKind, TypeRef,
};
use crate::query_planner::operation::{Field, InputValue, Selection, SelectionSet};

#[derive(Clone, Copy)]
enum TypeView<'a> {
    Named(&'a TypeDefinition),
    List(&'a TypeRef),
    NonNull(&'a TypeRef),
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Schema,
    Type(TypeView<'a>),
    Field(&'a FieldDefinition),
    InputValue(&'a ArgumentDefinition),
    EnumValue(&'a EnumValueDefinition),
}

impl Node<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Node::Schema => "__Schema",
            Node::Type(_) => "__Type",
            Node::Field(_) => "__Field",
            Node::InputValue(_) => "__InputValue",
            Node::EnumValue(_) => "__EnumValue",
        }
    }
}

enum Output<'a> {
    Leaf(Value),
    Node(Node<'a>),
    List(Vec<Node<'a>>),
}

pub(crate) struct Introspection<'a> {
    supergraph: &'a Supergraph,
    variables: &'a Map<String, Value>,
}

impl<'a> Introspection<'a> {
    pub(crate) fn new(supergraph: &'a Supergraph, variables: &'a Map<String, Value>) -> Self {
        Introspection { supergraph, variables }
    }

    /// Resolves a root `__schema` or `__type` field.
    pub(crate) fn resolve_root_field(&self, field: &Field, selection: &SelectionSet) -> Value {
        let node = match field.name.as_str() {
            "__schema" => Some(Node::Schema),
            "__type" => self
                .argument(&field.arguments, "name")
                .as_str()
                .and_then(|name| self.supergraph.type_definition(name))
                .map(|definition| Node::Type(TypeView::Named(definition))),
            _ => None,
        };
        match node {
            Some(node) => self.resolve_node(node, selection),
            None => Value::Null,
        }
    }

    fn resolve_node(&self, node: Node<'a>, selection: &SelectionSet) -> Value {
        let mut out = Map::new();
        self.collect(node, selection, &mut out);
        Value::Object(out)
    }

    fn collect(&self, node: Node<'a>, selection: &SelectionSet, out: &mut Map<String, Value>) {
        for item in &selection.items {
            match item {
                Selection::Field(field) => {
                    let value = match self.field(node, field) {
                        Output::Leaf(value) => value,
                        Output::Node(child) => self.resolve_node(child, &field.selection_set),
                        Output::List(children) => Value::Array(
                            children
                                .into_iter()
                                .map(|child| self.resolve_node(child, &field.selection_set))
                                .collect(),
                        ),
                    };
                    out.insert(field.response_key().to_string(), value);
                }
                Selection::InlineFragment(fragment) => {
                    if fragment
                        .type_condition
                        .as_deref()
                        .is_none_or(|condition| condition == node.type_name())
                    {
                        self.collect(node, &fragment.selection_set, out);
                    }
                }
            }
        }
    }

    fn field(&self, node: Node<'a>, field: &Field) -> Output<'a> {
        if field.name == "__typename" {
            return leaf(node.type_name());
        }
        match node {
            Node::Schema => self.schema_field(&field.name),
            Node::Type(view) => self.type_field(view, field),
            Node::Field(definition) => match field.name.as_str() {
                "name" => leaf(&definition.name),
                "description" => optional(&definition.description),
                "args" => Output::List(definition.arguments.iter().map(Node::InputValue).collect()),
                "type" => self.type_ref(&definition.ty),
                "isDeprecated" => Output::Leaf(Value::Bool(definition.deprecation.is_some())),
                "deprecationReason" => optional(&definition.deprecation),
                _ => Output::Leaf(Value::Null),
            },
            Node::InputValue(definition) => match field.name.as_str() {
                "name" => leaf(&definition.name),
                "description" => optional(&definition.description),
                "type" => self.type_ref(&definition.ty),
                "defaultValue" => optional(&definition.default_value),
                "isDeprecated" => Output::Leaf(Value::Bool(false)),
                _ => Output::Leaf(Value::Null),
            },
            Node::EnumValue(definition) => match field.name.as_str() {
                "name" => leaf(&definition.name),
                "description" => optional(&definition.description),
                "isDeprecated" => Output::Leaf(Value::Bool(definition.deprecation.is_some())),
                "deprecationReason" => optional(&definition.deprecation),
                _ => Output::Leaf(Value::Null),
            },
        }
    }

    fn schema_field(&self, name: &str) -> Output<'a> {
        let named = |name: &str| match self.supergraph.type_definition(name) {
            Some(definition) => Output::Node(Node::Type(TypeView::Named(definition))),
            None => Output::Leaf(Value::Null),
        };
        match name {
            "types" => Output::List(
                self.supergraph
                    .types()
                    .map(|definition| Node::Type(TypeView::Named(definition)))
                    .collect(),
            ),
            "queryType" => named(QUERY_TYPE),
            "mutationType" => named(MUTATION_TYPE),
            "directives" => Output::List(Vec::new()),
            _ => Output::Leaf(Value::Null),
        }
    }

    fn type_field(&self, view: TypeView<'a>, field: &Field) -> Output<'a> {
        let definition = match view {
            TypeView::Named(definition) => definition,
            TypeView::List(inner) | TypeView::NonNull(inner) => {
                let kind = match view {
                    TypeView::List(_) => "LIST",
                    _ => "NON_NULL",
                };
                return match field.name.as_str() {
                    "kind" => leaf(kind),
                    "ofType" => self.type_ref(inner),
                    _ => Output::Leaf(Value::Null),
                };
            }
        };

        let include_deprecated =
            self.argument(&field.arguments, "includeDeprecated") == Value::Bool(true);
        let has_fields = matches!(definition.kind, TypeKind::Object | TypeKind::Interface);
        match field.name.as_str() {
            "kind" => leaf(definition.kind.introspection_name()),
            "name" => leaf(&definition.name),
            "description" => optional(&definition.description),
            "fields" if has_fields => Output::List(
                definition
                    .fields
                    .values()
                    .filter(|field| include_deprecated || field.deprecation.is_none())
                    .map(Node::Field)
                    .collect(),
            ),
            "interfaces" if has_fields => Output::List(
                definition
                    .interfaces
                    .iter()
                    .filter_map(|name| self.supergraph.type_definition(name))
                    .map(|interface| Node::Type(TypeView::Named(interface)))
                    .collect(),
            ),
            "possibleTypes" if definition.is_abstract() => Output::List(
                self.supergraph
                    .possible_types(&definition.name)
                    .into_iter()
                    .filter_map(|name| self.supergraph.type_definition(name))
                    .map(|possible| Node::Type(TypeView::Named(possible)))
                    .collect(),
            ),
            "enumValues" if definition.kind == TypeKind::Enum => Output::List(
                definition
                    .enum_values
                    .iter()
                    .filter(|value| include_deprecated || value.deprecation.is_none())
                    .map(Node::EnumValue)
                    .collect(),
            ),
            "inputFields" if definition.kind == TypeKind::InputObject => {
                Output::List(definition.input_fields.values().map(Node::InputValue).collect())
            }
            _ => Output::Leaf(Value::Null),
        }
    }

    fn type_ref(&self, ty: &'a TypeRef) -> Output<'a> {
        let view = match ty {
            TypeRef::Named(name) => match self.supergraph.type_definition(name) {
                Some(definition) => TypeView::Named(definition),
                None => return Output::Leaf(Value::Null),
            },
            TypeRef::List(inner) => TypeView::List(inner),
            TypeRef::NonNull(inner) => TypeView::NonNull(inner),
        };
        Output::Node(Node::Type(view))
    }

    fn argument(&self, arguments: &[(String, InputValue)], name: &str) -> Value {
        arguments
            .iter()
            .find(|(argument, _)| argument == name)
            .map(|(_, value)| value.to_json(self.variables))
            .unwrap_or(Value::Null)
    }
}

fn leaf<'a>(value: &str) -> Output<'a> {
    Output::Leaf(Value::String(value.to_string()))
}

fn optional<'a>(value: &Option<String>) -> Output<'a> {
    Output::Leaf(value.clone().map_or(Value::Null, Value::String))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_planner::Operation;
    use crate::test_support::products_and_images;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn resolve(query: &str) -> Value {
        let supergraph = products_and_images();
        let variables = Map::new();
        let operation = Operation::parse(query, None, &variables).unwrap();
        let introspection = Introspection::new(&supergraph, &variables);
        let field = operation.selection_set.fields().next().unwrap();
        introspection.resolve_root_field(field, &field.selection_set)
    }

    #[test]
    fn describes_types_and_wrappers() {
        let value = resolve(
            r#"{ __type(name: "Product") {
              kind name fields { name type { kind name ofType { name } } }
            } }"#,
        );
        assert_eq!(
            value,
            json!({
                "kind": "OBJECT",
                "name": "Product",
                "fields": [
                    {
                        "name": "id",
                        "type": { "kind": "NON_NULL", "name": null, "ofType": { "name": "ID" } }
                    },
                    {
                        "name": "image",
                        "type": { "kind": "SCALAR", "name": "String", "ofType": null }
                    },
                    {
                        "name": "name",
                        "type": { "kind": "NON_NULL", "name": null, "ofType": { "name": "String" } }
                    },
                    {
                        "name": "price",
                        "type": { "kind": "SCALAR", "name": "Float", "ofType": null }
                    },
                    {
                        "name": "thumbnail",
                        "type": { "kind": "NON_NULL", "name": null, "ofType": { "name": "Image" } }
                    },
                ]
            })
        );
    }

    #[test]
    fn exposes_root_types() {
        let value = resolve(
            "{ __schema { queryType { name } mutationType { name } subscriptionType { name } } }",
        );
        assert_eq!(
            value,
            json!({
                "queryType": { "name": "Query" },
                "mutationType": { "name": "Mutation" },
                "subscriptionType": null,
            })
        );
    }

    #[test]
    fn unknown_types_are_null() {
        assert_eq!(resolve(r#"{ __type(name: "Missing") { name } }"#), Value::Null);
    }
}
