//! Shapes merged subgraph data into the client response.
//!
//! Subgraph data carries fields the client never asked for (keys and
//! `__typename` added for entity fetches) and uses the client's aliases.
//! Completion walks the client operation over that data, keeping only the
//! requested fields and applying null propagation.

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::introspection::Introspection;
use crate::composition::{Supergraph, TypeRef};
use crate::query_planner::Operation;
use crate::query_planner::operation::{Field, Selection, SelectionSet, internal_value};
use crate::{GraphQLError, GraphQLResponse, PathSegment, ResponsePath};

/// A null reached a non-null position and has to move up to the nearest
/// nullable ancestor.
struct NullBubble;

pub(crate) fn complete(
    operation: &Operation,
    supergraph: &Supergraph,
    variables: &Map<String, Value>,
    data: &Value,
    errors: Vec<GraphQLError>,
) -> GraphQLResponse {
    let mut completer = Completer {
        supergraph,
        introspection: Introspection::new(supergraph, variables),
        errors,
    };

    let empty = Map::new();
    let root = data.as_object().unwrap_or(&empty);
    let root_type = operation.root_type();
    let mut path = Vec::new();
    let completed = completer.complete_object(root_type, &operation.selection_set, root, &mut path);
    let data = match completed {
        Ok(object) => Value::Object(object),
        Err(NullBubble) => Value::Null,
    };

    GraphQLResponse {
        data: Some(data),
        errors: completer.errors,
        extensions: Map::new(),
    }
}

struct Completer<'a> {
    supergraph: &'a Supergraph,
    introspection: Introspection<'a>,
    errors: Vec<GraphQLError>,
}

impl Completer<'_> {
    fn complete_object(
        &mut self,
        type_name: &str,
        selection: &SelectionSet,
        object: &Map<String, Value>,
        path: &mut ResponsePath,
    ) -> Result<Map<String, Value>, NullBubble> {
        let mut grouped = Vec::new();
        self.collect_fields(type_name, selection, &mut grouped);

        let mut out = Map::new();
        for (key, fields) in grouped {
            let field = fields[0];
            let selection: Cow<'_, SelectionSet> = match fields.as_slice() {
                [single] => Cow::Borrowed(&single.selection_set),
                _ => Cow::Owned(SelectionSet {
                    items: fields
                        .iter()
                        .flat_map(|field| field.selection_set.items.iter().cloned())
                        .collect(),
                }),
            };

            path.push(PathSegment::Key(key.to_string()));
            let value = self.complete_field(type_name, field, &selection, object.get(key), path);
            path.pop();
            out.insert(key.to_string(), value?);
        }
        Ok(out)
    }

    fn complete_field(
        &mut self,
        type_name: &str,
        field: &Field,
        selection: &SelectionSet,
        value: Option<&Value>,
        path: &mut ResponsePath,
    ) -> Result<Value, NullBubble> {
        if field.name == "__typename" {
            return Ok(Value::String(type_name.to_string()));
        }
        if path.len() == 1 && matches!(field.name.as_str(), "__schema" | "__type") {
            return Ok(self.introspection.resolve_root_field(field, selection));
        }
        let Some(definition) = self.supergraph.field(type_name, &field.name) else {
            return Ok(Value::Null);
        };
        let label = (type_name, field.name.as_str());
        self.complete_value(&definition.ty, value.unwrap_or(&Value::Null), selection, path, label)
    }

    fn complete_value(
        &mut self,
        ty: &TypeRef,
        value: &Value,
        selection: &SelectionSet,
        path: &mut ResponsePath,
        label: (&str, &str),
    ) -> Result<Value, NullBubble> {
        match ty {
            TypeRef::NonNull(inner) => {
                let completed = self.complete_value(inner, value, selection, path, label)?;
                if completed.is_null() {
                    self.null_error(path, label);
                    return Err(NullBubble);
                }
                Ok(completed)
            }
            _ if value.is_null() => Ok(Value::Null),
            TypeRef::List(inner) => {
                let Value::Array(items) = value else {
                    return Ok(Value::Null);
                };
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    let completed = self.complete_value(inner, item, selection, path, label);
                    path.pop();
                    match completed {
                        Ok(completed) => out.push(completed),
                        Err(NullBubble) => return Ok(Value::Null),
                    }
                }
                Ok(Value::Array(out))
            }
            TypeRef::Named(name) => {
                let Some(definition) = self.supergraph.type_definition(name) else {
                    return Ok(Value::Null);
                };
                if definition.is_leaf() {
                    return Ok(value.clone());
                }
                let Value::Object(object) = value else {
                    return Ok(Value::Null);
                };
                let concrete = if definition.is_abstract() {
                    internal_value(object, "__typename")
                        .and_then(Value::as_str)
                        .unwrap_or(name.as_str())
                } else {
                    name.as_str()
                };
                match self.complete_object(concrete, selection, object, path) {
                    Ok(completed) => Ok(Value::Object(completed)),
                    Err(NullBubble) => Ok(Value::Null),
                }
            }
        }
    }

    /// Groups the fields that apply to an object of `type_name` by response
    /// key, in query order.
    fn collect_fields<'s>(
        &self,
        type_name: &str,
        selection: &'s SelectionSet,
        out: &mut Vec<(&'s str, Vec<&'s Field>)>,
    ) {
        for item in &selection.items {
            match item {
                Selection::Field(field) => {
                    let key = field.response_key();
                    match out.iter_mut().find(|(existing, _)| *existing == key) {
                        Some((_, fields)) => fields.push(field),
                        None => out.push((key, vec![field])),
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let applies = fragment.type_condition.as_deref().is_none_or(|condition| {
                        self.supergraph.type_condition_matches(condition, type_name)
                    });
                    if applies {
                        self.collect_fields(type_name, &fragment.selection_set, out);
                    }
                }
            }
        }
    }

    /// Records why a non-null field is null, unless a fetch error already
    /// explains it.
    fn null_error(&mut self, path: &[PathSegment], (type_name, field): (&str, &str)) {
        if self.errors.iter().any(|error| error.is_within(path)) {
            return;
        }
        let message = format!("Cannot return null for non-nullable field {type_name}.{field}.");
        self.errors.push(GraphQLError::new(message).with_path(path.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::products_and_images;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn complete_with(query: &str, data: Value, errors: Vec<GraphQLError>) -> GraphQLResponse {
        let supergraph = products_and_images();
        let variables = Map::new();
        let operation = Operation::parse(query, None, &variables).unwrap();
        complete(&operation, &supergraph, &variables, &data, errors)
    }

    #[test]
    fn drops_fields_the_client_did_not_ask_for() {
        let response = complete_with(
            r#"{ item: product(id: "1") { name __typename } }"#,
            json!({ "item": { "name": "Table", "__typename": "Product", "id": "1" } }),
            Vec::new(),
        );
        assert_eq!(
            response.data,
            Some(json!({ "item": { "name": "Table", "__typename": "Product" } }))
        );
        assert!(response.errors.is_empty());
    }

    #[test]
    fn missing_nullable_fields_become_null() {
        let error = GraphQLError::new("boom").with_path(vec!["product".into(), "image".into()]);
        let response = complete_with(
            r#"{ product(id: "1") { name image } }"#,
            json!({ "product": { "name": "Table" } }),
            vec![error.clone()],
        );
        assert_eq!(response.data, Some(json!({ "product": { "name": "Table", "image": null } })));
        assert_eq!(response.errors, vec![error]);
    }

    #[test]
    fn null_non_null_fields_null_the_nearest_nullable_parent() {
        let error = GraphQLError::new("boom").with_path(vec!["product".into(), "thumbnail".into()]);
        let response = complete_with(
            r#"{ product(id: "1") { name thumbnail { url } } images { url } }"#,
            json!({ "product": { "name": "Table" }, "images": [{ "url": "a.png" }] }),
            vec![error.clone()],
        );
        assert_eq!(
            response.data,
            Some(json!({ "product": null, "images": [{ "url": "a.png" }] }))
        );
        assert_eq!(response.errors, vec![error]);
    }

    #[test]
    fn explains_nulls_nobody_reported() {
        let response = complete_with(
            "{ products { id name } }",
            json!({ "products": [{ "id": "1", "name": "Table" }, { "id": "2", "name": null }] }),
            Vec::new(),
        );
        assert_eq!(response.data, Some(Value::Null));
        assert_eq!(
            response.errors,
            vec![
                GraphQLError::new("Cannot return null for non-nullable field Product.name.")
                    .with_path(vec!["products".into(), 1usize.into(), "name".into()])
            ]
        );
    }

    #[test]
    fn merges_repeated_response_keys() {
        let response = complete_with(
            r#"{ product(id: "1") { name } product(id: "1") { ... on Product { price } } }"#,
            json!({ "product": { "name": "Table", "price": 10.5 } }),
            Vec::new(),
        );
        assert_eq!(response.data, Some(json!({ "product": { "name": "Table", "price": 10.5 } })));
    }

    #[test]
    fn answers_root_typename_and_introspection() {
        let response = complete_with(
            r#"{ __typename __type(name: "Image") { name } }"#,
            json!({}),
            Vec::new(),
        );
        assert_eq!(
            response.data,
            Some(json!({ "__typename": "Query", "__type": { "name": "Image" } }))
        );
    }
}
