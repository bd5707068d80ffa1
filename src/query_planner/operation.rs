use std::collections::{BTreeSet, HashMap};
use std::fmt;

use graphql_parser::query::{self as ast, Definition, OperationDefinition, TypeCondition};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::composition::{FieldSet, MUTATION_TYPE, QUERY_TYPE, TypeRef};
use crate::error::PlanningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => f.write_str("query"),
            OperationKind::Mutation => f.write_str("mutation"),
        }
    }
}

/// An owned GraphQL input literal, possibly referencing variables.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    pub fn from_ast(value: &ast::Value<'_, String>) -> Self {
        match value {
            ast::Value::Variable(name) => InputValue::Variable(name.clone()),
            ast::Value::Int(number) => InputValue::Int(number.as_i64().unwrap_or_default()),
            ast::Value::Float(number) => InputValue::Float(*number),
            ast::Value::String(value) => InputValue::String(value.clone()),
            ast::Value::Boolean(value) => InputValue::Boolean(*value),
            ast::Value::Null => InputValue::Null,
            ast::Value::Enum(value) => InputValue::Enum(value.clone()),
            ast::Value::List(items) => {
                InputValue::List(items.iter().map(InputValue::from_ast).collect())
            }
            ast::Value::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                    .collect(),
            ),
        }
    }

    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            InputValue::Variable(name) => {
                out.insert(name.clone());
            }
            InputValue::List(items) => items.iter().for_each(|item| item.collect_variables(out)),
            InputValue::Object(fields) => {
                fields.iter().for_each(|(_, value)| value.collect_variables(out))
            }
            _ => {}
        }
    }

    /// Resolves the literal to JSON; unknown variables resolve to `null`.
    pub fn to_json(&self, variables: &Map<String, Value>) -> Value {
        match self {
            InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            InputValue::Int(value) => Value::from(*value),
            InputValue::Float(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
            InputValue::String(value) | InputValue::Enum(value) => Value::String(value.clone()),
            InputValue::Boolean(value) => Value::Bool(*value),
            InputValue::Null => Value::Null,
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Variable(name) => write!(f, "${name}"),
            InputValue::Int(value) => write!(f, "{value}"),
            InputValue::Float(value) => write!(f, "{value:?}"),
            InputValue::String(value) => write!(f, "{}", Value::String(value.clone())),
            InputValue::Boolean(value) => write!(f, "{value}"),
            InputValue::Null => f.write_str("null"),
            InputValue::Enum(value) => f.write_str(value),
            InputValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            InputValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.ty)?;
        if let Some(default) = &self.default_value {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selection_set: SelectionSet,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selection_set: SelectionSet::default(),
        }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: SelectionSet,
}

impl SelectionSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Top-level fields, not looking into fragments.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.items.iter().filter_map(|item| match item {
            Selection::Field(field) => Some(field),
            Selection::InlineFragment(_) => None,
        })
    }

    /// Adds `field`, merging its sub-selection into an existing selection
    /// of the same field under the same response key.
    pub fn add_field(&mut self, field: Field) {
        let existing = self.items.iter_mut().find_map(|item| match item {
            Selection::Field(existing)
                if existing.response_key() == field.response_key()
                    && existing.name == field.name
                    && existing.arguments == field.arguments =>
            {
                Some(existing)
            }
            _ => None,
        });
        match existing {
            Some(existing) => existing.selection_set.merge(field.selection_set),
            None => self.items.push(Selection::Field(field)),
        }
    }

    pub fn add_typename(&mut self) {
        self.add_field(Field::new("__typename"));
    }

    pub fn add_field_set(&mut self, fields: &FieldSet) {
        for field in field_set_fields(fields) {
            self.add_field(field);
        }
    }

    /// Adds a field the gateway needs for itself. When `client` already
    /// uses its response key for a different field, it goes under the
    /// reserved alias instead.
    pub fn add_internal_field(&mut self, mut field: Field, client: &SelectionSet) {
        if client.conflicts_with(&field) {
            field.alias = Some(internal_alias(&field.name));
        }
        self.add_field(field);
    }

    pub fn add_internal_typename(&mut self, client: &SelectionSet) {
        self.add_internal_field(Field::new("__typename"), client);
    }

    pub fn add_internal_field_set(&mut self, fields: &FieldSet, client: &SelectionSet) {
        for field in field_set_fields(fields) {
            self.add_internal_field(field, client);
        }
    }

    /// Whether some field here, fragments included, takes the response key
    /// of `field` but would select something else under it.
    fn conflicts_with(&self, field: &Field) -> bool {
        self.items.iter().any(|item| match item {
            Selection::Field(existing) => {
                existing.response_key() == field.response_key()
                    && (existing.name != field.name
                        || existing.arguments != field.arguments
                        || field
                            .selection_set
                            .fields()
                            .any(|child| existing.selection_set.conflicts_with(child)))
            }
            Selection::InlineFragment(fragment) => fragment.selection_set.conflicts_with(field),
        })
    }

    /// The selection of the inline fragment on `type_condition`, created if
    /// missing.
    pub fn fragment_mut(&mut self, type_condition: &str) -> &mut SelectionSet {
        let position = self.items.iter().position(|item| {
            matches!(item, Selection::InlineFragment(fragment)
                if fragment.type_condition.as_deref() == Some(type_condition))
        });
        let index = match position {
            Some(index) => index,
            None => {
                self.items.push(Selection::InlineFragment(InlineFragment {
                    type_condition: Some(type_condition.to_string()),
                    selection_set: SelectionSet::default(),
                }));
                self.items.len() - 1
            }
        };
        match &mut self.items[index] {
            Selection::InlineFragment(fragment) => &mut fragment.selection_set,
            Selection::Field(field) => &mut field.selection_set,
        }
    }

    pub fn merge(&mut self, other: SelectionSet) {
        for item in other.items {
            match item {
                Selection::Field(field) => self.add_field(field),
                Selection::InlineFragment(InlineFragment {
                    type_condition: Some(condition),
                    selection_set,
                }) => self.fragment_mut(&condition).merge(selection_set),
                Selection::InlineFragment(InlineFragment {
                    type_condition: None,
                    selection_set,
                }) => self.merge(selection_set),
            }
        }
    }

    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        for item in &self.items {
            match item {
                Selection::Field(field) => {
                    field.arguments.iter().for_each(|(_, value)| value.collect_variables(out));
                    field.selection_set.collect_variables(out);
                }
                Selection::InlineFragment(fragment) => {
                    fragment.selection_set.collect_variables(out)
                }
            }
        }
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for item in &self.items {
            f.write_str(" ")?;
            match item {
                Selection::Field(field) => write!(f, "{field}")?,
                Selection::InlineFragment(fragment) => match &fragment.type_condition {
                    Some(condition) => write!(f, "... on {condition} {}", fragment.selection_set)?,
                    None => write!(f, "... {}", fragment.selection_set)?,
                },
            }
        }
        f.write_str(" }")
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        f.write_str(&self.name)?;
        if !self.arguments.is_empty() {
            f.write_str("(")?;
            for (i, (name, value)) in self.arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name}: {value}")?;
            }
            f.write_str(")")?;
        }
        if !self.selection_set.is_empty() {
            write!(f, " {}", self.selection_set)?;
        }
        Ok(())
    }
}

/// Prefix of the aliases the gateway gives fields it injects when the client
/// already uses their name as a response key.
pub const INTERNAL_ALIAS_PREFIX: &str = "__fedgate_";

pub fn internal_alias(name: &str) -> String {
    format!("{INTERNAL_ALIAS_PREFIX}{name}")
}

pub fn is_internal_alias(key: &str) -> bool {
    key.starts_with(INTERNAL_ALIAS_PREFIX)
}

/// The value the gateway injected for `name`, wherever it landed.
pub fn internal_value<'v>(object: &'v Map<String, Value>, name: &str) -> Option<&'v Value> {
    object.get(&internal_alias(name)).or_else(|| object.get(name))
}

fn field_set_fields(fields: &FieldSet) -> impl Iterator<Item = Field> + '_ {
    fields.iter().map(|item| {
        let mut field = Field::new(&item.name);
        field.selection_set.add_field_set(&item.selections);
        field
    })
}

/// A client operation with fragments expanded and `@skip`/`@include`
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selection_set: SelectionSet,
}

impl Operation {
    pub fn parse(
        query: &str,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<Self, PlanningError> {
        let document = graphql_parser::parse_query::<String>(query)
            .map_err(|e| PlanningError::Parse(e.to_string()))?;

        let mut fragments = HashMap::new();
        let mut operations = Vec::new();
        for definition in &document.definitions {
            match definition {
                Definition::Operation(operation) => operations.push(operation),
                Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.as_str(), fragment);
                }
            }
        }

        let selected = select_operation(&operations, operation_name)?;
        let (kind, name, variable_definitions, selection_set) = match selected {
            OperationDefinition::SelectionSet(selection_set) => {
                (OperationKind::Query, None, &[][..], selection_set)
            }
            OperationDefinition::Query(query) => (
                OperationKind::Query,
                query.name.clone(),
                &query.variable_definitions[..],
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => (
                OperationKind::Mutation,
                mutation.name.clone(),
                &mutation.variable_definitions[..],
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(_) => {
                return Err(PlanningError::SubscriptionsUnsupported);
            }
        };

        let variable_definitions: Vec<VariableDefinition> = variable_definitions
            .iter()
            .map(|definition| VariableDefinition {
                name: definition.name.clone(),
                ty: TypeRef::from_ast(&definition.var_type),
                default_value: definition.default_value.as_ref().map(InputValue::from_ast),
            })
            .collect();

        let mut values = variables.clone();
        for definition in &variable_definitions {
            if let Some(default) = &definition.default_value {
                if !values.contains_key(&definition.name) {
                    values.insert(definition.name.clone(), default.to_json(&Map::new()));
                }
            }
        }

        let normalizer = Normalizer {
            fragments: &fragments,
            variables: &values,
        };
        let selection_set = normalizer.selection_set(selection_set, &mut Vec::new())?;

        Ok(Operation {
            kind,
            name,
            variables: variable_definitions,
            selection_set,
        })
    }

    pub fn root_type(&self) -> &'static str {
        match self.kind {
            OperationKind::Query => QUERY_TYPE,
            OperationKind::Mutation => MUTATION_TYPE,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|variable| variable.name == name)
    }
}

fn operation_name<'a>(operation: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

fn select_operation<'b, 'q>(
    operations: &[&'b OperationDefinition<'q, String>],
    name: Option<&str>,
) -> Result<&'b OperationDefinition<'q, String>, PlanningError> {
    match name {
        Some(name) => operations
            .iter()
            .copied()
            .find(|operation| operation_name(operation) == Some(name))
            .ok_or_else(|| PlanningError::UnknownOperation(name.to_string())),
        None => match operations {
            [] => Err(PlanningError::NoOperation),
            [operation] => Ok(operation),
            _ => Err(PlanningError::OperationNameRequired),
        },
    }
}

struct Normalizer<'b, 'q> {
    fragments: &'b HashMap<&'b str, &'b ast::FragmentDefinition<'q, String>>,
    variables: &'b Map<String, Value>,
}

impl<'q> Normalizer<'_, 'q> {
    fn selection_set(
        &self,
        selection_set: &ast::SelectionSet<'q, String>,
        visiting: &mut Vec<String>,
    ) -> Result<SelectionSet, PlanningError> {
        let mut out = SelectionSet::default();
        for selection in &selection_set.items {
            match selection {
                ast::Selection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    out.items.push(Selection::Field(Field {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field
                            .arguments
                            .iter()
                            .map(|(name, value)| (name.clone(), InputValue::from_ast(value)))
                            .collect(),
                        selection_set: self.selection_set(&field.selection_set, visiting)?,
                    }));
                }
                ast::Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let name = &spread.fragment_name;
                    let fragment = self
                        .fragments
                        .get(name.as_str())
                        .ok_or_else(|| PlanningError::UnknownFragment(name.clone()))?;
                    if visiting.contains(name) {
                        return Err(PlanningError::FragmentCycle(name.clone()));
                    }
                    visiting.push(name.clone());
                    let selection_set = self.selection_set(&fragment.selection_set, visiting)?;
                    visiting.pop();

                    let TypeCondition::On(type_condition) = &fragment.type_condition;
                    out.items.push(Selection::InlineFragment(InlineFragment {
                        type_condition: Some(type_condition.clone()),
                        selection_set,
                    }));
                }
                ast::Selection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    out.items.push(Selection::InlineFragment(InlineFragment {
                        type_condition: fragment
                            .type_condition
                            .as_ref()
                            .map(|TypeCondition::On(name)| name.clone()),
                        selection_set: self.selection_set(&fragment.selection_set, visiting)?,
                    }));
                }
            }
        }
        Ok(out)
    }

    fn included(&self, directives: &[ast::Directive<'q, String>]) -> Result<bool, PlanningError> {
        for directive in directives {
            let expected = match directive.name.as_str() {
                "skip" => false,
                "include" => true,
                _ => continue,
            };
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| InputValue::from_ast(value).to_json(self.variables));
            match condition {
                Some(Value::Bool(value)) if value != expected => return Ok(false),
                Some(Value::Bool(_)) => {}
                _ => return Err(PlanningError::InvalidDirectiveArgument(directive.name.clone())),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(query: &str) -> Result<Operation, PlanningError> {
        Operation::parse(query, None, &Map::new())
    }

    #[test]
    fn expands_fragments_into_inline_fragments() {
        let operation = parse(
            r#"
            query Top { product(id: "1") { ...Details } }
            fragment Details on Product { name price }
            "#,
        )
        .unwrap();

        assert_eq!(operation.name.as_deref(), Some("Top"));
        assert_eq!(
            operation.selection_set.to_string(),
            r#"{ product(id: "1") { ... on Product { name price } } }"#
        );
    }

    #[test]
    fn applies_skip_and_include_with_variable_defaults() {
        let operation = Operation::parse(
            r#"
            query($withPrice: Boolean = false, $skipName: Boolean!) {
              product(id: 1) { name @skip(if: $skipName) price @include(if: $withPrice) id }
            }
            "#,
            None,
            json!({ "skipName": true }).as_object().unwrap(),
        )
        .unwrap();

        assert_eq!(operation.selection_set.to_string(), "{ product(id: 1) { id } }");
        assert_eq!(operation.variables[0].to_string(), "$withPrice: Boolean = false");
    }

    #[test]
    fn selects_operations_by_name() {
        let document = "query A { a } query B { b }";

        assert_eq!(parse(document), Err(PlanningError::OperationNameRequired));
        let operation = Operation::parse(document, Some("B"), &Map::new()).unwrap();
        assert_eq!(operation.selection_set.to_string(), "{ b }");
        assert_eq!(
            Operation::parse(document, Some("C"), &Map::new()),
            Err(PlanningError::UnknownOperation("C".into()))
        );
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(parse("{ product("), Err(PlanningError::Parse(_))));
        assert_eq!(parse("subscription { ticks }"), Err(PlanningError::SubscriptionsUnsupported));
        assert_eq!(parse("{ ...Missing }"), Err(PlanningError::UnknownFragment("Missing".into())));
        assert_eq!(
            parse("{ ...A } fragment A on Query { ...B } fragment B on Query { ...A }"),
            Err(PlanningError::FragmentCycle("A".into()))
        );
        assert_eq!(
            parse("{ a @skip(if: \"yes\") }"),
            Err(PlanningError::InvalidDirectiveArgument("skip".into()))
        );
    }

    #[test]
    fn merges_selections_by_response_key() {
        let mut selection = SelectionSet::default();
        let mut product = Field::new("product");
        product.selection_set.add_field(Field::new("name"));
        selection.add_field(product.clone());

        product.selection_set = SelectionSet::default();
        product.selection_set.add_typename();
        selection.add_field(product);
        selection.fragment_mut("Product").add_field(Field::new("id"));
        selection.fragment_mut("Product").add_field(Field::new("id"));

        assert_eq!(
            selection.to_string(),
            "{ product { name __typename } ... on Product { id } }"
        );
    }
}
