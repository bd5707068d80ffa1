use std::borrow::Cow;

use graphql_parser::schema::{
    Definition, Directive, EnumValue, Field, InputValue, TypeDefinition, TypeExtension, Value,
};
use indexmap::IndexMap;

use super::field_set::FieldSet;
use super::supergraph::{
    ArgumentDefinition, BUILTIN_SCALARS, EnumValueDefinition, MUTATION_TYPE, QUERY_TYPE, TypeKind,
    TypeRef,
};
use crate::error::CompositionError;
use crate::query_planner::operation::InputValue as Literal;

/// One subgraph as seen by the composer: where it lives and the
/// federation-aware model parsed from its SDL.
#[derive(Debug, Clone)]
pub struct SubgraphDescriptor {
    pub name: String,
    pub url: String,
    pub schema: SubgraphSchema,
}

impl SubgraphDescriptor {
    pub fn parse(name: &str, url: &str, sdl: &str) -> Result<Self, CompositionError> {
        let schema = SubgraphSchema::parse(sdl).map_err(|reason| CompositionError::InvalidSchema {
            subgraph: name.to_string(),
            reason,
        })?;
        Ok(SubgraphDescriptor {
            name: name.to_string(),
            url: url.to_string(),
            schema,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphKey {
    pub fields: FieldSet,
    pub resolvable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphField {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    pub deprecation: Option<String>,
    pub external: bool,
    pub requires: Option<FieldSet>,
    pub provides: Option<FieldSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphType {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    /// Only ever declared through `extend type` or `@extends`.
    pub extension: bool,
    pub fields: IndexMap<String, SubgraphField>,
    pub input_fields: IndexMap<String, ArgumentDefinition>,
    pub interfaces: Vec<String>,
    pub members: Vec<String>,
    pub enum_values: Vec<EnumValueDefinition>,
    pub keys: Vec<SubgraphKey>,
}

impl SubgraphType {
    fn new(name: &str, kind: TypeKind, extension: bool) -> Self {
        SubgraphType {
            name: name.to_string(),
            kind,
            description: None,
            extension,
            fields: IndexMap::new(),
            input_fields: IndexMap::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
            enum_values: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == QUERY_TYPE || self.name == MUTATION_TYPE
    }

    /// Keeps the first description a type gets across its declarations.
    fn describe(&mut self, description: &Option<String>) {
        if self.description.is_none() {
            self.description = description.clone();
        }
    }

    /// Whether every field of `fields` exists on this type, following nested
    /// selections through `schema`.
    pub fn has_field_set(&self, fields: &FieldSet, schema: &SubgraphSchema) -> bool {
        fields.iter().all(|item| match self.fields.get(&item.name) {
            None => false,
            Some(_) if item.selections.is_empty() => true,
            Some(field) => schema
                .types
                .get(field.ty.named_type())
                .is_some_and(|nested| nested.has_field_set(&item.selections, schema)),
        })
    }
}

struct RootNames {
    query: String,
    mutation: String,
    subscription: String,
}

/// Federation-aware model of one subgraph's SDL. Federation plumbing types,
/// fields and directive definitions are dropped; root types are renamed to
/// `Query` and `Mutation`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubgraphSchema {
    pub types: IndexMap<String, SubgraphType>,
}

impl SubgraphSchema {
    pub fn parse(sdl: &str) -> Result<Self, String> {
        let source = strip_schema_extensions(sdl);
        let document = graphql_parser::parse_schema::<String>(&source).map_err(|e| e.to_string())?;

        let mut roots = RootNames {
            query: QUERY_TYPE.to_string(),
            mutation: MUTATION_TYPE.to_string(),
            subscription: "Subscription".to_string(),
        };
        for definition in &document.definitions {
            if let Definition::SchemaDefinition(schema) = definition {
                if let Some(query) = &schema.query {
                    roots.query = query.clone();
                }
                if let Some(mutation) = &schema.mutation {
                    roots.mutation = mutation.clone();
                }
                if let Some(subscription) = &schema.subscription {
                    roots.subscription = subscription.clone();
                }
            }
        }

        let mut schema = SubgraphSchema::default();
        for definition in &document.definitions {
            match definition {
                Definition::TypeDefinition(definition) => {
                    schema.add_definition(definition, &roots)?;
                }
                Definition::TypeExtension(extension) => {
                    schema.add_extension(extension, &roots)?;
                }
                Definition::SchemaDefinition(_) | Definition::DirectiveDefinition(_) => {}
            }
        }
        Ok(schema)
    }

    fn entry(
        &mut self,
        name: &str,
        kind: TypeKind,
        extension: bool,
    ) -> Result<&mut SubgraphType, String> {
        let entry = self
            .types
            .entry(name.to_string())
            .or_insert_with(|| SubgraphType::new(name, kind, extension));
        if entry.kind != kind {
            return Err(format!(
                "type `{name}` is declared both as {} and as {kind}",
                entry.kind
            ));
        }
        entry.extension &= extension;
        Ok(entry)
    }

    fn add_definition(
        &mut self,
        definition: &TypeDefinition<'_, String>,
        roots: &RootNames,
    ) -> Result<(), String> {
        match definition {
            TypeDefinition::Object(object) => {
                let Some(name) = canonical_name(&object.name, roots) else {
                    return Ok(());
                };
                let extension = has_directive(&object.directives, "extends");
                let entry = self.entry(name, TypeKind::Object, extension)?;
                entry.describe(&object.description);
                let interfaces = &object.implements_interfaces;
                add_object_like(entry, interfaces, &object.directives, &object.fields)
            }
            TypeDefinition::Interface(interface) => {
                let Some(name) = canonical_name(&interface.name, roots) else {
                    return Ok(());
                };
                let extension = has_directive(&interface.directives, "extends");
                let entry = self.entry(name, TypeKind::Interface, extension)?;
                entry.describe(&interface.description);
                add_object_like(entry, &[], &interface.directives, &interface.fields)
            }
            TypeDefinition::Union(union) => {
                let Some(name) = canonical_name(&union.name, roots) else {
                    return Ok(());
                };
                let entry = self.entry(name, TypeKind::Union, false)?;
                entry.describe(&union.description);
                entry.members.extend(union.types.iter().cloned());
                Ok(())
            }
            TypeDefinition::Enum(enumeration) => {
                let Some(name) = canonical_name(&enumeration.name, roots) else {
                    return Ok(());
                };
                let entry = self.entry(name, TypeKind::Enum, false)?;
                entry.describe(&enumeration.description);
                entry.enum_values.extend(enumeration.values.iter().map(convert_enum_value));
                Ok(())
            }
            TypeDefinition::InputObject(input) => {
                let Some(name) = canonical_name(&input.name, roots) else {
                    return Ok(());
                };
                let entry = self.entry(name, TypeKind::InputObject, false)?;
                entry.describe(&input.description);
                for field in &input.fields {
                    entry.input_fields.insert(field.name.clone(), convert_input_value(field));
                }
                Ok(())
            }
            TypeDefinition::Scalar(scalar) => {
                if let Some(name) = canonical_name(&scalar.name, roots) {
                    let entry = self.entry(name, TypeKind::Scalar, false)?;
                    entry.describe(&scalar.description);
                }
                Ok(())
            }
        }
    }

    fn add_extension(
        &mut self,
        extension: &TypeExtension<'_, String>,
        roots: &RootNames,
    ) -> Result<(), String> {
        match extension {
            TypeExtension::Object(object) => {
                let Some(name) = canonical_name(&object.name, roots) else {
                    return Ok(());
                };
                let entry = self.entry(name, TypeKind::Object, true)?;
                let interfaces = &object.implements_interfaces;
                add_object_like(entry, interfaces, &object.directives, &object.fields)
            }
            TypeExtension::Interface(interface) => {
                let Some(name) = canonical_name(&interface.name, roots) else {
                    return Ok(());
                };
                let entry = self.entry(name, TypeKind::Interface, true)?;
                add_object_like(entry, &[], &interface.directives, &interface.fields)
            }
            TypeExtension::Union(union) => {
                if let Some(name) = canonical_name(&union.name, roots) {
                    let entry = self.entry(name, TypeKind::Union, true)?;
                    entry.members.extend(union.types.iter().cloned());
                }
                Ok(())
            }
            TypeExtension::Enum(enumeration) => {
                if let Some(name) = canonical_name(&enumeration.name, roots) {
                    let entry = self.entry(name, TypeKind::Enum, true)?;
                    entry.enum_values.extend(enumeration.values.iter().map(convert_enum_value));
                }
                Ok(())
            }
            TypeExtension::InputObject(input) => {
                if let Some(name) = canonical_name(&input.name, roots) {
                    let entry = self.entry(name, TypeKind::InputObject, true)?;
                    for field in &input.fields {
                        entry.input_fields.insert(field.name.clone(), convert_input_value(field));
                    }
                }
                Ok(())
            }
            TypeExtension::Scalar(scalar) => {
                if let Some(name) = canonical_name(&scalar.name, roots) {
                    self.entry(name, TypeKind::Scalar, true)?;
                }
                Ok(())
            }
        }
    }
}

fn add_object_like(
    entry: &mut SubgraphType,
    interfaces: &[String],
    directives: &[Directive<'_, String>],
    fields: &[Field<'_, String>],
) -> Result<(), String> {
    for interface in interfaces {
        if !entry.interfaces.contains(interface) {
            entry.interfaces.push(interface.clone());
        }
    }
    entry.keys.extend(keys(directives)?);

    for field in fields {
        if entry.is_root() && (field.name == "_service" || field.name == "_entities") {
            continue;
        }
        let converted = SubgraphField {
            name: field.name.clone(),
            description: field.description.clone(),
            ty: TypeRef::from_ast(&field.field_type),
            arguments: field.arguments.iter().map(convert_input_value).collect(),
            deprecation: deprecation(&field.directives),
            external: has_directive(&field.directives, "external"),
            requires: field_set_argument(&field.directives, "requires")?,
            provides: field_set_argument(&field.directives, "provides")?,
        };
        entry.fields.insert(field.name.clone(), converted);
    }
    Ok(())
}

/// Maps a subgraph type name to its supergraph name, or `None` when the
/// type is federation plumbing, a built-in scalar or the subscription root.
fn canonical_name<'a>(name: &'a str, roots: &'a RootNames) -> Option<&'a str> {
    if name == roots.query {
        return Some(QUERY_TYPE);
    }
    if name == roots.mutation {
        return Some(MUTATION_TYPE);
    }
    let plumbing = name.starts_with('_')
        || name == "FieldSet"
        || name.starts_with("link__")
        || name.starts_with("federation__")
        || name.starts_with("join__");
    if plumbing || name == roots.subscription || BUILTIN_SCALARS.contains(&name) {
        return None;
    }
    Some(name)
}

fn directive_name<'a>(directive: &'a Directive<'_, String>) -> &'a str {
    directive
        .name
        .strip_prefix("federation__")
        .unwrap_or(&directive.name)
}

fn has_directive(directives: &[Directive<'_, String>], name: &str) -> bool {
    directives.iter().any(|d| directive_name(d) == name)
}

fn argument<'a, 'b>(
    directive: &'a Directive<'b, String>,
    name: &str,
) -> Option<&'a Value<'b, String>> {
    directive
        .arguments
        .iter()
        .find(|(arg, _)| arg == name)
        .map(|(_, value)| value)
}

fn string_argument<'a>(directive: &'a Directive<'_, String>, name: &str) -> Option<&'a str> {
    match argument(directive, name)? {
        Value::String(value) => Some(value),
        _ => None,
    }
}

fn keys(directives: &[Directive<'_, String>]) -> Result<Vec<SubgraphKey>, String> {
    directives
        .iter()
        .filter(|d| directive_name(d) == "key")
        .map(|directive| {
            let fields = string_argument(directive, "fields")
                .ok_or_else(|| "@key is missing its `fields` argument".to_string())?;
            let resolvable =
                !matches!(argument(directive, "resolvable"), Some(Value::Boolean(false)));
            Ok(SubgraphKey {
                fields: FieldSet::parse(fields)?,
                resolvable,
            })
        })
        .collect()
}

fn field_set_argument(
    directives: &[Directive<'_, String>],
    name: &str,
) -> Result<Option<FieldSet>, String> {
    let Some(directive) = directives.iter().find(|d| directive_name(d) == name) else {
        return Ok(None);
    };
    let fields = string_argument(directive, "fields")
        .ok_or_else(|| format!("@{name} is missing its `fields` argument"))?;
    FieldSet::parse(fields).map(Some)
}

fn deprecation(directives: &[Directive<'_, String>]) -> Option<String> {
    let directive = directives.iter().find(|d| d.name == "deprecated")?;
    Some(
        string_argument(directive, "reason")
            .unwrap_or("No longer supported")
            .to_string(),
    )
}

fn convert_input_value(value: &InputValue<'_, String>) -> ArgumentDefinition {
    ArgumentDefinition {
        name: value.name.clone(),
        description: value.description.clone(),
        ty: TypeRef::from_ast(&value.value_type),
        default_value: value
            .default_value
            .as_ref()
            .map(|default| Literal::from_ast(default).to_string()),
    }
}

fn convert_enum_value(value: &EnumValue<'_, String>) -> EnumValueDefinition {
    EnumValueDefinition {
        name: value.name.clone(),
        description: value.description.clone(),
        deprecation: deprecation(&value.directives),
    }
}

/// Removes `extend schema ...` blocks, which carry only `@link` imports and
/// which the parser does not accept.
fn strip_schema_extensions(sdl: &str) -> Cow<'_, str> {
    const MARKER: &str = "extend schema";
    if !sdl.contains(MARKER) {
        return Cow::Borrowed(sdl);
    }
    let mut out = String::with_capacity(sdl.len());
    let mut rest = sdl;
    while let Some(start) = rest.find(MARKER) {
        out.push_str(&rest[..start]);
        let tail = &rest[start + MARKER.len()..];
        rest = &tail[schema_extension_end(tail)..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn schema_extension_end(tail: &str) -> usize {
    let bytes = tail.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            match c {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match c {
            b'"' if depth > 0 => in_string = true,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            b'@' if depth == 0 => {
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                continue;
            }
            c if depth == 0 && (c.is_ascii_alphabetic() || c == b'_' || c == b'"') => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_federation_two_subgraph() {
        let sdl = r#"
            extend schema
              @link(url: "https://specs.apollo.dev/federation/v2.3", import: ["@key", "@shareable"])

            schema { query: RootQuery }

            type RootQuery {
              getImage(imageId: Int!): ImageType
              _service: _Service!
            }

            type ImageType @key(fields: "id") {
              id: Int!
              url: String!
            }

            type ProductType @key(fields: "id", resolvable: false) {
              id: Int! @external
              images: [ImageType!]! @deprecated(reason: "use gallery")
            }

            scalar _Any
            type _Service { sdl: String }
        "#;

        let schema = SubgraphSchema::parse(sdl).unwrap();

        let names: Vec<&str> = schema.types.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Query", "ImageType", "ProductType"]);
        assert!(!schema.types["Query"].fields.contains_key("_service"));

        let product = &schema.types["ProductType"];
        assert_eq!(product.keys.len(), 1);
        assert!(!product.keys[0].resolvable);
        assert!(product.fields["id"].external);
        assert_eq!(product.fields["images"].ty.to_string(), "[ImageType!]!");
        assert_eq!(product.fields["images"].deprecation.as_deref(), Some("use gallery"));
    }

    #[test]
    fn tracks_extensions_and_federation_directives() {
        let sdl = r#"
            extend type Product @key(fields: "upc") {
              upc: String! @external
              weight: Int @external
              shippingEstimate: Int @requires(fields: "weight")
            }

            type Review {
              product: Product @provides(fields: "name")
            }
        "#;

        let schema = SubgraphSchema::parse(sdl).unwrap();

        let product = &schema.types["Product"];
        assert!(product.extension);
        assert_eq!(
            product.fields["shippingEstimate"].requires.as_ref().unwrap().to_string(),
            "weight"
        );
        assert!(!schema.types["Review"].extension);
        assert!(schema.types["Review"].fields["product"].provides.is_some());
    }

    #[test]
    fn rejects_kind_mismatch_inside_one_subgraph() {
        let error = SubgraphSchema::parse("type Thing { id: ID } enum Thing { A }").unwrap_err();
        assert!(error.contains("Thing"));
    }

    #[test]
    fn strips_schema_extension_blocks() {
        let sdl = concat!(
            "extend schema @link(url: \"x\", import: [\"@key\"])\n",
            "# trailing note\n",
            "type Query { a: Int }",
        );
        assert_eq!(strip_schema_extensions(sdl).trim(), "type Query { a: Int }");
    }
}
