use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use graphql_parser::schema::Type;
use indexmap::IndexMap;

use super::field_set::FieldSet;

pub const QUERY_TYPE: &str = "Query";
pub const MUTATION_TYPE: &str = "Mutation";

pub(crate) const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

/// A reference to a type as written in a field or argument definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn from_ast(ty: &Type<'_, String>) -> Self {
        match ty {
            Type::NamedType(name) => TypeRef::Named(name.clone()),
            Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }

    pub fn named_type(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named_type(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// Number of list wrappers between the field and its named type.
    pub fn list_depth(&self) -> usize {
        match self {
            TypeRef::Named(_) => 0,
            TypeRef::List(inner) => 1 + inner.list_depth(),
            TypeRef::NonNull(inner) => inner.list_depth(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl TypeKind {
    pub fn introspection_name(self) -> &'static str {
        match self {
            TypeKind::Scalar => "SCALAR",
            TypeKind::Object => "OBJECT",
            TypeKind::Interface => "INTERFACE",
            TypeKind::Union => "UNION",
            TypeKind::Enum => "ENUM",
            TypeKind::InputObject => "INPUT_OBJECT",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Object => "object type",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::InputObject => "input object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDefinition {
    pub name: String,
    pub description: Option<String>,
    pub deprecation: Option<String>,
}

/// A subgraph that resolves a field, with the federation hints it declared.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOwner {
    pub subgraph: String,
    pub requires: Option<FieldSet>,
    pub provides: Option<FieldSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    pub deprecation: Option<String>,
    /// Owning subgraphs in preference order.
    pub owners: Vec<FieldOwner>,
}

impl FieldDefinition {
    pub fn owner(&self, subgraph: &str) -> Option<&FieldOwner> {
        self.owners.iter().find(|owner| owner.subgraph == subgraph)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityKey {
    pub subgraph: String,
    pub fields: FieldSet,
    pub resolvable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    pub fields: BTreeMap<String, FieldDefinition>,
    pub input_fields: BTreeMap<String, ArgumentDefinition>,
    pub interfaces: BTreeSet<String>,
    pub members: BTreeSet<String>,
    pub enum_values: Vec<EnumValueDefinition>,
    pub keys: Vec<EntityKey>,
    pub subgraphs: BTreeSet<String>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDefinition {
            name: name.into(),
            kind,
            description: None,
            fields: BTreeMap::new(),
            input_fields: BTreeMap::new(),
            interfaces: BTreeSet::new(),
            members: BTreeSet::new(),
            enum_values: Vec::new(),
            keys: Vec::new(),
            subgraphs: BTreeSet::new(),
        }
    }

    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar | TypeKind::Enum)
    }
}

/// The composed, client-facing type system plus the routing metadata
/// needed to plan queries against the subgraphs.
#[derive(Debug, Clone, PartialEq)]
pub struct Supergraph {
    pub(crate) subgraphs: IndexMap<String, String>,
    pub(crate) types: BTreeMap<String, TypeDefinition>,
}

impl Supergraph {
    pub fn subgraph_url(&self, name: &str) -> Option<&str> {
        self.subgraphs.get(name).map(String::as_str)
    }

    /// Subgraph names in preference order.
    pub fn subgraph_names(&self) -> impl Iterator<Item = &str> {
        self.subgraphs.keys().map(String::as_str)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.fields.get(field)
    }

    pub fn has_mutation_type(&self) -> bool {
        self.types.contains_key(MUTATION_TYPE)
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.types.get(type_name).is_some_and(TypeDefinition::is_abstract)
    }

    /// Object types a value of `type_name` can be at runtime.
    pub fn possible_types(&self, type_name: &str) -> Vec<&str> {
        let Some(definition) = self.types.get(type_name) else {
            return Vec::new();
        };
        match definition.kind {
            TypeKind::Object => vec![definition.name.as_str()],
            TypeKind::Union => definition.members.iter().map(String::as_str).collect(),
            TypeKind::Interface => self
                .types
                .values()
                .filter(|ty| ty.kind == TypeKind::Object && ty.interfaces.contains(type_name))
                .map(|ty| ty.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether a fragment on `condition` applies to an object of `object_type`.
    pub fn type_condition_matches(&self, condition: &str, object_type: &str) -> bool {
        condition == object_type || self.possible_types(condition).contains(&object_type)
    }

    /// Whether `subgraph` can return `type_name.field`: it either owns the
    /// field or the field is part of a key it declared for the type.
    pub fn can_resolve(&self, type_name: &str, field: &str, subgraph: &str) -> bool {
        if field == "__typename" {
            return true;
        }
        let Some(definition) = self.types.get(type_name) else {
            return false;
        };
        let owned = definition
            .fields
            .get(field)
            .is_some_and(|f| f.owner(subgraph).is_some());
        owned
            || definition
                .keys
                .iter()
                .any(|key| key.subgraph == subgraph && key.fields.contains(field))
    }

    pub(crate) fn can_resolve_field_set(
        &self,
        type_name: &str,
        fields: &FieldSet,
        subgraph: &str,
    ) -> bool {
        fields.iter().all(|item| {
            if !self.can_resolve(type_name, &item.name, subgraph) {
                return false;
            }
            if item.selections.is_empty() {
                return true;
            }
            self.field(type_name, &item.name).is_some_and(|field| {
                self.can_resolve_field_set(field.ty.named_type(), &item.selections, subgraph)
            })
        })
    }

    /// A resolvable key of `type_name` in `target` whose fields `source` can
    /// provide as a representation.
    pub fn entity_key(&self, type_name: &str, target: &str, source: &str) -> Option<&EntityKey> {
        self.types.get(type_name)?.keys.iter().find(|key| {
            key.subgraph == target
                && key.resolvable
                && self.can_resolve_field_set(type_name, &key.fields, source)
        })
    }
}
