//! Subgraph schema composition.
//!
//! Subgraph SDLs are parsed into [`SubgraphDescriptor`]s and merged into a
//! [`Supergraph`]: one client-facing type system where every field knows
//! which subgraphs can resolve it and every entity knows its keys.

mod field_set;
mod subgraph;
mod supergraph;

use std::collections::{BTreeMap, BTreeSet, HashSet};

pub use field_set::{FieldSet, FieldSetItem};
pub use subgraph::{SubgraphDescriptor, SubgraphField, SubgraphKey, SubgraphSchema, SubgraphType};
pub use supergraph::{
    ArgumentDefinition, EntityKey, EnumValueDefinition, FieldDefinition, FieldOwner, MUTATION_TYPE,
    QUERY_TYPE, Supergraph, TypeDefinition, TypeKind, TypeRef,
};

use crate::error::CompositionError;
use supergraph::BUILTIN_SCALARS;

/// Composes subgraphs, given in preference order, into a supergraph.
///
/// Every conflict found is reported at once in
/// [`CompositionError::Conflicts`].
pub fn compose(subgraphs: &[SubgraphDescriptor]) -> Result<Supergraph, CompositionError> {
    if subgraphs.is_empty() {
        return Err(CompositionError::NoSubgraphs);
    }
    let mut seen = HashSet::new();
    for subgraph in subgraphs {
        if !seen.insert(subgraph.name.as_str()) {
            return Err(CompositionError::DuplicateSubgraph(subgraph.name.clone()));
        }
    }

    let mut composer = Composer::default();
    for subgraph in subgraphs {
        composer.merge_subgraph(subgraph);
    }
    composer.check_value_types(subgraphs);
    composer.check_federation_directives(subgraphs);
    composer.check_fields();
    composer.finish(subgraphs)
}

#[derive(Default)]
struct Composer {
    types: BTreeMap<String, TypeDefinition>,
    errors: Vec<String>,
}

impl Composer {
    fn merge_subgraph(&mut self, subgraph: &SubgraphDescriptor) {
        for ty in subgraph.schema.types.values() {
            let merged = self
                .types
                .entry(ty.name.clone())
                .or_insert_with(|| TypeDefinition::new(&ty.name, ty.kind));

            if merged.kind != ty.kind {
                self.errors.push(format!(
                    "type `{}` is declared as {} in `{}` but as {} elsewhere",
                    ty.name, ty.kind, subgraph.name, merged.kind
                ));
                continue;
            }

            merged.subgraphs.insert(subgraph.name.clone());
            let first_declaration = merged.subgraphs.len() == 1;
            if merged.description.is_none() {
                merged.description = ty.description.clone();
            }

            match ty.kind {
                TypeKind::Object | TypeKind::Interface => {
                    merged.interfaces.extend(ty.interfaces.iter().cloned());
                    merged.keys.extend(ty.keys.iter().map(|key| EntityKey {
                        subgraph: subgraph.name.clone(),
                        fields: key.fields.clone(),
                        resolvable: key.resolvable,
                    }));

                    for field in ty.fields.values() {
                        let definition = merged
                            .fields
                            .entry(field.name.clone())
                            .or_insert_with(|| FieldDefinition {
                                name: field.name.clone(),
                                description: field.description.clone(),
                                ty: field.ty.clone(),
                                arguments: field.arguments.clone(),
                                deprecation: field.deprecation.clone(),
                                owners: Vec::new(),
                            });

                        if definition.ty != field.ty {
                            self.errors.push(format!(
                                "field `{}.{}` is declared as `{}` in `{}` but as `{}` elsewhere",
                                ty.name, field.name, field.ty, subgraph.name, definition.ty
                            ));
                            continue;
                        }
                        if definition.description.is_none() {
                            definition.description = field.description.clone();
                        }
                        if !field.external {
                            definition.owners.push(FieldOwner {
                                subgraph: subgraph.name.clone(),
                                requires: field.requires.clone(),
                                provides: field.provides.clone(),
                            });
                        }
                    }
                }
                TypeKind::Union => merged.members.extend(ty.members.iter().cloned()),
                TypeKind::Enum => {
                    if first_declaration {
                        merged.enum_values = ty.enum_values.clone();
                        continue;
                    }
                    let names = |values: &[EnumValueDefinition]| -> BTreeSet<String> {
                        values.iter().map(|value| value.name.clone()).collect()
                    };
                    let existing = names(&merged.enum_values);
                    let declared = names(&ty.enum_values);
                    if existing != declared {
                        self.errors.push(format!(
                            "enum `{}` declares different values in `{}` than in other subgraphs",
                            ty.name, subgraph.name
                        ));
                    }
                }
                TypeKind::InputObject => {
                    if first_declaration {
                        merged.input_fields = ty
                            .input_fields
                            .iter()
                            .map(|(name, field)| (name.clone(), field.clone()))
                            .collect();
                        continue;
                    }
                    let same_shape = merged.input_fields.len() == ty.input_fields.len()
                        && ty.input_fields.iter().all(|(name, field)| {
                            merged
                                .input_fields
                                .get(name)
                                .is_some_and(|existing| existing.ty == field.ty)
                        });
                    if !same_shape {
                        self.errors.push(format!(
                            "input type `{}` declares different fields in `{}` than elsewhere",
                            ty.name, subgraph.name
                        ));
                    }
                }
                TypeKind::Scalar => {}
            }
        }
    }

    /// Object types without `@key` shared by several subgraphs must be
    /// declared identically everywhere.
    fn check_value_types(&mut self, subgraphs: &[SubgraphDescriptor]) {
        for merged in self.types.values() {
            if merged.kind != TypeKind::Object
                || merged.subgraphs.len() < 2
                || merged.is_entity()
                || merged.name == QUERY_TYPE
                || merged.name == MUTATION_TYPE
            {
                continue;
            }

            let mut declarations = subgraphs
                .iter()
                .filter_map(|subgraph| Some((subgraph, subgraph.schema.types.get(&merged.name)?)));
            let Some((first_subgraph, first)) = declarations.next() else {
                continue;
            };
            if first.extension {
                continue;
            }
            let shape = |ty: &SubgraphType| -> BTreeMap<String, String> {
                ty.fields
                    .values()
                    .map(|field| (field.name.clone(), field.ty.to_string()))
                    .collect()
            };
            let expected = shape(first);
            for (subgraph, ty) in declarations {
                if !ty.extension && shape(ty) != expected {
                    self.errors.push(format!(
                        "value type `{}` is declared differently in `{}` and `{}`",
                        merged.name, first_subgraph.name, subgraph.name
                    ));
                }
            }
        }
    }

    fn check_federation_directives(&mut self, subgraphs: &[SubgraphDescriptor]) {
        for subgraph in subgraphs {
            let schema = &subgraph.schema;
            for ty in schema.types.values() {
                if !matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
                    continue;
                }

                for key in &ty.keys {
                    if !ty.has_field_set(&key.fields, schema) {
                        self.errors.push(format!(
                            "@key(fields: \"{}\") on `{}` in `{}` names an undeclared field",
                            key.fields, ty.name, subgraph.name
                        ));
                    }
                }

                if ty.extension && !ty.is_root() {
                    if ty.keys.is_empty() {
                        self.errors.push(format!(
                            "type `{}` is extended in `{}` but declares no @key",
                            ty.name, subgraph.name
                        ));
                    } else if !defined_elsewhere(&ty.name, &subgraph.name, subgraphs) {
                        self.errors.push(format!(
                            "type `{}` is extended in `{}` but no other subgraph defines it",
                            ty.name, subgraph.name
                        ));
                    }
                }

                for field in ty.fields.values() {
                    if let Some(requires) = &field.requires {
                        self.check_requires(subgraph, ty, &field.name, requires);
                    }
                    if let Some(provides) = &field.provides {
                        self.check_provides(subgraph, ty, field, provides);
                    }
                }
            }
        }
    }

    fn check_requires(
        &mut self,
        subgraph: &SubgraphDescriptor,
        ty: &SubgraphType,
        field: &str,
        requires: &FieldSet,
    ) {
        if ty.keys.is_empty() {
            self.errors.push(format!(
                "`{}.{field}` in `{}` uses @requires but `{}` has no @key there",
                ty.name, subgraph.name, ty.name
            ));
            return;
        }
        for item in requires.iter() {
            let resolved = self
                .types
                .get(&ty.name)
                .and_then(|merged| merged.fields.get(&item.name))
                .is_some_and(|required| !required.owners.is_empty());
            if !resolved {
                self.errors.push(format!(
                    "@requires on `{}.{field}` in `{}` needs `{}.{}`, which no subgraph resolves",
                    ty.name, subgraph.name, ty.name, item.name
                ));
            }
        }
    }

    fn check_provides(
        &mut self,
        subgraph: &SubgraphDescriptor,
        ty: &SubgraphType,
        field: &SubgraphField,
        provides: &FieldSet,
    ) {
        let target = field.ty.named_type();
        if !self.types.get(target).is_some_and(TypeDefinition::is_entity) {
            self.errors.push(format!(
                "@provides on `{}.{}` in `{}` requires `{target}` to be an entity",
                ty.name, field.name, subgraph.name
            ));
            return;
        }
        let declared = subgraph
            .schema
            .types
            .get(target)
            .is_some_and(|target_type| target_type.has_field_set(provides, &subgraph.schema));
        if !declared {
            self.errors.push(format!(
                "@provides(fields: \"{provides}\") on `{}.{}` in `{}`: `{target}` lacks them",
                ty.name, field.name, subgraph.name
            ));
        }
    }

    fn check_fields(&mut self) {
        if !self.types.contains_key(QUERY_TYPE) {
            self.errors.push("no subgraph declares a query root type".to_string());
        }
        for merged in self.types.values() {
            if !matches!(merged.kind, TypeKind::Object | TypeKind::Interface) {
                continue;
            }
            if merged.is_entity() && !merged.keys.iter().any(|key| key.resolvable) {
                self.errors.push(format!(
                    "entity `{}` has no resolvable @key in any subgraph",
                    merged.name
                ));
            }
            for field in merged.fields.values() {
                if merged.kind == TypeKind::Object && field.owners.is_empty() {
                    self.errors.push(format!(
                        "field `{}.{}` is marked @external in every subgraph that declares it",
                        merged.name, field.name
                    ));
                }
                let named = field.ty.named_type();
                if !self.types.contains_key(named) && !BUILTIN_SCALARS.contains(&named) {
                    self.errors.push(format!(
                        "field `{}.{}` has unknown type `{named}`",
                        merged.name, field.name
                    ));
                }
            }
        }
    }

    fn finish(mut self, subgraphs: &[SubgraphDescriptor]) -> Result<Supergraph, CompositionError> {
        if !self.errors.is_empty() {
            return Err(CompositionError::Conflicts(self.errors));
        }
        for scalar in BUILTIN_SCALARS {
            self.types
                .entry(scalar.to_string())
                .or_insert_with(|| TypeDefinition::new(scalar, TypeKind::Scalar));
        }
        Ok(Supergraph {
            subgraphs: subgraphs
                .iter()
                .map(|subgraph| (subgraph.name.clone(), subgraph.url.clone()))
                .collect(),
            types: self.types,
        })
    }
}

/// Whether a subgraph other than `extending` owns `type_name`, either with a
/// base definition or by resolving one of its key fields itself.
fn defined_elsewhere(type_name: &str, extending: &str, subgraphs: &[SubgraphDescriptor]) -> bool {
    subgraphs
        .iter()
        .filter(|subgraph| subgraph.name != extending)
        .filter_map(|subgraph| subgraph.schema.types.get(type_name))
        .any(|ty| {
            !ty.extension
                || ty.keys.iter().any(|key| {
                    key.fields
                        .iter()
                        .any(|item| ty.fields.get(&item.name).is_some_and(|field| !field.external))
                })
        })
}
