use std::fmt;

use graphql_parser::query::{Definition, OperationDefinition, Selection, SelectionSet};

/// A parsed `fields:` argument of `@key`, `@requires` or `@provides`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(pub Vec<FieldSetItem>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSetItem {
    pub name: String,
    pub selections: FieldSet,
}

impl FieldSet {
    pub fn parse(text: &str) -> Result<Self, String> {
        let source = format!("{{ {text} }}");
        let document = graphql_parser::parse_query::<String>(&source)
            .map_err(|e| format!("invalid field set \"{text}\": {e}"))?;

        match document.definitions.as_slice() {
            [Definition::Operation(OperationDefinition::SelectionSet(selection_set))] => {
                let set = Self::from_selection_set(selection_set, text)?;
                if set.0.is_empty() {
                    return Err(format!("field set \"{text}\" is empty"));
                }
                Ok(set)
            }
            _ => Err(format!("invalid field set \"{text}\"")),
        }
    }

    fn from_selection_set(
        selection_set: &SelectionSet<'_, String>,
        text: &str,
    ) -> Result<Self, String> {
        selection_set
            .items
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => Ok(FieldSetItem {
                    name: field.name.clone(),
                    selections: Self::from_selection_set(&field.selection_set, text)?,
                }),
                _ => Err(format!("field set \"{text}\" may only contain fields")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldSet)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSetItem> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSetItem> {
        self.0.iter().find(|item| item.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&item.name)?;
            if !item.selections.is_empty() {
                write!(f, " {{ {} }}", item.selections)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_nested_field_sets() {
        let set = FieldSet::parse("id organization { id region }").unwrap();

        assert!(set.contains("id"));
        assert_eq!(set.get("organization").unwrap().selections.0.len(), 2);
        assert_eq!(set.to_string(), "id organization { id region }");
    }

    #[test]
    fn rejects_fragments_and_empty_sets() {
        assert!(FieldSet::parse("... on Product { id }").is_err());
        assert!(FieldSet::parse("").is_err());
    }
}
