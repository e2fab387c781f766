//! Schema introspection (C1): compiles a nominal class schema into a
//! canonical [`PathCatalog`] of dotted paths, per-path identity fields, and
//! parent/child relations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaFieldKind {
    /// A scalar property (string, number, bool).
    Scalar,
    /// A list of scalar properties.
    ScalarList,
    /// An edge to another class. `many` selects list cardinality (`[]` suffix).
    Edge {
        target_class: String,
        many: bool,
        #[serde(default)]
        label: Option<String>,
    },
}

/// A single field declared on a [`SchemaClass`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(flatten)]
    pub kind: SchemaFieldKind,
}

/// A class position in the schema graph: identity fields, property fields
/// (represented implicitly as non-identity scalar fields), and edge fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaClass {
    pub name: String,
    /// Ordered, string-valued identity fields (spec.md §3).
    #[serde(default)]
    pub identity_fields: Vec<String>,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

/// The recursive schema description: a root class name plus the full set of
/// class declarations reachable from it. A class may appear at multiple
/// positions provided the traversal never revisits it along its own
/// ancestor chain (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub root_class: String,
    pub classes: BTreeMap<String, SchemaClass>,
}

/// Canonical enumeration of allowed dotted paths plus the metadata needed to
/// validate and normalize batch IR against them (spec.md §3 `PathCatalog`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathCatalog {
    /// Ordered set of canonical dotted paths, root first (`""`).
    pub paths: Vec<String>,
    /// path -> ordered identity field names.
    pub id_fields_by_path: BTreeMap<String, Vec<String>>,
    /// path -> parent path (root maps to itself).
    pub parent_of: BTreeMap<String, String>,
    /// path -> class name.
    pub class_of: BTreeMap<String, String>,
    /// path -> edge label inherited from the parent's edge field.
    pub edge_label_by_path: BTreeMap<String, String>,
}

impl PathCatalog {
    /// Compile a [`Schema`] into a [`PathCatalog`].
    pub fn build(schema: &Schema) -> Result<Self, CoreError> {
        let root = schema
            .classes
            .get(&schema.root_class)
            .ok_or_else(|| CoreError::ConfigurationError {
                details: format!("root class '{}' not declared in schema", schema.root_class),
            })?;

        let mut catalog = PathCatalog::default();
        let mut stack: Vec<String> = Vec::new();
        visit(schema, root, "", "", None, &mut stack, &mut catalog)?;
        Ok(catalog)
    }

    /// True for paths ending in the list-entity suffix `[]`.
    pub fn is_list_entity(&self, path: &str) -> bool {
        path.ends_with("[]")
    }

    /// True iff `path` is present in the catalog.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Identity field names declared for `path`, or an empty slice if unknown.
    pub fn id_fields(&self, path: &str) -> &[String] {
        self.id_fields_by_path
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Parent path of `path`. The root path is its own parent.
    pub fn parent_path(&self, path: &str) -> Option<&str> {
        self.parent_of.get(path).map(String::as_str)
    }

    /// All direct child paths of `path`, in catalog order.
    pub fn children_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.paths
            .iter()
            .filter(move |p| p.as_str() != path && self.parent_of.get(p.as_str()).map(String::as_str) == Some(path))
            .map(String::as_str)
    }

    /// Paths the catalog declares "required" in the weak sense of appearing
    /// at all in the schema (used by the quality gate's per-path counts).
    pub fn non_root_paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str).filter(|p| !p.is_empty())
    }
}

#[allow(clippy::too_many_arguments)]
fn visit(
    schema: &Schema,
    class: &SchemaClass,
    path: &str,
    parent_path: &str,
    edge_label: Option<&str>,
    stack: &mut Vec<String>,
    catalog: &mut PathCatalog,
) -> Result<(), CoreError> {
    if stack.iter().any(|c| c == &class.name) {
        return Err(CoreError::SchemaCycle {
            details: format!(
                "class '{}' revisited along path '{}' (ancestor chain: {})",
                class.name,
                path,
                stack.join(" -> ")
            ),
        });
    }
    stack.push(class.name.clone());

    catalog.paths.push(path.to_string());
    catalog
        .class_of
        .insert(path.to_string(), class.name.clone());
    catalog
        .id_fields_by_path
        .insert(path.to_string(), class.identity_fields.clone());
    catalog
        .parent_of
        .insert(path.to_string(), if path.is_empty() { String::new() } else { parent_path.to_string() });
    if let Some(label) = edge_label {
        catalog
            .edge_label_by_path
            .insert(path.to_string(), label.to_string());
    }

    // Sort edge fields lexicographically by name so the catalog is
    // independent of schema declaration order (spec.md §4.1 guarantee).
    let mut edge_fields: Vec<&SchemaField> = class
        .fields
        .iter()
        .filter(|f| matches!(f.kind, SchemaFieldKind::Edge { .. }))
        .collect();
    edge_fields.sort_by(|a, b| a.name.cmp(&b.name));

    for field in edge_fields {
        let SchemaFieldKind::Edge {
            target_class,
            many,
            label,
        } = &field.kind
        else {
            unreachable!("filtered to Edge kind above")
        };

        let target = schema
            .classes
            .get(target_class)
            .ok_or_else(|| CoreError::ConfigurationError {
                details: format!(
                    "edge field '{}' targets undeclared class '{}'",
                    field.name, target_class
                ),
            })?;

        let segment = if *many {
            format!("{}[]", field.name)
        } else {
            field.name.clone()
        };
        let child_path = if path.is_empty() {
            segment
        } else {
            format!("{path}.{segment}")
        };

        let inherited_label = label.clone().unwrap_or_else(|| field.name.clone());
        visit(
            schema,
            target,
            &child_path,
            path,
            Some(&inherited_label),
            stack,
            catalog,
        )?;
    }

    stack.pop();
    Ok(())
}
