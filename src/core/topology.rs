//! TC-003: Topology ownership and node declaration.
//!
//! A `Topology` owns every declared node in declaration order. Declaration
//! checks the kind and the property schema; references may point forward, so
//! unknown ids are reported by [`Topology::check_references`] once the whole
//! topology is declared.

use super::error::{CompileError, Result};
use super::schema::{self, PropertyType};
use super::types::{Access, DeferredRef, PropertyValue, Reference, ResourceKind, ResourceNode};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// `${Node.attribute}` shorthand for an identifier reference.
static REF_SHORTHAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([A-Za-z][A-Za-z0-9_-]*)\.([A-Za-z][A-Za-z0-9_]*)\}$")
        .expect("reference shorthand pattern is valid")
});

/// The declared set of nodes for one deployable unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    nodes: IndexMap<String, ResourceNode>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a node. Returns its id.
    pub fn declare(
        &mut self,
        id: &str,
        kind: &str,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<String> {
        if !schema::is_valid_node_id(id) {
            return Err(CompileError::invalid(
                id,
                "id",
                "node ids start with a letter and contain only letters, digits, '-' or '_'",
            ));
        }
        if self.nodes.contains_key(id) {
            return Err(CompileError::DuplicateNode {
                node: id.to_string(),
            });
        }
        let kind: ResourceKind = kind.parse().map_err(|_| CompileError::UnknownKind {
            node: id.to_string(),
            kind: kind.to_string(),
        })?;

        let properties = properties
            .into_iter()
            .map(|(name, value)| {
                let value = normalize(value)
                    .map_err(|reason| CompileError::invalid(id, &name, reason))?;
                Ok((name, value))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        check_properties(id, kind, &properties)?;

        self.nodes.insert(
            id.to_string(),
            ResourceNode {
                id: id.to_string(),
                kind,
                properties,
                depends_on: BTreeSet::new(),
            },
        );
        Ok(id.to_string())
    }

    /// Add an explicit ordering hint: `node` is provisioned after `on`.
    pub fn add_dependency(&mut self, node: &str, on: &str) -> Result<()> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| {
                CompileError::invalid(node, "depends_on", "hint added to an undeclared node")
            })?;
        entry.depends_on.insert(on.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Declaration index of a node.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every `depends_on` hint, reference source and node-typed property must
    /// name a declared node.
    pub fn check_references(&self) -> Result<()> {
        for node in self.nodes.values() {
            for target in referenced_ids(node) {
                if !self.nodes.contains_key(target) {
                    return Err(CompileError::DanglingReference {
                        from: node.id.clone(),
                        to: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Ids a node points at through hints, references and node-typed properties.
fn referenced_ids(node: &ResourceNode) -> Vec<&str> {
    let mut ids: Vec<&str> = node.depends_on.iter().map(String::as_str).collect();
    ids.extend(node.references().iter().map(|r| r.target.source.as_str()));
    for (name, value) in &node.properties {
        let is_node = schema::property_spec(node.kind, name)
            .is_some_and(|spec| matches!(spec.ty, PropertyType::Node(_)));
        if let (true, PropertyValue::String(id)) = (is_node, value) {
            ids.push(id);
        }
    }
    ids
}

/// Rewrite `${Node.attr}` strings and `{ ref: .. }` maps into references,
/// recursively. Anything shaped like a reference that does not parse as one
/// is rejected rather than kept as literal data.
fn normalize(value: PropertyValue) -> std::result::Result<PropertyValue, String> {
    match value {
        PropertyValue::String(s) => {
            if let Some(caps) = REF_SHORTHAND.captures(&s) {
                return Ok(PropertyValue::Ref(Reference::new(
                    DeferredRef::new(&caps[1], &caps[2]),
                    Access::Identifier,
                )));
            }
            if s.starts_with("${") && s.ends_with('}') {
                return Err(format!("malformed reference '{}': expected ${{Node.attr}}", s));
            }
            Ok(PropertyValue::String(s))
        }
        PropertyValue::List(items) => items
            .into_iter()
            .map(normalize)
            .collect::<std::result::Result<_, _>>()
            .map(PropertyValue::List),
        PropertyValue::Map(map) if map.contains_key("ref") => {
            let raw = serde_json::to_value(&map).map_err(|e| e.to_string())?;
            serde_json::from_value::<Reference>(raw)
                .map(PropertyValue::Ref)
                .map_err(|e| format!("malformed reference: {}", e))
        }
        PropertyValue::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| normalize(v).map(|v| (k, v)))
            .collect::<std::result::Result<_, _>>()
            .map(PropertyValue::Map),
        other => Ok(other),
    }
}

fn check_properties(
    id: &str,
    kind: ResourceKind,
    properties: &BTreeMap<String, PropertyValue>,
) -> Result<()> {
    for (name, value) in properties {
        let spec = schema::property_spec(kind, name).ok_or_else(|| {
            CompileError::invalid(id, name, format!("not a property of {}", kind))
        })?;
        schema::check_literal(spec.ty, value)
            .map_err(|reason| CompileError::invalid(id, name, reason))?;
    }
    for spec in schema::properties(kind) {
        if spec.required && !properties.contains_key(spec.name) {
            return Err(CompileError::invalid(
                id,
                spec.name,
                format!("required property of {} is missing", kind),
            ));
        }
    }
    Ok(())
}
