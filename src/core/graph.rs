//! TC-005: Dependency graph construction.
//!
//! Edges point from the dependent node to the node it needs. References
//! become `reference` edges carrying the declared access level; explicit
//! hints, parent containers and association sides become `dependency` edges.
//! The graph is computed once here and never re-derived downstream.

use super::error::{CompileError, Result};
use super::schema::{self, PropertyType};
use super::topology::Topology;
use super::types::{Edge, EdgeKind, PermissionEdge, PropertyValue, ResourceKind};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Nodes in declaration order plus the dependency and reference edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    kinds: Vec<ResourceKind>,
    index: FxHashMap<String, usize>,
    edges: BTreeSet<Edge>,
    /// `needs[i]`: nodes `i` must wait for.
    needs: Vec<BTreeSet<usize>>,
    /// `needed_by[i]`: nodes waiting for `i`.
    needed_by: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Node ids in declaration order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn kind(&self, id: &str) -> Option<ResourceKind> {
        self.index_of(id).map(|i| self.kinds[i])
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn reference_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.kind == EdgeKind::Reference)
    }

    pub(crate) fn needs_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.needs[index]
    }

    pub(crate) fn needed_by_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.needed_by[index]
    }

    /// Nodes `id` waits for, in declaration order.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| self.names(&self.needs[i]))
            .unwrap_or_default()
    }

    /// Nodes waiting for `id`, in declaration order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| self.names(&self.needed_by[i]))
            .unwrap_or_default()
    }

    fn names(&self, indices: &BTreeSet<usize>) -> Vec<&str> {
        indices.iter().map(|&i| self.ids[i].as_str()).collect()
    }

    fn add_edge(&mut self, edge: Edge) -> Result<()> {
        let from = self.resolve(&edge.from, &edge.from)?;
        let to = self.resolve(&edge.from, &edge.to)?;
        self.needs[from].insert(to);
        self.needed_by[to].insert(from);
        self.edges.insert(edge);
        Ok(())
    }

    fn resolve(&self, from: &str, id: &str) -> Result<usize> {
        self.index_of(id)
            .ok_or_else(|| CompileError::DanglingReference {
                from: from.to_string(),
                to: id.to_string(),
            })
    }

    /// Graphviz rendering; permission edges are drawn dashed.
    pub fn to_dot(&self, name: &str, permissions: &[PermissionEdge]) -> String {
        let mut out = String::new();
        out.push_str(&format!("digraph \"{}\" {{\n", name));
        out.push_str("  rankdir=BT;\n");
        for (id, kind) in self.ids.iter().zip(&self.kinds) {
            out.push_str(&format!("  \"{}\" [label=\"{}\\n{}\"];\n", id, id, kind));
        }
        for edge in &self.edges {
            let style = match edge.kind {
                EdgeKind::Dependency => "solid",
                _ => "bold",
            };
            let label = edge.via.as_deref().unwrap_or("");
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}, label=\"{}\"];\n",
                edge.from, edge.to, style, label
            ));
        }
        for grant in permissions {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [style=dashed, color=darkgreen, label=\"{}\"];\n",
                grant.grantor, grant.grantee, grant.action
            ));
        }
        out.push_str("}\n");
        out
    }
}

/// Build the dependency graph of a topology.
pub fn build(topology: &Topology) -> Result<DependencyGraph> {
    let n = topology.len();
    let mut graph = DependencyGraph {
        ids: Vec::with_capacity(n),
        kinds: Vec::with_capacity(n),
        index: FxHashMap::default(),
        edges: BTreeSet::new(),
        needs: vec![BTreeSet::new(); n],
        needed_by: vec![BTreeSet::new(); n],
    };
    for (i, node) in topology.nodes().enumerate() {
        graph.ids.push(node.id.clone());
        graph.kinds.push(node.kind);
        graph.index.insert(node.id.clone(), i);
    }

    for node in topology.nodes() {
        for hint in &node.depends_on {
            graph.add_edge(Edge {
                from: node.id.clone(),
                to: hint.clone(),
                kind: EdgeKind::Dependency,
                access: None,
                via: Some("depends_on".to_string()),
            })?;
        }

        for (name, value) in &node.properties {
            let node_kinds = match schema::property_spec(node.kind, name).map(|s| s.ty) {
                Some(PropertyType::Node(kinds)) => Some(kinds),
                _ => None,
            };

            // Parent containers and association sides named by plain id.
            if let (Some(kinds), PropertyValue::String(target)) = (node_kinds, value) {
                graph.add_edge(Edge {
                    from: node.id.clone(),
                    to: target.clone(),
                    kind: EdgeKind::Dependency,
                    access: None,
                    via: Some(name.clone()),
                })?;
                check_target_kind(&graph, &node.id, name, target, kinds)?;
            }

            let mut refs = Vec::new();
            value.collect_refs(&mut refs);
            for r in refs {
                graph.add_edge(Edge {
                    from: node.id.clone(),
                    to: r.target.source.clone(),
                    kind: EdgeKind::Reference,
                    access: Some(r.access),
                    via: Some(name.clone()),
                })?;
                if let Some(kinds) = node_kinds {
                    check_target_kind(&graph, &node.id, name, &r.target.source, kinds)?;
                }
            }
        }
    }

    Ok(graph)
}

fn check_target_kind(
    graph: &DependencyGraph,
    node: &str,
    property: &str,
    target: &str,
    allowed: &[ResourceKind],
) -> Result<()> {
    match graph.kind(target) {
        Some(kind) if allowed.contains(&kind) => Ok(()),
        Some(kind) => {
            let expected = allowed
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(" or ");
            Err(CompileError::invalid(
                node,
                property,
                format!("'{}' is a {}, expected {}", target, kind, expected),
            ))
        }
        None => Err(CompileError::DanglingReference {
            from: node.to_string(),
            to: target.to_string(),
        }),
    }
}
