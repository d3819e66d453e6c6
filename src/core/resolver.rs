//! TC-004: Reference resolution.
//!
//! Fixed-point passes over the topology in declaration order. A node settles
//! once every node it references has settled; its references are then
//! replaced by attribute values derived from the source node's kind and
//! resolved properties. Provisioning-only attributes stay as deferred
//! placeholders for the executor. A pass that settles nothing means the
//! remaining nodes reference each other in a cycle.

use super::error::{CompileError, Result};
use super::schema;
use super::topology::Topology;
use super::types::{DeferredRef, PropertyValue, ResolvedValue, ResourceNode};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Result of resolving every reference in a topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    refs: BTreeMap<DeferredRef, ResolvedValue>,
    properties: BTreeMap<String, BTreeMap<String, ResolvedValue>>,
    passes: usize,
}

impl Resolution {
    /// Value a reference resolved to (concrete or still deferred).
    pub fn get(&self, r: &DeferredRef) -> Option<&ResolvedValue> {
        self.refs.get(r)
    }

    /// Resolved properties of a node.
    pub fn properties(&self, node: &str) -> Option<&BTreeMap<String, ResolvedValue>> {
        self.properties.get(node)
    }

    /// Every reference and what it resolved to.
    pub fn refs(&self) -> impl Iterator<Item = (&DeferredRef, &ResolvedValue)> {
        self.refs.iter()
    }

    /// References that still wait on provisioning.
    pub fn pending(&self) -> impl Iterator<Item = &DeferredRef> {
        self.refs
            .iter()
            .filter(|(_, v)| !v.is_concrete())
            .map(|(r, _)| r)
    }

    /// Derive any attribute of a settled node, referenced or not.
    pub fn attribute(&self, topology: &Topology, r: &DeferredRef) -> Option<ResolvedValue> {
        let node = topology.get(&r.source)?;
        let props = self.properties.get(&r.source)?;
        schema::derive_attribute(node.kind, &node.id, &r.attribute, props)
    }

    /// Number of fixed-point passes it took to converge.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

/// Resolve every reference in the topology.
pub fn resolve(topology: &Topology) -> Result<Resolution> {
    topology.check_references()?;

    let mut resolution = Resolution::default();
    let mut pending: Vec<&ResourceNode> = topology.nodes().collect();

    while !pending.is_empty() {
        resolution.passes += 1;
        let before = pending.len();
        let mut stuck = Vec::new();

        for node in pending {
            let ready = node.references().iter().all(|r| {
                r.target.source != node.id && resolution.properties.contains_key(&r.target.source)
            });
            if !ready {
                stuck.push(node);
                continue;
            }
            let props = resolve_node(topology, node, &mut resolution)?;
            resolution.properties.insert(node.id.clone(), props);
        }

        if stuck.len() == before {
            return Err(CompileError::CyclicReference {
                nodes: find_reference_cycle(&stuck),
            });
        }
        pending = stuck;
    }

    debug!(
        passes = resolution.passes,
        refs = resolution.refs.len(),
        pending = resolution.pending().count(),
        "references resolved"
    );
    Ok(resolution)
}

fn resolve_node(
    topology: &Topology,
    node: &ResourceNode,
    resolution: &mut Resolution,
) -> Result<BTreeMap<String, ResolvedValue>> {
    let mut out = BTreeMap::new();
    for (name, value) in &node.properties {
        let resolved = resolve_value(topology, node, name, value, resolution)?;
        let spec = schema::property_spec(node.kind, name);
        if let (Some(spec), Some(literal)) = (spec, to_literal(&resolved)) {
            schema::check_literal(spec.ty, &literal).map_err(|reason| {
                CompileError::invalid(&node.id, name, format!("resolved value: {}", reason))
            })?;
        }
        out.insert(name.clone(), resolved);
    }
    Ok(out)
}

fn resolve_value(
    topology: &Topology,
    node: &ResourceNode,
    property: &str,
    value: &PropertyValue,
    resolution: &mut Resolution,
) -> Result<ResolvedValue> {
    Ok(match value {
        PropertyValue::Bool(b) => ResolvedValue::Bool(*b),
        PropertyValue::Integer(i) => ResolvedValue::Integer(*i),
        PropertyValue::String(s) => ResolvedValue::String(s.clone()),
        PropertyValue::List(items) => ResolvedValue::List(
            items
                .iter()
                .map(|v| resolve_value(topology, node, property, v, resolution))
                .collect::<Result<_>>()?,
        ),
        PropertyValue::Map(map) => ResolvedValue::Map(
            map.iter()
                .map(|(k, v)| {
                    let v = resolve_value(topology, node, property, v, resolution)?;
                    Ok((k.clone(), v))
                })
                .collect::<Result<_>>()?,
        ),
        PropertyValue::Ref(r) => {
            let value = resolution.attribute(topology, &r.target).ok_or_else(|| {
                let kind = topology
                    .get(&r.target.source)
                    .map(|n| n.kind.to_string())
                    .unwrap_or_default();
                CompileError::invalid(
                    &node.id,
                    property,
                    format!(
                        "{} ({}) has no attribute '{}'",
                        r.target.source, kind, r.target.attribute
                    ),
                )
            })?;
            resolution.refs.insert(r.target.clone(), value.clone());
            value
        }
    })
}

/// Concrete scalar as a literal, for re-checking against the schema.
fn to_literal(value: &ResolvedValue) -> Option<PropertyValue> {
    match value {
        ResolvedValue::Bool(b) => Some(PropertyValue::Bool(*b)),
        ResolvedValue::Integer(i) => Some(PropertyValue::Integer(*i)),
        ResolvedValue::String(s) => Some(PropertyValue::String(s.clone())),
        _ => None,
    }
}

/// Walk stuck nodes along stuck references until one repeats; the repeated
/// segment is the cycle.
fn find_reference_cycle(stuck: &[&ResourceNode]) -> Vec<String> {
    let ids: BTreeSet<&str> = stuck.iter().map(|n| n.id.as_str()).collect();
    let by_id: BTreeMap<&str, &ResourceNode> =
        stuck.iter().map(|n| (n.id.as_str(), *n)).collect();

    let Some(first) = stuck.first() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = Vec::new();
    let mut current = first.id.as_str();
    loop {
        if let Some(pos) = path.iter().position(|id| *id == current) {
            return path[pos..].iter().map(|s| s.to_string()).collect();
        }
        path.push(current);
        let next = by_id[current]
            .references()
            .into_iter()
            .map(|r| r.target.source.as_str())
            .find(|src| ids.contains(src));
        match next {
            Some(n) => current = n,
            None => return path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Access;
    use proptest::prelude::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> BTreeMap<String, PropertyValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn prop(key: &str, value: &str) -> BTreeMap<String, PropertyValue> {
        props(&[(key, PropertyValue::str(value))])
    }

    fn network(topo: &mut Topology, id: &str, cidr: &str) {
        topo.declare(id, "network", prop("cidr", cidr)).unwrap();
    }

    fn output(topo: &mut Topology, id: &str, value: PropertyValue) {
        topo.declare(id, "output", props(&[("value", value)]))
            .unwrap();
    }

    #[test]
    fn test_tc004_derivable_attribute_resolves() {
        let mut topo = Topology::new("t");
        network(&mut topo, "Net", "10.0.0.0/16");
        topo.declare(
            "Sub",
            "subnet",
            props(&[
                ("network", PropertyValue::str("Net")),
                ("cidr", PropertyValue::str("10.0.1.0/24")),
            ]),
        )
        .unwrap();
        topo.declare("SG", "security-group", prop("network", "Net"))
            .unwrap();
        topo.declare(
            "Mysql",
            "security-rule",
            props(&[
                ("group", PropertyValue::str("SG")),
                ("protocol", PropertyValue::str("tcp")),
                ("port", PropertyValue::Integer(3306)),
                ("peer", PropertyValue::reference("Net", "cidr")),
            ]),
        )
        .unwrap();

        let res = resolve(&topo).unwrap();
        assert_eq!(
            res.get(&DeferredRef::new("Net", "cidr")),
            Some(&ResolvedValue::String("10.0.0.0/16".to_string()))
        );
        assert_eq!(
            res.properties("Mysql").unwrap()["peer"],
            ResolvedValue::String("10.0.0.0/16".to_string())
        );
        assert_eq!(res.pending().count(), 0);
    }

    #[test]
    fn test_tc004_provisioned_attribute_stays_deferred() {
        let mut topo = Topology::new("t");
        topo.declare("Table", "table", prop("partition_key", "id"))
            .unwrap();
        output(&mut topo, "Arn", PropertyValue::reference("Table", "arn"));

        let res = resolve(&topo).unwrap();
        let arn = DeferredRef::new("Table", "arn");
        assert_eq!(res.get(&arn), Some(&ResolvedValue::deferred(arn.clone())));
        assert_eq!(res.pending().collect::<Vec<_>>(), vec![&arn]);
    }

    #[test]
    fn test_tc004_forward_reference_needs_second_pass() {
        let mut topo = Topology::new("t");
        output(&mut topo, "Out", PropertyValue::reference("Net", "cidr"));
        network(&mut topo, "Net", "10.1.0.0/16");

        let res = resolve(&topo).unwrap();
        assert_eq!(res.passes(), 2);
        assert_eq!(
            res.properties("Out").unwrap()["value"],
            ResolvedValue::String("10.1.0.0/16".to_string())
        );
    }

    #[test]
    fn test_tc004_chained_deferred_collapses() {
        // Out2 -> Out1.value -> LB.publicAddress
        let mut topo = Topology::new("t");
        network(&mut topo, "Net", "10.0.0.0/16");
        topo.declare("LB", "load-balancer", prop("network", "Net"))
            .unwrap();
        let address = PropertyValue::reference("LB", "publicAddress");
        output(&mut topo, "Out1", address);
        output(&mut topo, "Out2", PropertyValue::reference("Out1", "value"));

        let res = resolve(&topo).unwrap();
        assert_eq!(
            res.get(&DeferredRef::new("Out1", "value")),
            Some(&ResolvedValue::deferred(DeferredRef::new("LB", "publicAddress")))
        );
    }

    #[test]
    fn test_tc004_mutual_reference_is_cyclic() {
        let mut topo = Topology::new("t");
        output(&mut topo, "A", PropertyValue::reference("B", "value"));
        output(&mut topo, "B", PropertyValue::reference("A", "value"));

        let err = resolve(&topo).unwrap_err();
        let CompileError::CyclicReference { nodes } = err else {
            panic!("expected CyclicReference, got {:?}", err);
        };
        assert_eq!(nodes, vec!["A", "B"]);
    }

    #[test]
    fn test_tc004_cycle_excludes_bystanders() {
        let mut topo = Topology::new("t");
        output(&mut topo, "Watcher", PropertyValue::reference("A", "value"));
        output(&mut topo, "A", PropertyValue::reference("B", "value"));
        output(&mut topo, "B", PropertyValue::reference("A", "value"));

        let err = resolve(&topo).unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicReference {
                nodes: vec!["A".into(), "B".into()]
            }
        );
    }

    #[test]
    fn test_tc004_self_reference_is_cyclic() {
        let mut topo = Topology::new("t");
        output(&mut topo, "Loop", PropertyValue::reference("Loop", "value"));
        let err = resolve(&topo).unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicReference {
                nodes: vec!["Loop".into()]
            }
        );
    }

    #[test]
    fn test_tc004_unknown_attribute() {
        let mut topo = Topology::new("t");
        topo.declare("G", "gateway", BTreeMap::new()).unwrap();
        output(&mut topo, "Out", PropertyValue::reference("G", "cidr"));
        let err = resolve(&topo).unwrap_err();
        assert!(err.to_string().contains("has no attribute 'cidr'"));
    }

    #[test]
    fn test_tc004_dangling_reference() {
        let mut topo = Topology::new("t");
        output(&mut topo, "Out", PropertyValue::reference("Ghost", "id"));
        assert!(matches!(
            resolve(&topo).unwrap_err(),
            CompileError::DanglingReference { .. }
        ));
    }

    #[test]
    fn test_tc004_resolved_value_rechecked() {
        let mut topo = Topology::new("t");
        topo.declare("G", "gateway", prop("name", "igw")).unwrap();
        network(&mut topo, "Net", "10.0.0.0/16");
        topo.declare("Rt", "route-table", prop("network", "Net"))
            .unwrap();
        // Passes declaration (a reference), fails once it resolves to a non-CIDR.
        output(&mut topo, "Bad", PropertyValue::str("not-a-cidr"));
        topo.declare(
            "R",
            "route",
            props(&[
                ("route_table", PropertyValue::str("Rt")),
                ("destination", PropertyValue::reference("Bad", "value")),
                ("gateway", PropertyValue::str("G")),
            ]),
        )
        .unwrap();
        let err = resolve(&topo).unwrap_err();
        let CompileError::InvalidProperty { property, .. } = err else {
            panic!("expected invalid property, got {:?}", err);
        };
        assert_eq!(property, "destination");
    }

    #[test]
    fn test_tc004_nested_environment_reference() {
        let mut topo = Topology::new("t");
        topo.declare(
            "Table",
            "table",
            props(&[
                ("partition_key", PropertyValue::str("id")),
                ("table_name", PropertyValue::str("my-demo-table")),
            ]),
        )
        .unwrap();
        let env = BTreeMap::from([(
            "DYNAMODB".to_string(),
            PropertyValue::reference_with("Table", "tableName", Access::ReadWrite),
        )]);
        topo.declare(
            "Fn",
            "function",
            props(&[
                ("handler", PropertyValue::str("index.handler")),
                ("runtime", PropertyValue::str("nodejs18.x")),
                ("environment", PropertyValue::Map(env)),
            ]),
        )
        .unwrap();
        let res = resolve(&topo).unwrap();
        let ResolvedValue::Map(env) = &res.properties("Fn").unwrap()["environment"] else {
            panic!("environment should resolve to a map");
        };
        assert_eq!(
            env["DYNAMODB"],
            ResolvedValue::String("my-demo-table".to_string())
        );
    }

    proptest! {
        /// Outputs referencing networks or earlier outputs form an acyclic
        /// graph; every derivable reference must come out concrete.
        #[test]
        fn prop_tc004_acyclic_refs_fully_resolve(
            networks in 1usize..5,
            picks in proptest::collection::vec((any::<bool>(), any::<usize>()), 0..12),
        ) {
            let mut topo = Topology::new("p");
            for n in 0..networks {
                network(&mut topo, &format!("N{}", n), &format!("10.{}.0.0/16", n));
            }
            for (i, (to_network, pick)) in picks.iter().enumerate() {
                let value = if *to_network || i == 0 {
                    PropertyValue::reference(&format!("N{}", pick % networks), "cidr")
                } else {
                    PropertyValue::reference(&format!("O{}", pick % i), "value")
                };
                output(&mut topo, &format!("O{}", i), value);
            }
            let res = resolve(&topo).unwrap();
            prop_assert_eq!(res.pending().count(), 0);
            for node in topo.nodes() {
                prop_assert!(res.properties(&node.id).is_some());
            }
        }
    }
}
