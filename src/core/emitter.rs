//! TC-008: Plan emission.
//!
//! Assembles the immutable `ProvisioningPlan`: resolved properties per step in
//! provisioning order, the reversed teardown order, permission grants and the
//! named outputs. Every reference must have been accounted for by the
//! resolver; a stray one is a hard error, never a silent placeholder.

use super::error::{CompileError, Result};
use super::graph::DependencyGraph;
use super::planner;
use super::resolver::Resolution;
use super::topology::Topology;
use super::types::{
    DeferredRef, OutputDecl, OutputValue, PermissionEdge, PlanStep, ProvisioningPlan,
    ResolvedValue, ResourceKind,
};
use crate::provenance::hasher;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Build the provisioning plan from the outputs of the earlier stages.
pub fn emit(
    topology: &Topology,
    resolution: &Resolution,
    graph: &DependencyGraph,
    order: &[String],
    permissions: &[PermissionEdge],
    outputs: &IndexMap<String, OutputDecl>,
) -> Result<ProvisioningPlan> {
    let mut steps = Vec::with_capacity(order.len());
    for id in order {
        let node = topology
            .get(id)
            .ok_or_else(|| CompileError::DanglingReference {
                from: "plan".to_string(),
                to: id.clone(),
            })?;
        for r in node.references() {
            if resolution.get(&r.target).is_none() {
                return Err(CompileError::UnresolvedReference {
                    node: id.clone(),
                    reference: r.target.to_string(),
                });
            }
        }
        let properties = resolution
            .properties(id)
            .cloned()
            .ok_or_else(|| CompileError::UnresolvedReference {
                node: id.clone(),
                reference: format!("{}.*", id),
            })?;
        steps.push(PlanStep {
            id: id.clone(),
            kind: node.kind,
            depends_on: graph
                .dependencies(id)
                .into_iter()
                .map(str::to_string)
                .collect(),
            properties,
        });
    }

    let mut plan = ProvisioningPlan {
        name: topology.name.clone(),
        description: topology.description.clone(),
        tags: topology.tags.clone(),
        provisioning_order: order.to_vec(),
        teardown_order: planner::teardown_order(order),
        steps,
        permissions: permissions.to_vec(),
        outputs: bind_outputs(topology, resolution, outputs)?,
        fingerprint: String::new(),
    };
    plan.fingerprint = fingerprint(&plan)?;
    Ok(plan)
}

/// Declared outputs plus every `output` node, keyed by name.
fn bind_outputs(
    topology: &Topology,
    resolution: &Resolution,
    declared: &IndexMap<String, OutputDecl>,
) -> Result<BTreeMap<String, OutputValue>> {
    let mut outputs = BTreeMap::new();

    for (name, decl) in declared {
        let unknown = || CompileError::UnknownOutput {
            name: name.clone(),
            source_ref: decl.value.clone(),
        };
        let source = DeferredRef::parse(&decl.value).map_err(|_| unknown())?;
        let Some(value) = resolution.attribute(topology, &source) else {
            return Err(unknown());
        };
        outputs.insert(
            name.clone(),
            OutputValue {
                value,
                description: decl.description.clone(),
                export_name: decl.export_name.clone(),
            },
        );
    }

    for node in topology.nodes().filter(|n| n.kind == ResourceKind::Output) {
        let props = resolution
            .properties(&node.id)
            .ok_or_else(|| CompileError::UnresolvedReference {
                node: node.id.clone(),
                reference: format!("{}.value", node.id),
            })?;
        let value = props
            .get("value")
            .cloned()
            .ok_or_else(|| CompileError::invalid(&node.id, "value", "output has no value"))?;
        let output = OutputValue {
            value,
            description: text(props, "description"),
            export_name: text(props, "export_name"),
        };
        if outputs.insert(node.id.clone(), output).is_some() {
            return Err(CompileError::DuplicateNode {
                node: node.id.clone(),
            });
        }
    }

    Ok(outputs)
}

fn text(props: &BTreeMap<String, ResolvedValue>, key: &str) -> Option<String> {
    props
        .get(key)
        .and_then(ResolvedValue::as_str)
        .map(str::to_string)
}

/// BLAKE3 over the plan serialized with an empty fingerprint.
fn fingerprint(plan: &ProvisioningPlan) -> Result<String> {
    let body = serde_json::to_string(plan)
        .map_err(|e| CompileError::Parse(format!("cannot serialize plan: {}", e)))?;
    Ok(hasher::hash_string(&body))
}
