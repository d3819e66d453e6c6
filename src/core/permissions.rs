//! TC-007: Least-privilege permission derivation.
//!
//! Grants come only from the access level declared on a reference. An
//! identifier reference grants nothing. Grants are plan metadata and never
//! feed back into ordering.

use super::error::{CompileError, Result};
use super::graph::DependencyGraph;
use super::types::{Access, PermissionAction, PermissionEdge, ResourceKind};
use std::collections::BTreeSet;

/// Actions an access level needs, narrowest first.
fn actions(access: Access) -> &'static [PermissionAction] {
    match access {
        Access::Identifier => &[],
        Access::Read => &[PermissionAction::Read],
        Access::ReadWrite => &[PermissionAction::Read, PermissionAction::Write],
        Access::Invoke => &[PermissionAction::Invoke],
    }
}

fn access_name(access: Access) -> &'static str {
    match access {
        Access::Identifier => "identifier",
        Access::Read => "read",
        Access::ReadWrite => "read_write",
        Access::Invoke => "invoke",
    }
}

/// Whether `kind` can be the grantor of `access`.
fn grantable(kind: ResourceKind, access: Access) -> bool {
    match access {
        Access::Identifier => true,
        Access::Read | Access::ReadWrite => kind.holds_data(),
        Access::Invoke => kind == ResourceKind::Function,
    }
}

/// Derive every grant implied by reference edges, sorted and deduplicated.
pub fn derive(graph: &DependencyGraph) -> Result<Vec<PermissionEdge>> {
    let mut grants = BTreeSet::new();

    for edge in graph.reference_edges() {
        let access = edge.access.unwrap_or_default();
        if access == Access::Identifier {
            continue;
        }
        let kind = graph
            .kind(&edge.to)
            .ok_or_else(|| CompileError::DanglingReference {
                from: edge.from.clone(),
                to: edge.to.clone(),
            })?;
        if !grantable(kind, access) {
            return Err(CompileError::invalid(
                &edge.from,
                edge.via.as_deref().unwrap_or("ref"),
                format!(
                    "{} access cannot be granted on '{}' ({})",
                    access_name(access),
                    edge.to,
                    kind
                ),
            ));
        }
        for &action in actions(access) {
            grants.insert(PermissionEdge {
                grantor: edge.to.clone(),
                grantee: edge.from.clone(),
                action,
            });
        }
    }

    tracing::debug!(grants = grants.len(), "permissions derived");
    Ok(grants.into_iter().collect())
}
