//! TC-009: YAML parsing and validation.
//!
//! Parses topology.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Resource ids are well formed and kinds are known
//! - depends_on references must exist
//! - Outputs name an existing `Node.attribute`

use super::error::{CompileError, Result};
use super::schema;
use super::topology::Topology;
use super::types::{DeferredRef, ResourceKind, TopologyConfig};
use std::path::Path;

const ID_RULE: &str = "must start with a letter and contain only letters, digits, '-' or '_'";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a topology.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<TopologyConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CompileError::Io(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&content)
}

/// Parse a topology.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<TopologyConfig> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| CompileError::Parse(format!("YAML parse error: {}", e)))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
///
/// Property schemas are checked later, by [`build_topology`].
pub fn validate_config(config: &TopologyConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    } else if !schema::is_valid_node_id(&config.name) {
        push(format!("name '{}' {}", config.name, ID_RULE));
    }

    for (id, resource) in &config.resources {
        if !schema::is_valid_node_id(id) {
            push(format!("resource id '{}' {}", id, ID_RULE));
        }
        if resource.kind.parse::<ResourceKind>().is_err() {
            push(format!("resource '{}' has unknown type '{}'", id, resource.kind));
        }
        for dep in &resource.depends_on {
            if !config.resources.contains_key(dep) {
                push(format!("resource '{}' depends on unknown resource '{}'", id, dep));
            }
            if dep == id {
                push(format!("resource '{}' depends on itself", id));
            }
        }
    }

    for (name, output) in &config.outputs {
        match DeferredRef::parse(&output.value) {
            Ok(r) if !config.resources.contains_key(&r.source) => push(format!(
                "output '{}' references unknown resource '{}'",
                name, r.source
            )),
            Ok(_) => {}
            Err(e) => push(format!("output '{}': {}", name, e)),
        }
        if config.resources.contains_key(name) {
            push(format!("output '{}' collides with a resource id", name));
        }
    }

    errors
}

/// Declare every resource of a parsed config into a fresh [`Topology`].
pub fn build_topology(config: &TopologyConfig) -> Result<Topology> {
    let mut topology = Topology::new(&config.name);
    topology.description = config.description.clone();
    topology.tags = config.tags.clone();

    for (id, resource) in &config.resources {
        topology.declare(id, &resource.kind, resource.properties.clone())?;
        for dep in &resource.depends_on {
            topology.add_dependency(id, dep)?;
        }
    }
    Ok(topology)
}
