//! TC-001: Topology data model.
//!
//! Defines the YAML declaration schema, resource nodes with literal or deferred
//! property values, graph edges, permission grants, and the emitted
//! provisioning plan. Everything that reaches the plan uses ordered maps so
//! serialization is byte-stable across runs.

use indexmap::IndexMap;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Declaration file (topology.yaml)
// ============================================================================

/// Root declaration: one deployable unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TopologyConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Topology name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Tags stamped on every emitted step
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDecl>,

    /// Named output values
    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceDecl {
    /// Resource kind (network, subnet, table, function, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Kind-specific properties
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,

    /// Explicit ordering hints
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A declared output: `value` names a `Node.attribute`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputDecl {
    pub value: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub export_name: Option<String>,
}

// ============================================================================
// Resource kinds
// ============================================================================

/// Closed set of resource categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnet,
    Gateway,
    GatewayAttachment,
    RouteTable,
    Route,
    RouteTableAssociation,
    SecurityGroup,
    SecurityRule,
    LoadBalancer,
    Listener,
    TargetGroup,
    Database,
    Table,
    Function,
    LogGroup,
    Api,
    ApiResource,
    ApiMethod,
    Output,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 20] = [
        Self::Network,
        Self::Subnet,
        Self::Gateway,
        Self::GatewayAttachment,
        Self::RouteTable,
        Self::Route,
        Self::RouteTableAssociation,
        Self::SecurityGroup,
        Self::SecurityRule,
        Self::LoadBalancer,
        Self::Listener,
        Self::TargetGroup,
        Self::Database,
        Self::Table,
        Self::Function,
        Self::LogGroup,
        Self::Api,
        Self::ApiResource,
        Self::ApiMethod,
        Self::Output,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Gateway => "gateway",
            Self::GatewayAttachment => "gateway-attachment",
            Self::RouteTable => "route-table",
            Self::Route => "route",
            Self::RouteTableAssociation => "route-table-association",
            Self::SecurityGroup => "security-group",
            Self::SecurityRule => "security-rule",
            Self::LoadBalancer => "load-balancer",
            Self::Listener => "listener",
            Self::TargetGroup => "target-group",
            Self::Database => "database",
            Self::Table => "table",
            Self::Function => "function",
            Self::LogGroup => "log-group",
            Self::Api => "api",
            Self::ApiResource => "api-resource",
            Self::ApiMethod => "api-method",
            Self::Output => "output",
        }
    }

    /// Kinds that hold data a grantee can be given read/write access to.
    pub fn holds_data(self) -> bool {
        matches!(self, Self::Table | Self::Database | Self::LogGroup)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

// ============================================================================
// Property values and references
// ============================================================================

/// How the referencing node uses the referenced value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// The value only (a name, an id). No grant.
    #[default]
    Identifier,
    Read,
    ReadWrite,
    Invoke,
}

/// Placeholder for `source.attribute`, written as `"Node.attribute"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeferredRef {
    pub source: String,
    pub attribute: String,
}

impl DeferredRef {
    pub fn new(source: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `"Node.attribute"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('.') {
            Some((source, attribute))
                if !source.is_empty() && !attribute.is_empty() && !attribute.contains('.') =>
            {
                Ok(Self::new(source, attribute))
            }
            _ => Err(format!("invalid reference '{}', expected Node.attribute", s)),
        }
    }
}

impl fmt::Display for DeferredRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.attribute)
    }
}

impl TryFrom<String> for DeferredRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DeferredRef> for String {
    fn from(r: DeferredRef) -> Self {
        r.to_string()
    }
}

impl JsonSchema for DeferredRef {
    fn schema_name() -> String {
        "DeferredRef".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <String as JsonSchema>::json_schema(gen)
    }
}

/// A property that points at another node's attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub target: DeferredRef,

    #[serde(default)]
    pub access: Access,
}

impl Reference {
    pub fn new(target: DeferredRef, access: Access) -> Self {
        Self { target, access }
    }
}

/// A declared property value: a literal or a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    String(String),
    Ref(Reference),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Identifier-access reference to `source.attribute`.
    pub fn reference(source: &str, attribute: &str) -> Self {
        Self::Ref(Reference::new(DeferredRef::new(source, attribute), Access::Identifier))
    }

    pub fn reference_with(source: &str, attribute: &str, access: Access) -> Self {
        Self::Ref(Reference::new(DeferredRef::new(source, attribute), access))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every reference in this value, depth-first.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Self::Map(map) => map.values().for_each(|v| v.collect_refs(out)),
            Self::Bool(_) | Self::Integer(_) | Self::String(_) => {}
        }
    }
}

/// A property value after reference resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Bool(bool),
    Integer(i64),
    String(String),
    /// Known only after provisioning; the executor substitutes it.
    Deferred { deferred: DeferredRef },
    List(Vec<ResolvedValue>),
    Map(BTreeMap<String, ResolvedValue>),
}

impl ResolvedValue {
    pub fn deferred(r: DeferredRef) -> Self {
        Self::Deferred { deferred: r }
    }

    /// True when no placeholder remains anywhere inside the value.
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Deferred { .. } => false,
            Self::List(items) => items.iter().all(Self::is_concrete),
            Self::Map(map) => map.values().all(Self::is_concrete),
            Self::Bool(_) | Self::Integer(_) | Self::String(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Nodes and edges
// ============================================================================

/// A single declared infrastructure unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Explicit ordering hints; the full set is computed by the graph builder.
    pub depends_on: BTreeSet<String>,
}

impl ResourceNode {
    /// Every reference in this node's properties, in property-name order.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_refs(&mut out);
        }
        out
    }
}

/// Edge category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Dependency,
    Reference,
    Permission,
}

/// Directed edge; `from` needs `to` to exist first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    /// Access declared on a reference edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,
    /// Property (for references) or attribute the edge came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

/// Action permitted by a grant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    Read,
    Write,
    Invoke,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Invoke => write!(f, "invoke"),
        }
    }
}

/// Least-privilege grant, directed grantor → grantee.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionEdge {
    pub grantor: String,
    pub grantee: String,
    pub action: PermissionAction,
}

impl PermissionEdge {
    pub fn as_edge(&self) -> Edge {
        Edge {
            from: self.grantor.clone(),
            to: self.grantee.clone(),
            kind: EdgeKind::Permission,
            access: None,
            via: Some(self.action.to_string()),
        }
    }
}

// ============================================================================
// Provisioning plan
// ============================================================================

/// One node in the plan with its resolved properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub kind: ResourceKind,
    pub depends_on: Vec<String>,
    pub properties: BTreeMap<String, ResolvedValue>,
}

/// A named output bound to a concrete value or a deferred placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: ResolvedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

/// Final artifact handed to an external executor. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) provisioning_order: Vec<String>,
    pub(crate) teardown_order: Vec<String>,
    pub(crate) steps: Vec<PlanStep>,
    pub(crate) permissions: Vec<PermissionEdge>,
    pub(crate) outputs: BTreeMap<String, OutputValue>,
    pub(crate) fingerprint: String,
}

impl ProvisioningPlan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn provisioning_order(&self) -> &[String] {
        &self.provisioning_order
    }

    pub fn teardown_order(&self) -> &[String] {
        &self.teardown_order
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn permissions(&self) -> &[PermissionEdge] {
        &self.permissions
    }

    pub fn outputs(&self) -> &BTreeMap<String, OutputValue> {
        &self.outputs
    }

    /// BLAKE3 digest of the plan body (`"blake3:{hex}"`).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Pretty JSON, stable across runs.
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("JSON serialize error: {}", e))
    }

    pub fn to_yaml(&self) -> Result<String, String> {
        serde_yaml_ng::to_string(self).map_err(|e| format!("YAML serialize error: {}", e))
    }
}

// ============================================================================
// Tests
// ============================================================================
