//! TC-002: Per-kind property schemas and attribute derivation.
//!
//! Each resource kind has a fixed property schema (names, types, required
//! flags, structural role) and a fixed set of attributes other nodes may
//! reference. An attribute is either derivable from the node's own properties
//! or only known once the provider has created the resource.

use super::types::{DeferredRef, PropertyValue, ResolvedValue, ResourceKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NODE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("node id pattern is valid")
});

static CIDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$")
        .expect("cidr pattern is valid")
});

/// Literal type a property accepts. References are accepted for every type
/// and checked once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Bool,
    Cidr,
    Port,
    List,
    Map,
    OneOf(&'static [&'static str]),
    /// Id of another node of one of the listed kinds.
    Node(&'static [ResourceKind]),
    Any,
}

/// Structural role of a node-typed property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Plain,
    /// Attaches this node to a container (subnet → network).
    Parent,
    /// One side of an association node (listener → target group).
    Associate,
}

#[derive(Debug, Clone, Copy)]
pub struct PropertySpec {
    pub name: &'static str,
    pub ty: PropertyType,
    pub required: bool,
    pub role: Role,
}

/// Where an attribute's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSource {
    /// Generated by the provider (ids, ARNs, DNS names).
    Provisioned,
    /// Copied from a property; provisioned when the property is absent.
    Property(&'static str),
    /// Database listener port: explicit `port`, else the engine default.
    EnginePort,
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub source: AttributeSource,
}

const fn req(name: &'static str, ty: PropertyType) -> PropertySpec {
    PropertySpec {
        name,
        ty,
        required: true,
        role: Role::Plain,
    }
}

const fn opt(name: &'static str, ty: PropertyType) -> PropertySpec {
    PropertySpec {
        name,
        ty,
        required: false,
        role: Role::Plain,
    }
}

const fn parent(name: &'static str, kinds: &'static [ResourceKind]) -> PropertySpec {
    PropertySpec {
        name,
        ty: PropertyType::Node(kinds),
        required: true,
        role: Role::Parent,
    }
}

const fn assoc(name: &'static str, kinds: &'static [ResourceKind], required: bool) -> PropertySpec {
    PropertySpec {
        name,
        ty: PropertyType::Node(kinds),
        required,
        role: Role::Associate,
    }
}

const fn provisioned(name: &'static str) -> AttributeSpec {
    AttributeSpec {
        name,
        source: AttributeSource::Provisioned,
    }
}

const fn from_prop(name: &'static str, property: &'static str) -> AttributeSpec {
    AttributeSpec {
        name,
        source: AttributeSource::Property(property),
    }
}

use PropertyType as T;
use ResourceKind as K;

const NETWORK: &[K] = &[K::Network];
const PROTOCOLS: &[&str] = &["tcp", "udp", "icmp"];
const LB_PROTOCOLS: &[&str] = &["http", "https", "tcp"];
const ENGINES: &[&str] = &["mysql", "mariadb", "postgres"];
const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "ANY",
];
const KEY_TYPES: &[&str] = &["string", "number", "binary"];
const BILLING_MODES: &[&str] = &["pay_per_request", "provisioned"];
const REMOVAL_POLICIES: &[&str] = &["destroy", "retain", "snapshot"];
const API_PARENTS: &[K] = &[K::Api, K::ApiResource];

/// Property schema for a kind.
pub fn properties(kind: ResourceKind) -> &'static [PropertySpec] {
    match kind {
        K::Network => {
            const SPECS: &[PropertySpec] = &[
                req("cidr", T::Cidr),
                opt("name", T::String),
                opt("enable_dns", T::Bool),
                opt("max_azs", T::Integer),
                opt("nat_gateways", T::Integer),
            ];
            SPECS
        }
        K::Subnet => {
            const SPECS: &[PropertySpec] = &[
                parent("network", NETWORK),
                req("cidr", T::Cidr),
                opt("availability_zone", T::String),
                opt("public", T::Bool),
            ];
            SPECS
        }
        K::Gateway => {
            const SPECS: &[PropertySpec] = &[opt("name", T::String)];
            SPECS
        }
        K::GatewayAttachment => {
            const SPECS: &[PropertySpec] = &[
                assoc("network", NETWORK, true),
                assoc("gateway", &[K::Gateway], true),
            ];
            SPECS
        }
        K::RouteTable => {
            const SPECS: &[PropertySpec] = &[parent("network", NETWORK)];
            SPECS
        }
        K::Route => {
            const SPECS: &[PropertySpec] = &[
                parent("route_table", &[K::RouteTable]),
                req("destination", T::Cidr),
                assoc("gateway", &[K::Gateway], true),
            ];
            SPECS
        }
        K::RouteTableAssociation => {
            const SPECS: &[PropertySpec] = &[
                assoc("subnet", &[K::Subnet], true),
                assoc("route_table", &[K::RouteTable], true),
            ];
            SPECS
        }
        K::SecurityGroup => {
            const SPECS: &[PropertySpec] = &[
                parent("network", NETWORK),
                opt("description", T::String),
                opt("allow_all_outbound", T::Bool),
            ];
            SPECS
        }
        K::SecurityRule => {
            const SPECS: &[PropertySpec] = &[
                parent("group", &[K::SecurityGroup]),
                opt("direction", T::OneOf(&["ingress", "egress"])),
                req("protocol", T::OneOf(PROTOCOLS)),
                req("port", T::Port),
                req("peer", T::Cidr),
                opt("description", T::String),
            ];
            SPECS
        }
        K::LoadBalancer => {
            const SPECS: &[PropertySpec] = &[
                parent("network", NETWORK),
                opt("internet_facing", T::Bool),
                assoc("security_group", &[K::SecurityGroup], false),
            ];
            SPECS
        }
        K::TargetGroup => {
            const SPECS: &[PropertySpec] = &[
                parent("network", NETWORK),
                req("port", T::Port),
                opt("protocol", T::OneOf(LB_PROTOCOLS)),
            ];
            SPECS
        }
        K::Listener => {
            const SPECS: &[PropertySpec] = &[
                assoc("load_balancer", &[K::LoadBalancer], true),
                assoc("target_group", &[K::TargetGroup], true),
                req("port", T::Port),
                opt("protocol", T::OneOf(LB_PROTOCOLS)),
            ];
            SPECS
        }
        K::Database => {
            const SPECS: &[PropertySpec] = &[
                parent("network", NETWORK),
                req("engine", T::OneOf(ENGINES)),
                opt("instance_class", T::String),
                opt("allocated_storage", T::Integer),
                opt("storage_type", T::String),
                opt("multi_az", T::Bool),
                opt("database_name", T::String),
                opt("port", T::Port),
                opt("master_username", T::String),
                opt("credentials_secret", T::String),
                assoc("security_group", &[K::SecurityGroup], false),
            ];
            SPECS
        }
        K::Table => {
            const SPECS: &[PropertySpec] = &[
                req("partition_key", T::String),
                opt("partition_key_type", T::OneOf(KEY_TYPES)),
                opt("sort_key", T::String),
                opt("billing_mode", T::OneOf(BILLING_MODES)),
                opt("point_in_time_recovery", T::Bool),
                opt("table_name", T::String),
                opt("removal_policy", T::OneOf(REMOVAL_POLICIES)),
            ];
            SPECS
        }
        K::Function => {
            const SPECS: &[PropertySpec] = &[
                req("handler", T::String),
                req("runtime", T::String),
                opt("entry", T::String),
                opt("function_name", T::String),
                opt("memory_size", T::Integer),
                opt("timeout", T::Integer),
                opt("tracing", T::Bool),
                opt("environment", T::Map),
            ];
            SPECS
        }
        K::LogGroup => {
            const SPECS: &[PropertySpec] = &[
                opt("log_group_name", T::String),
                opt("retention_days", T::Integer),
            ];
            SPECS
        }
        K::Api => {
            const SPECS: &[PropertySpec] = &[
                opt("name", T::String),
                opt("description", T::String),
                opt("tracing", T::Bool),
                opt("data_trace", T::Bool),
                opt("logging_level", T::OneOf(&["off", "error", "info"])),
                opt("cors_allow_origins", T::List),
                opt("cors_allow_methods", T::List),
                opt("cors_allow_headers", T::List),
                opt("cors_max_age", T::Integer),
                assoc("access_log", &[K::LogGroup], false),
            ];
            SPECS
        }
        K::ApiResource => {
            const SPECS: &[PropertySpec] =
                &[parent("parent", API_PARENTS), req("path_part", T::String)];
            SPECS
        }
        K::ApiMethod => {
            const SPECS: &[PropertySpec] = &[
                parent("resource", API_PARENTS),
                req("http_method", T::OneOf(HTTP_METHODS)),
                req("integration", T::Any),
            ];
            SPECS
        }
        K::Output => {
            const SPECS: &[PropertySpec] = &[
                req("value", T::Any),
                opt("description", T::String),
                opt("export_name", T::String),
            ];
            SPECS
        }
    }
}

/// Referenceable attributes for a kind. Every kind exposes `id`.
pub fn attributes(kind: ResourceKind) -> &'static [AttributeSpec] {
    match kind {
        K::Network => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                from_prop("cidr", "cidr"),
                from_prop("primaryCidr", "cidr"),
            ];
            SPECS
        }
        K::Subnet => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                from_prop("cidr", "cidr"),
                from_prop("availabilityZone", "availability_zone"),
            ];
            SPECS
        }
        K::LoadBalancer => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                provisioned("publicAddress"),
            ];
            SPECS
        }
        K::Listener | K::TargetGroup => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                from_prop("port", "port"),
            ];
            SPECS
        }
        K::Database => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                provisioned("endpoint"),
                AttributeSpec {
                    name: "port",
                    source: AttributeSource::EnginePort,
                },
                from_prop("databaseName", "database_name"),
            ];
            SPECS
        }
        K::Table => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                from_prop("tableName", "table_name"),
            ];
            SPECS
        }
        K::Function => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                provisioned("roleArn"),
                from_prop("functionName", "function_name"),
            ];
            SPECS
        }
        K::LogGroup => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("arn"),
                from_prop("name", "log_group_name"),
            ];
            SPECS
        }
        K::Api => {
            const SPECS: &[AttributeSpec] = &[
                provisioned("id"),
                provisioned("url"),
                provisioned("rootResourceId"),
                from_prop("name", "name"),
            ];
            SPECS
        }
        K::ApiResource => {
            const SPECS: &[AttributeSpec] =
                &[provisioned("id"), from_prop("pathPart", "path_part")];
            SPECS
        }
        K::Output => {
            const SPECS: &[AttributeSpec] = &[provisioned("id"), from_prop("value", "value")];
            SPECS
        }
        K::Gateway
        | K::GatewayAttachment
        | K::RouteTable
        | K::Route
        | K::RouteTableAssociation
        | K::SecurityGroup
        | K::SecurityRule
        | K::ApiMethod => {
            const SPECS: &[AttributeSpec] = &[provisioned("id")];
            SPECS
        }
    }
}

pub fn property_spec(kind: ResourceKind, name: &str) -> Option<&'static PropertySpec> {
    properties(kind).iter().find(|p| p.name == name)
}

pub fn attribute_spec(kind: ResourceKind, name: &str) -> Option<&'static AttributeSpec> {
    attributes(kind).iter().find(|a| a.name == name)
}

/// Derive `node.attribute` from the node's resolved properties.
///
/// Returns `None` when the kind has no such attribute. A property that is
/// itself still deferred yields that same placeholder, so chains collapse
/// onto the reference the executor ultimately has to fill.
pub fn derive_attribute(
    kind: ResourceKind,
    node: &str,
    attribute: &str,
    resolved: &BTreeMap<String, ResolvedValue>,
) -> Option<ResolvedValue> {
    let spec = attribute_spec(kind, attribute)?;
    let placeholder = || ResolvedValue::deferred(DeferredRef::new(node, attribute));
    let value = match spec.source {
        AttributeSource::Provisioned => placeholder(),
        AttributeSource::Property(prop) => resolved.get(prop).cloned().unwrap_or_else(placeholder),
        AttributeSource::EnginePort => match (resolved.get("port"), resolved.get("engine")) {
            (Some(port), _) => port.clone(),
            (None, Some(ResolvedValue::String(engine))) => match default_port(engine) {
                Some(port) => ResolvedValue::Integer(port),
                None => placeholder(),
            },
            (None, Some(deferred @ ResolvedValue::Deferred { .. })) => deferred.clone(),
            _ => placeholder(),
        },
    };
    Some(value)
}

fn default_port(engine: &str) -> Option<i64> {
    match engine {
        "mysql" | "mariadb" => Some(3306),
        "postgres" => Some(5432),
        _ => None,
    }
}

/// Node ids: letter first, then letters, digits, `-` or `_`.
pub fn is_valid_node_id(id: &str) -> bool {
    NODE_ID.is_match(id)
}

/// IPv4 CIDR block with octets ≤ 255 and prefix ≤ 32.
pub fn is_valid_cidr(s: &str) -> bool {
    let Some(caps) = CIDR.captures(s) else {
        return false;
    };
    let octets_ok = (1..=4).all(|i| caps[i].parse::<u16>().is_ok_and(|o| o <= 255));
    let prefix_ok = caps[5].parse::<u8>().is_ok_and(|p| p <= 32);
    octets_ok && prefix_ok
}

/// Check a literal against a property type. References always pass.
pub fn check_literal(ty: PropertyType, value: &PropertyValue) -> Result<(), String> {
    if matches!(value, PropertyValue::Ref(_)) {
        return Ok(());
    }
    match (ty, value) {
        (T::Any, _) => Ok(()),
        (T::String, PropertyValue::String(_)) => Ok(()),
        (T::Integer, PropertyValue::Integer(_)) => Ok(()),
        (T::Bool, PropertyValue::Bool(_)) => Ok(()),
        (T::List, PropertyValue::List(_)) => Ok(()),
        (T::Map, PropertyValue::Map(_)) => Ok(()),
        (T::Cidr, PropertyValue::String(s)) if is_valid_cidr(s) => Ok(()),
        (T::Cidr, _) => Err("expected an IPv4 CIDR block".to_string()),
        (T::Port, PropertyValue::Integer(p)) if (1..=65535).contains(p) => Ok(()),
        (T::Port, _) => Err("expected a port between 1 and 65535".to_string()),
        (T::OneOf(choices), PropertyValue::String(s)) if choices.contains(&s.as_str()) => Ok(()),
        (T::OneOf(choices), _) => Err(format!("expected one of: {}", choices.join(", "))),
        (T::Node(_), PropertyValue::String(s)) if is_valid_node_id(s) => Ok(()),
        (T::Node(_), _) => Err("expected a node id".to_string()),
        (expected, _) => Err(format!("expected {}", type_name(expected))),
    }
}

fn type_name(ty: PropertyType) -> &'static str {
    match ty {
        T::String => "a string",
        T::Integer => "an integer",
        T::Bool => "a boolean",
        T::List => "a list",
        T::Map => "a map",
        T::Cidr => "a CIDR block",
        T::Port => "a port",
        T::OneOf(_) => "one of the listed values",
        T::Node(_) => "a node id",
        T::Any => "any value",
    }
}
