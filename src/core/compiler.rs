//! TC-012: Compilation pipeline.
//!
//! declarations → resolver → graph builder → planner → permission deriver →
//! emitter. Each stage takes the previous stage's values explicitly; nothing
//! is shared between runs, so compiling the same topology twice yields
//! byte-identical plans.

use super::error::Result;
use super::topology::Topology;
use super::types::{OutputDecl, ProvisioningPlan, TopologyConfig};
use super::{emitter, graph, parser, permissions, planner, resolver};
use indexmap::IndexMap;
use tracing::{debug, info};

/// Compile a declared topology into a provisioning plan.
pub fn compile(
    topology: &Topology,
    outputs: &IndexMap<String, OutputDecl>,
) -> Result<ProvisioningPlan> {
    info!(topology = %topology.name, nodes = topology.len(), "compiling");

    let resolution = resolver::resolve(topology)?;
    let graph = graph::build(topology)?;
    debug!(edges = graph.edges().count(), "graph built");

    let order = planner::order(&graph)?;
    debug!(order = ?order, "provisioning order");

    let grants = permissions::derive(&graph)?;
    let plan = emitter::emit(topology, &resolution, &graph, &order, &grants, outputs)?;

    info!(
        topology = %plan.name(),
        steps = plan.steps().len(),
        permissions = plan.permissions().len(),
        outputs = plan.outputs().len(),
        fingerprint = %plan.fingerprint(),
        "plan emitted"
    );
    Ok(plan)
}

/// Build the topology from a parsed config, then compile it.
pub fn compile_config(config: &TopologyConfig) -> Result<ProvisioningPlan> {
    let topology = parser::build_topology(config)?;
    compile(&topology, &config.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CompileError;
    use crate::core::types::{PermissionAction, PropertyValue, ResolvedValue};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const API: &str = r#"
version: "1.0"
name: demo-api
tags: { Environment: Development }
resources:
  Handler:
    type: function
    properties:
      handler: index.handler
      runtime: nodejs18.x
      environment:
        DYNAMODB: { ref: Table.tableName, access: read_write }
  Table:
    type: table
    properties: { partition_key: id, table_name: my-demo-table }
  RestAPI:
    type: api
    properties: { name: Demo API }
  Items:
    type: api-resource
    properties: { parent: RestAPI, path_part: items }
  GetItems:
    type: api-method
    properties:
      resource: Items
      http_method: GET
      integration: { ref: Handler.arn, access: invoke }
outputs:
  apiUrl: { value: RestAPI.url, description: API URL }
  tableName: { value: Table.tableName }
"#;

    #[test]
    fn test_tc012_compile_serverless() {
        let config = parser::parse_config(API).unwrap();
        let plan = compile_config(&config).unwrap();

        assert_eq!(
            plan.provisioning_order(),
            ["Table", "Handler", "RestAPI", "Items", "GetItems"]
        );
        let env = &plan.step("Handler").unwrap().properties["environment"];
        let ResolvedValue::Map(env) = env else {
            panic!("environment is a map");
        };
        assert_eq!(
            env["DYNAMODB"],
            ResolvedValue::String("my-demo-table".into())
        );

        let actions: Vec<_> = plan
            .permissions()
            .iter()
            .map(|p| (p.grantor.as_str(), p.grantee.as_str(), p.action))
            .collect();
        assert_eq!(
            actions,
            vec![
                ("Handler", "GetItems", PermissionAction::Invoke),
                ("Table", "Handler", PermissionAction::Read),
                ("Table", "Handler", PermissionAction::Write),
            ]
        );
        assert!(!plan.outputs()["apiUrl"].value.is_concrete());
        assert_eq!(
            plan.outputs()["tableName"].value,
            ResolvedValue::String("my-demo-table".into())
        );
    }

    #[test]
    fn test_tc012_compile_twice_identical() {
        let config = parser::parse_config(API).unwrap();
        let a = compile_config(&config).unwrap().to_json().unwrap();
        let b = compile_config(&config).unwrap().to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tc012_reference_cycle_fails_whole_pass() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  A:
    type: function
    properties:
      handler: a
      runtime: nodejs18.x
      environment: { PEER: "${B.functionName}" }
  B:
    type: function
    properties:
      handler: b
      runtime: nodejs18.x
      environment: { PEER: "${A.functionName}" }
"#;
        let err = compile_config(&parser::parse_config(yaml).unwrap()).unwrap_err();
        let CompileError::CyclicReference { nodes } = err else {
            panic!("expected cyclic reference, got {:?}", err);
        };
        assert!(nodes.contains(&"A".to_string()));
        assert!(nodes.contains(&"B".to_string()));
    }

    #[test]
    fn test_tc012_misspelled_access_fails_compile() {
        let yaml = API.replace("access: read_write", "access: readwrite");
        let err = compile_config(&parser::parse_config(&yaml).unwrap()).unwrap_err();
        assert_eq!(err.offending_nodes(), vec!["Handler"]);
        assert!(err.to_string().contains("readwrite"));

        let yaml = API.replace("ref: Table.tableName", "ref: Table");
        let err = compile_config(&parser::parse_config(&yaml).unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidProperty { .. }));
    }

    #[test]
    fn test_tc012_hint_cycle_detected() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  A: { type: gateway, depends_on: [B] }
  B: { type: gateway, depends_on: [A] }
"#;
        let err = compile_config(&parser::parse_config(yaml).unwrap()).unwrap_err();
        assert_eq!(
            err,
            CompileError::CycleDetected {
                cycle: vec!["A".into(), "B".into(), "A".into()]
            }
        );
    }

    #[test]
    fn test_tc012_demo_vpc_web() {
        let config = parser::parse_config(include_str!("../../demos/vpc-web.yaml")).unwrap();
        assert!(parser::validate_config(&config).is_empty());
        let plan = compile_config(&config).unwrap();

        let order = plan.provisioning_order();
        assert_eq!(order[0], "VPC");
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("GatewayAttachment") < pos("DefaultRoute"));
        assert!(pos("Database") < pos("MysqlFromVpc"));
        assert!(pos("LoadBalancer") < pos("Listener"));

        let rule = &plan.step("MysqlFromVpc").unwrap().properties;
        assert_eq!(rule["port"], ResolvedValue::Integer(3306));
        assert_eq!(rule["peer"], ResolvedValue::String("10.0.0.0/16".into()));
        assert!(plan.permissions().is_empty());
        assert!(!plan.outputs()["endpoint"].value.is_concrete());
        assert_eq!(
            plan.outputs()["databasePort"].value,
            ResolvedValue::Integer(3306)
        );
    }

    #[test]
    fn test_tc012_demo_serverless_api() {
        let config =
            parser::parse_config(include_str!("../../demos/serverless-api.yaml")).unwrap();
        assert!(parser::validate_config(&config).is_empty());
        let plan = compile_config(&config).unwrap();

        let invokes = plan
            .permissions()
            .iter()
            .filter(|p| p.action == PermissionAction::Invoke)
            .count();
        assert_eq!(invokes, 4);
        assert_eq!(plan.tags()["Project"], "DemoAPI");
        assert_eq!(
            plan.outputs()["DynamoDBTableName"].export_name.as_deref(),
            Some("tableName")
        );
    }

    proptest! {
        /// Chains of tables and functions compile identically on every run.
        #[test]
        fn prop_tc012_compile_idempotent(count in 1usize..8, named in any::<bool>()) {
            let mut topo = Topology::new("chain");
            for i in 0..count {
                let mut props = BTreeMap::from([
                    ("partition_key".to_string(), PropertyValue::str("id")),
                ]);
                if named {
                    props.insert("table_name".into(), PropertyValue::str(format!("t{}", i)));
                }
                topo.declare(&format!("T{}", i), "table", props).unwrap();
                let env = BTreeMap::from([(
                    "TABLE".to_string(),
                    PropertyValue::str(format!("${{T{}.tableName}}", i)),
                )]);
                topo.declare(
                    &format!("F{}", i),
                    "function",
                    BTreeMap::from([
                        ("handler".to_string(), PropertyValue::str("h")),
                        ("runtime".to_string(), PropertyValue::str("nodejs18.x")),
                        ("environment".to_string(), PropertyValue::Map(env)),
                    ]),
                )
                .unwrap();
            }
            let a = compile(&topo, &IndexMap::new()).unwrap();
            let b = compile(&topo, &IndexMap::new()).unwrap();
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
            prop_assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
            prop_assert_eq!(a.steps().len(), count * 2);
        }
    }
}
