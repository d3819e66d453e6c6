//! TC-013: CLI subcommands: init, validate, plan, emit, teardown, graph, schema.

use crate::core::error::CompileError;
use crate::core::types::{ProvisioningPlan, ResolvedValue, TopologyConfig};
use crate::core::{compiler, graph, parser, permissions, planner};
use crate::provenance::{eventlog, hasher};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "topoc",
    version,
    about = "Infrastructure topology compiler: declarations in, provisioning plan out"
)]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Plan serialization format.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new topology project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate topology.yaml structure and property schemas
    Validate {
        /// Path to topology.yaml
        #[arg(short, long, default_value = "topology.yaml")]
        file: PathBuf,
    },

    /// Compile and print a human-readable plan summary
    Plan {
        /// Path to topology.yaml
        #[arg(short, long, default_value = "topology.yaml")]
        file: PathBuf,

        /// Append compile events to <dir>/<topology>/events.jsonl
        #[arg(long)]
        events_dir: Option<PathBuf>,
    },

    /// Compile and write the provisioning plan for an executor
    Emit {
        /// Path to topology.yaml
        #[arg(short, long, default_value = "topology.yaml")]
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = PlanFormat::Json)]
        format: PlanFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append compile events to <dir>/<topology>/events.jsonl
        #[arg(long)]
        events_dir: Option<PathBuf>,
    },

    /// Show the teardown order, for the whole topology or a subset
    Teardown {
        /// Path to topology.yaml
        #[arg(short, long, default_value = "topology.yaml")]
        file: PathBuf,

        /// Only tear down these nodes (repeatable)
        #[arg(long)]
        only: Vec<String>,
    },

    /// Print the dependency graph in Graphviz DOT format
    Graph {
        /// Path to topology.yaml
        #[arg(short, long, default_value = "topology.yaml")]
        file: PathBuf,
    },

    /// Print the JSON Schema of topology.yaml
    Schema,

    /// Generate shell completions
    Completion {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, events_dir } => cmd_plan(&file, events_dir.as_deref()),
        Commands::Emit {
            file,
            format,
            output,
            events_dir,
        } => cmd_emit(&file, format, output.as_deref(), events_dir.as_deref()),
        Commands::Teardown { file, only } => cmd_teardown(&file, &only),
        Commands::Graph { file } => cmd_graph(&file),
        Commands::Schema => cmd_schema(),
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "topoc", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("topology.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;

    let template = r#"version: "1.0"
name: my-topology
description: "Compiled by topoc"

tags: {}

resources:
  Net:
    type: network
    properties:
      cidr: 10.0.0.0/16

outputs:
  networkId:
    value: Net.id
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized topoc project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let topology = parser::build_topology(&config).map_err(report)?;
    topology.check_references().map_err(report)?;

    println!(
        "OK: {} ({} resources, {} outputs)",
        config.name,
        config.resources.len(),
        config.outputs.len()
    );
    Ok(())
}

/// Parse and validate a topology file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<TopologyConfig, String> {
    let config = parser::parse_config_file(file).map_err(report)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn report(e: CompileError) -> String {
    e.to_string()
}

/// Compile a file, recording provenance events when `events_dir` is set.
fn compile_file(file: &Path, events_dir: Option<&Path>) -> Result<ProvisioningPlan, String> {
    let config = parse_and_validate(file)?;
    let Some(dir) = events_dir else {
        return compiler::compile_config(&config).map_err(report);
    };

    let run_id = eventlog::generate_run_id();
    let started = Instant::now();
    eventlog::append_event(
        dir,
        &config.name,
        eventlog::CompileEvent::CompileStarted {
            topology: config.name.clone(),
            run_id: run_id.clone(),
            topoc_version: env!("CARGO_PKG_VERSION").to_string(),
            source_hash: hasher::hash_file(file)?,
        },
    )?;

    match compiler::compile_config(&config) {
        Ok(plan) => {
            eventlog::append_event(
                dir,
                &config.name,
                eventlog::CompileEvent::CompileCompleted {
                    topology: config.name.clone(),
                    run_id,
                    nodes: plan.steps().len(),
                    permissions: plan.permissions().len(),
                    outputs: plan.outputs().len(),
                    fingerprint: plan.fingerprint().to_string(),
                    total_seconds: started.elapsed().as_secs_f64(),
                },
            )?;
            Ok(plan)
        }
        Err(e) => {
            eventlog::append_event(
                dir,
                &config.name,
                eventlog::CompileEvent::CompileFailed {
                    topology: config.name.clone(),
                    run_id,
                    error: e.to_string(),
                },
            )?;
            Err(report(e))
        }
    }
}

fn cmd_plan(file: &Path, events_dir: Option<&Path>) -> Result<(), String> {
    let plan = compile_file(file, events_dir)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &ProvisioningPlan) {
    println!(
        "Planning: {} ({} resources)",
        plan.name(),
        plan.steps().len()
    );
    println!();

    for (i, step) in plan.steps().iter().enumerate() {
        let pending = step
            .properties
            .values()
            .filter(|v| !v.is_concrete())
            .count();
        if step.depends_on.is_empty() {
            println!("  {:>3}. + {} ({})", i + 1, step.id, step.kind);
        } else {
            println!(
                "  {:>3}. + {} ({}) after {}",
                i + 1,
                step.id,
                step.kind,
                step.depends_on.join(", ")
            );
        }
        if pending > 0 {
            println!("         {} propert(ies) deferred to provisioning", pending);
        }
    }

    if !plan.permissions().is_empty() {
        println!();
        println!("Grants:");
        for p in plan.permissions() {
            println!("  {} -> {} ({})", p.grantor, p.grantee, p.action);
        }
    }

    if !plan.outputs().is_empty() {
        println!();
        println!("Outputs:");
        for (name, out) in plan.outputs() {
            println!("  {} = {}", name, display_value(&out.value));
        }
    }

    println!();
    println!(
        "Plan: {} to add, {} grant(s), {} output(s). {}",
        plan.steps().len(),
        plan.permissions().len(),
        plan.outputs().len(),
        plan.fingerprint()
    );
}

fn display_value(value: &ResolvedValue) -> String {
    match value {
        ResolvedValue::Deferred { deferred } => format!("(known after provisioning: {})", deferred),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn cmd_emit(
    file: &Path,
    format: PlanFormat,
    output: Option<&Path>,
    events_dir: Option<&Path>,
) -> Result<(), String> {
    let plan = compile_file(file, events_dir)?;
    let body = match format {
        PlanFormat::Json => plan.to_json()?,
        PlanFormat::Yaml => plan.to_yaml()?,
    };
    match output {
        Some(path) => {
            std::fs::write(path, &body)
                .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            println!("Wrote plan to {} ({})", path.display(), plan.fingerprint());
        }
        None => println!("{}", body),
    }
    Ok(())
}

fn cmd_teardown(file: &Path, only: &[String]) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let topology = parser::build_topology(&config).map_err(report)?;
    topology.check_references().map_err(report)?;
    let graph = graph::build(&topology).map_err(report)?;
    let order = planner::order(&graph).map_err(report)?;

    let sequence = if only.is_empty() {
        planner::teardown_order(&order)
    } else {
        let targets: Vec<&str> = only.iter().map(String::as_str).collect();
        planner::plan_teardown(&graph, &order, &targets).map_err(report)?
    };
    planner::verify_teardown(&graph, &sequence).map_err(report)?;

    println!("Teardown: {} ({} resources)", config.name, sequence.len());
    for (i, id) in sequence.iter().enumerate() {
        println!("  {:>3}. - {}", i + 1, id);
    }
    Ok(())
}

fn cmd_graph(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let topology = parser::build_topology(&config).map_err(report)?;
    let graph = graph::build(&topology).map_err(report)?;
    let grants = permissions::derive(&graph).map_err(report)?;
    print!("{}", graph.to_dot(&config.name, &grants));
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(TopologyConfig);
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("JSON serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}
