//! trustflow CLI: plan and run privacy-preserving workflows.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trustflow_core::config::{BackendKind, DispatchConfig, PlannerConfig};
use trustflow_core::dag::Dag;
use trustflow_core::id::PartyId;
use trustflow_core::viz::to_dot;
use trustflow_exec::{Peer, Runner, TcpTransport, Transport};
use trustflow_planner::job::{BoundaryKind, PlannedOp};
use trustflow_planner::partition::backend_histogram;
use trustflow_planner::{parse_workflow, Partitioner, Plan, WorkflowConfig};

#[derive(Parser)]
#[command(name = "trustflow")]
#[command(about = "Partition workflows across MPC and local backends and run them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a workflow parses into a valid DAG and can be partitioned
    Validate {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        workflow: PathBuf,
    },

    /// Show the job plan for a workflow
    Explain {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        workflow: PathBuf,

        /// Only list jobs this party takes part in
        #[arg(long)]
        party: Option<u64>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the workflow DAG as Graphviz DOT
    Viz {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        workflow: PathBuf,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Dispatch this party's jobs, synchronizing with the other parties
    Run {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        workflow: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line settings; they win over the workflow file and the environment.
#[derive(Debug, Default, clap::Args)]
struct Overrides {
    /// Local party id (overrides config)
    #[arg(long)]
    party: Option<u64>,

    /// Enable a backend on this peer (repeatable)
    #[arg(long = "backend")]
    backends: Vec<BackendKind>,

    /// Spark master URL
    #[arg(long)]
    spark_master: Option<String>,

    /// JIFF server URL
    #[arg(long)]
    jiff_server: Option<String>,

    /// Barrier timeout in milliseconds
    #[arg(long)]
    barrier_timeout_ms: Option<u64>,

    /// Root directory for generated job code
    #[arg(long)]
    code_root: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { workflow } => validate_workflow(&workflow).map(|plan| {
            println!(
                "workflow is valid: {} job(s), digest {}",
                plan.jobs.len(),
                plan.digest.short()
            );
        }),
        Commands::Explain {
            workflow,
            party,
            json,
        } => explain_workflow(&workflow, party.map(PartyId::new), json),
        Commands::Viz { workflow, output } => viz_workflow(&workflow, output.as_deref()),
        Commands::Run {
            workflow,
            overrides,
        } => run_workflow(&workflow, &overrides),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<(Dag, WorkflowConfig)> {
    let src = fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    let parsed = parse_workflow(&src).with_context(|| format!("parsing {}", path.display()))?;
    Ok((parsed.dag, parsed.config))
}

fn plan_for(dag: &Dag, planner: PlannerConfig) -> anyhow::Result<Plan> {
    let plan = Partitioner::new(planner)
        .partition(dag)
        .context("partitioning failed")?;
    Ok(plan)
}

fn validate_workflow(path: &Path) -> anyhow::Result<Plan> {
    let (dag, doc) = load(path)?;
    doc.dispatch.validate().context("invalid dispatch config")?;
    let plan = plan_for(&dag, doc.planner.with_env())?;
    plan.verify(&dag).context("plan failed verification")?;
    Ok(plan)
}

fn explain_workflow(path: &Path, party: Option<PartyId>, json: bool) -> anyhow::Result<()> {
    let (dag, doc) = load(path)?;
    let plan = plan_for(&dag, doc.planner.with_env())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Workflow Plan");
    println!("=============");
    println!();
    println!("Nodes: {}", dag.len());
    println!("Jobs:  {}", plan.jobs.len());
    println!("Digest: {}", plan.digest);
    println!();
    println!("Backends:");
    for (kind, count) in backend_histogram(&plan) {
        println!("  {kind:<13} {count}");
    }
    println!();

    for job in &plan.jobs {
        if party.is_some_and(|p| !job.input_parties.contains(&p)) {
            continue;
        }
        println!("{job}");
        println!("  code: {}", job.code_dir);
        for op in &job.ops {
            match op {
                PlannedOp::Node(id) => {
                    let Some(node) = dag.node(*id) else {
                        bail!("plan references unknown node {id}");
                    };
                    let mpc = if node.is_mpc() { " (mpc)" } else { "" };
                    println!("  - {} {}{mpc}", node.op().label(), node.name());
                }
                PlannedOp::Boundary(b) => {
                    let arrow = match b.kind {
                        BoundaryKind::Close => "->",
                        BoundaryKind::Open => "<-",
                    };
                    println!("  ~ {:?} {} {arrow} {}", b.kind, b.relation, b.counterpart);
                }
            }
        }
    }
    Ok(())
}

fn viz_workflow(path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let (dag, _) = load(path)?;
    let dot = to_dot(&dag);
    match output {
        Some(out) => {
            fs::write(out, dot).with_context(|| format!("writing {}", out.display()))?;
        }
        None => print!("{dot}"),
    }
    Ok(())
}

fn run_workflow(path: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let (dag, doc) = load(path)?;
    let (planner, dispatch) = resolve_configs(&doc, overrides);
    dispatch.validate().context("invalid dispatch config")?;
    let plan = plan_for(&dag, planner)?;

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(dispatch_plan(plan, dispatch))
}

async fn dispatch_plan(plan: Plan, dispatch: DispatchConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let cancel = shutdown.child_token();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let (transport, inbox) = TcpTransport::start(&dispatch, shutdown.clone())
        .await
        .context("starting transport")?;
    let transport: std::sync::Arc<dyn Transport> = transport;
    let peer = Peer::new(dispatch.local, transport, inbox)
        .with_barrier_timeout(dispatch.barrier_timeout());
    let mut runner = Runner::new(peer, dispatch).with_cancellation(cancel);

    let report = runner.run(&plan).await;
    shutdown.cancel();
    let report = report?;

    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        unconfigured = report.unconfigured.len(),
        "run finished"
    );
    println!("run finished, plan {}", plan.digest.short());
    for name in &report.completed {
        println!("  done     {name}");
    }
    for name in &report.unconfigured {
        println!("  no backend {name}");
    }
    Ok(())
}

/// Workflow file, then environment, then command line.
fn resolve_configs(doc: &WorkflowConfig, overrides: &Overrides) -> (PlannerConfig, DispatchConfig) {
    let mut planner = doc.planner.clone().with_env();
    let mut dispatch = doc.dispatch.clone().with_env();
    apply_overrides(&mut planner, &mut dispatch, overrides);
    (planner, dispatch)
}

fn apply_overrides(planner: &mut PlannerConfig, dispatch: &mut DispatchConfig, o: &Overrides) {
    if let Some(party) = o.party {
        dispatch.local = PartyId::new(party);
    }
    for kind in &o.backends {
        dispatch.backends.entry(*kind).or_default();
    }
    if let Some(url) = &o.spark_master {
        dispatch.backends.entry(BackendKind::Spark).or_default().endpoint = Some(url.clone());
    }
    if let Some(url) = &o.jiff_server {
        dispatch.backends.entry(BackendKind::Jiff).or_default().endpoint = Some(url.clone());
    }
    if let Some(ms) = o.barrier_timeout_ms {
        dispatch.barrier_timeout_ms = Some(ms);
    }
    if let Some(root) = &o.code_root {
        planner.code_root = root.clone();
    }
}
