use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder;

use frr_static_routes::config::Settings;
use frr_static_routes::exec::CommandSpawner;
use frr_static_routes::network::Topology;
use frr_static_routes::session::{Orchestrator, Plan, RunReport};

const BANNER: &str = "---------";

#[derive(Parser)]
#[command(name = "frr-static-routes")]
struct Cli {
    /// Topology description, YAML as written by the lab generator (JSON also parses)
    #[arg(long)]
    topology: PathBuf,

    /// Settings file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the address plan and routes without touching any node
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON report of the run to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let topology = Topology::load(&cli.topology)
        .with_context(|| format!("cannot load topology {}", cli.topology.display()))?;
    info!(
        "Topology {}: {} nodes, {} links",
        topology.name.as_deref().unwrap_or("unnamed"),
        topology.nodes().count(),
        topology.links().len()
    );

    let orchestrator = Orchestrator::new(CommandSpawner::new(settings.clone()), settings);

    if cli.dry_run {
        let plan = orchestrator.plan(&topology)?;
        print_plan(&plan);
        if let Some(path) = &cli.report {
            write_json(path, &plan)?;
        }
        return Ok(());
    }

    let rt = Builder::new_multi_thread().enable_all().build()?;
    let report = rt.block_on(orchestrator.run(&topology))?;

    print_outputs(&report);
    if let Some(path) = &cli.report {
        write_json(path, &report)?;
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!("{}", BANNER);
    for assignment in plan.assignments() {
        println!("{} {} {}", assignment.node, assignment.interface, assignment.address);
    }
    println!("{}", BANNER);
    for install in &plan.routes {
        println!("{}: {}", install.node, install.route);
    }
}

fn print_outputs(report: &RunReport) {
    for output in report.interfaces.iter().chain(&report.routing_tables) {
        println!("{}", BANNER);
        println!("{} # {}", output.node, output.command);
        print!("{}", output.text);
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("cannot write report {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}
