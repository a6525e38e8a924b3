use crate::cmd::Workspace;
use crate::output::{format_secs, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use futures::StreamExt;
use kilroy_core::config::RunnerConfig;
use kilroy_core::hyper::{Hyperprotocol, HyperprotocolGenerator, HyperprotocolLoader};
use kilroy_core::runner::{Completion, HyperprotocolRunner, RunnerEvent};
use kilroy_core::KilroyError;
use kilroy_driver::{SessionSettings, SimulatedExecutor};
use std::path::Path;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum HyperSubcommand {
    /// Interleave Hybridize steps with Wait Microscopy padding
    Generate {
        /// Hybes, e.g. "1-8 12"; a single number N means 1..=N
        #[arg(long)]
        hybes: Option<String>,
        /// Hybes to leave out, same syntax
        #[arg(long)]
        ignore: Option<String>,
        /// Imaging seconds per cycle (below 10000)
        #[arg(long)]
        imaging: Option<u64>,
        /// Output file name; the hyperprotocol takes its name without .xml
        #[arg(long)]
        name: String,
    },

    /// List hyperprotocols in the protocols directory
    List,

    /// Show the steps of one hyperprotocol
    Show { name: String },

    /// Dry-run a hyperprotocol against the simulated executor
    Run {
        name: String,
        /// Multiplier applied to every step duration (0.01 runs 100x faster)
        #[arg(long, default_value_t = 1.0, value_parser = parse_time_scale)]
        time_scale: f64,
    },
}

fn parse_time_scale(s: &str) -> Result<f64, String> {
    let scale: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !scale.is_finite() || scale < 0.0 {
        return Err("time scale must be a non-negative number".to_string());
    }
    Ok(scale)
}

pub fn run(root: &Path, subcmd: HyperSubcommand, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::load(root)?;
    match subcmd {
        HyperSubcommand::Generate {
            hybes,
            ignore,
            imaging,
            name,
        } => generate(&ws, hybes.as_deref(), ignore.as_deref(), imaging, &name, json),
        HyperSubcommand::List => list(&ws, json),
        HyperSubcommand::Show { name } => show(&ws, &name, json),
        HyperSubcommand::Run { name, time_scale } => {
            let library = library(&ws)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(dry_run(library, &ws.config.runner, &name, time_scale, json))
        }
    }
}

fn library(ws: &Workspace) -> anyhow::Result<Vec<Hyperprotocol>> {
    let dir = ws.protocols_path();
    HyperprotocolLoader::new(&ws.catalog, &ws.estimator)
        .load_dir(&dir)
        .with_context(|| format!("failed to load hyperprotocols from {}", dir.display()))
}

// ---------------------------------------------------------------------------
// generate / list / show
// ---------------------------------------------------------------------------

fn generate(
    ws: &Workspace,
    hybes: Option<&str>,
    ignore: Option<&str>,
    imaging: Option<u64>,
    name: &str,
    json: bool,
) -> anyhow::Result<()> {
    let list = ws.select_hybes(hybes, ignore, None)?;
    let imaging = imaging.unwrap_or(ws.config.generator.default_imaging_secs);

    let out = HyperprotocolGenerator::new(&ws.catalog, &ws.estimator).write(
        &ws.protocols_path(),
        name,
        list.as_slice(),
        imaging,
    )?;

    if json {
        return print_json(&out);
    }
    if out.overwritten {
        println!("Replaced existing file.");
    }
    println!(
        "Wrote hyperprotocol '{}' to {}",
        out.hyperprotocol.name,
        out.path.display()
    );
    println!("  hybes:          {list}");
    println!("  steps:          {}", out.hyperprotocol.steps.len());
    println!(
        "  estimated time: {}",
        format_secs(out.hyperprotocol.total_secs())
    );
    Ok(())
}

fn list(ws: &Workspace, json: bool) -> anyhow::Result<()> {
    let library = library(ws)?;
    if json {
        let rows: Vec<_> = library
            .iter()
            .map(|h| {
                serde_json::json!({
                    "name": h.name,
                    "steps": h.steps.len(),
                    "required_secs": h.total_secs(),
                })
            })
            .collect();
        return print_json(&rows);
    }
    if library.is_empty() {
        println!("No hyperprotocols in {}.", ws.protocols_path().display());
        return Ok(());
    }
    print_table(
        &["NAME", "STEPS", "REQUIRED"],
        library
            .iter()
            .map(|h| {
                vec![
                    h.name.clone(),
                    h.steps.len().to_string(),
                    format_secs(h.total_secs()),
                ]
            })
            .collect(),
    );
    Ok(())
}

fn show(ws: &Workspace, name: &str, json: bool) -> anyhow::Result<()> {
    let library = library(ws)?;
    let hp = library
        .iter()
        .find(|h| h.name == name)
        .ok_or_else(|| KilroyError::HyperprotocolNotFound(name.to_string()))?;

    if json {
        return print_json(hp);
    }
    println!("{} (required {})", hp.name, format_secs(hp.total_secs()));
    print_table(
        &["#", "PROTOCOL", "DURATION"],
        hp.steps
            .iter()
            .enumerate()
            .map(|(i, s)| vec![i.to_string(), s.protocol.clone(), format_secs(s.duration_secs)])
            .collect(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn dry_run(
    library: Vec<Hyperprotocol>,
    runner_cfg: &RunnerConfig,
    name: &str,
    time_scale: f64,
    json: bool,
) -> anyhow::Result<()> {
    let mut plan = Vec::new();
    let (handle, task) = kilroy_driver::spawn(SessionSettings::from(runner_cfg), |completions| {
        let executor = SimulatedExecutor::new(completions, time_scale);
        let mut runner = HyperprotocolRunner::new(Arc::new(executor), runner_cfg.watchdog_grace());
        runner.extend(library)?;
        plan = runner.describe();
        Ok(runner)
    })?;

    let mut events = handle.subscribe().await?;
    handle.start_by_name(name).await?;

    if !json {
        if let Some(entry) = plan.iter().find(|p| p.name == name) {
            println!(
                "Running '{}': {} steps, {} at time scale {}",
                entry.name,
                entry.steps,
                format_secs(entry.required_secs),
                time_scale
            );
        }
    }

    let mut outcome = None;
    while outcome.is_none() {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                report(&event, json)?;
                if let RunnerEvent::HyperprotocolCompleted { outcome: done, .. } = event {
                    outcome = Some(done);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, stopping hyperprotocol");
                handle.stop().await?;
            }
        }
    }

    handle.shutdown()?;
    task.await.context("runner session panicked")?;

    match outcome {
        Some(Completion::Finished) | Some(Completion::Stopped) => Ok(()),
        Some(Completion::Failed) => anyhow::bail!("hyperprotocol '{name}' failed"),
        None => anyhow::bail!("runner session ended before '{name}' completed"),
    }
}

fn report(event: &RunnerEvent, json: bool) -> anyhow::Result<()> {
    let now = chrono::Local::now();
    if json {
        let line = serde_json::json!({ "at": now.to_rfc3339(), "event": event });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    let at = now.format("%H:%M:%S");
    match event {
        RunnerEvent::StepIssued {
            step,
            protocol,
            duration_secs,
            ..
        } => println!("[{at}] step {step}: {protocol} ({})", format_secs(*duration_secs)),
        RunnerEvent::StepFailed {
            step,
            protocol,
            reason,
            ..
        } => println!("[{at}] step {step} failed: {protocol}: {reason}"),
        RunnerEvent::HyperprotocolCompleted {
            hyperprotocol,
            outcome,
            ..
        } => {
            let verb = match outcome {
                Completion::Finished => "completed",
                Completion::Stopped => "stopped",
                Completion::Failed => "aborted",
            };
            println!("[{at}] {hyperprotocol} {verb}");
        }
        RunnerEvent::Desync {
            protocol,
            overdue_secs,
            ..
        } => println!(
            "[{at}] warning: no completion for {protocol}, {} overdue",
            format_secs(*overdue_secs)
        ),
        RunnerEvent::Elapsed { seconds, .. } if *seconds > 0 && seconds % 60 == 0 => {
            println!("[{at}] elapsed {}", format_secs(*seconds))
        }
        RunnerEvent::ProtocolCompleted { message } => {
            println!("[{at}] protocol completed: {}", message.as_deref().unwrap_or("-"))
        }
        _ => {}
    }
    Ok(())
}
