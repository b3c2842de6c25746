//! Run command implementation.
//!
//! Configures a task, starts it and prints every partial result until the
//! server reports completion.

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use pek_client::{ClientConfig, Task};
use pek_core::{DefaultEarlyTerminator, InitStrategy, MetricGroup, MetricSelection, PartialResult};
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dataset name
    #[arg(short, long)]
    pub dataset: String,

    /// Number of clusters
    #[arg(short = 'k', long)]
    pub n_clusters: Option<u32>,

    /// Number of runs in the ensemble
    #[arg(short = 'r', long)]
    pub n_runs: Option<u32>,

    /// Centroid initialisation (random, k-means++)
    #[arg(long)]
    pub init: Option<InitStrategy>,

    /// Maximum iterations per run
    #[arg(long)]
    pub max_iter: Option<u32>,

    /// Convergence tolerance
    #[arg(long)]
    pub tol: Option<f64>,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Minimum seconds between two partial results
    #[arg(long)]
    pub freq: Option<f64>,

    /// Early terminators (fast-notify, slow-notify, fast-kill, slow-kill)
    #[arg(long, value_delimiter = ',')]
    pub ets: Vec<DefaultEarlyTerminator>,

    /// Metrics for every metric group: ALL or a comma-separated list
    #[arg(long)]
    pub metrics: Option<MetricSelection>,

    /// Include the per-run partitions in the partial results
    #[arg(long)]
    pub return_partitions: bool,

    /// Print partial results as JSON lines
    #[arg(long)]
    pub json: bool,
}

fn configure(task: &Task, args: &RunArgs) -> anyhow::Result<()> {
    task.set_data(args.dataset.as_str())?;
    if let Some(n_clusters) = args.n_clusters {
        task.set_n_clusters(n_clusters)?;
    }
    if let Some(n_runs) = args.n_runs {
        task.set_n_runs(n_runs)?;
    }
    if let Some(init) = args.init {
        task.set_init(init)?;
    }
    if let Some(max_iter) = args.max_iter {
        task.set_max_iter(max_iter)?;
    }
    if let Some(tol) = args.tol {
        task.set_tol(tol)?;
    }
    task.set_random_state(args.seed)?.set_freq(args.freq)?.set_return_partitions(args.return_partitions)?;
    if !args.ets.is_empty() {
        task.set_ets(Some(args.ets.iter().map(|et| et.get()).collect()))?;
    }
    if let Some(metrics) = &args.metrics {
        for group in MetricGroup::ALL {
            task.set_metrics(group, metrics.clone())?;
        }
    }
    Ok(())
}

fn print_result(result: &PartialResult, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let info = &result.info;
    let fmt_u64 = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
    let cost = info.cost.map_or_else(|| "-".to_string(), |c| format!("{:.6}", c));
    let killed = result.runs_status.killed_runs();

    print!(
        "  iteration {:>4}  cost {}  best run {}",
        fmt_u64(info.iteration),
        cost.green(),
        fmt_u64(info.best_run)
    );
    if !killed.is_empty() {
        let ids: Vec<String> = killed.iter().map(ToString::to_string).collect();
        print!("  killed runs [{}]", ids.join(", ").yellow());
    }
    if let Some(early_termination) = &result.early_termination {
        print!("  early termination {}", early_termination.to_string().yellow());
    }
    println!();
    Ok(())
}

/// Execute the run command.
pub async fn execute(config: ClientConfig, args: RunArgs) -> anyhow::Result<()> {
    let client = super::connect(config).await?;
    client.dataset(&args.dataset)?;

    let task = client.create_task().await;
    configure(&task, &args)?;

    let (tx, mut results) = mpsc::unbounded_channel();
    task.on_partial_result(move |result| {
        let _ = tx.send(result);
    });

    task.start().await.context("Failed to start task")?;
    if !args.json {
        println!("{} {} on {}", "Started task".bold().cyan(), task.id(), args.dataset.bold());
    }

    loop {
        tokio::select! {
            biased;

            result = results.recv() => {
                let Some(result) = result else { break };
                print_result(&result, args.json)?;
                if result.is_completed() {
                    if !args.json {
                        println!("{}", "✓ Task completed".green().bold());
                    }
                    break;
                }
            }
            () = client.disconnected() => {
                anyhow::bail!("Lost connection to the server before task {} completed", task.id());
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                task.kill().await.context("Failed to kill task")?;
                if !args.json {
                    println!("{}", "✗ Task killed".yellow().bold());
                }
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}
