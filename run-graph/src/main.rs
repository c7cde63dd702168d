use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use run_graph::layout::GraphBuilder;
use run_graph::watcher::compute_snapshot;
use run_graph::{spawn_run_watcher, Config, Pipeline, RunRef};

/// Lay out a batch run and print its renderer graph as JSON.
#[derive(Debug, Parser)]
#[command(name = "run-graph", version)]
struct Args {
    /// Run id, or job id with --job
    run_id: String,

    /// Read the id as a recursive job
    #[arg(long)]
    job: bool,

    /// Keep polling and print every update until the run finishes
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "run_graph=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    tracing::info!(
        api_base_url = %config.api_base_url,
        engine = ?config.layout_engine,
        "run-graph starting"
    );

    let run = if args.job {
        RunRef::Job(args.run_id)
    } else {
        RunRef::Run(args.run_id)
    };
    let client = Arc::new(config.api_client());
    let pipeline = Pipeline::new(
        config.layout_engine()?,
        GraphBuilder::new(config.builder_settings()),
    );

    if !args.watch {
        let snapshot = compute_snapshot(client.as_ref(), &pipeline, &run).await?;
        println!("{}", serde_json::to_string_pretty(&snapshot.graph)?);
        return Ok(());
    }

    let (watcher, handle, mut updates) =
        spawn_run_watcher(run, client, pipeline, config.poll_interval).await?;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }

        let view = updates.borrow_and_update().clone();
        if let Some(error) = &view.error {
            tracing::warn!(error = %error, "Latest refresh failed; showing previous graph");
        }
        if view.graph.is_some() {
            println!("{}", serde_json::to_string(&view)?);
        }
        if !view.live {
            break;
        }
    }

    watcher.stop(None);
    handle.await?;
    Ok(())
}
