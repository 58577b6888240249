use clap::Parser;
use hivegate::cli::{Cli, Commands};
use hivegate::config::AppConfig;
use hivegate::coordination::install_signal_handlers;
use hivegate::pipeline::{DryRunExecutor, PipelineEvent, TriggerContext};
use hivegate::runtime::HiveRuntime;
use hivegate::simulation::{Simulation, SimulationConfig};
use std::sync::Arc;
use tracing::{error, info};

mod main_runtime;

use main_runtime::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_validated(&cli.config)?;
    if cli.dry_run {
        config.dry_run.enabled = true;
    }
    init_logging(&config.logging);

    match cli.command {
        Commands::Once { requested_by, note } => {
            run_once(config, &requested_by, note.as_deref()).await
        }
        Commands::Run { interval_ms } => {
            if let Some(ms) = interval_ms {
                config.pipeline.auto_run_interval_ms = ms;
            }
            run_service(config).await
        }
    }
}

async fn run_once(config: AppConfig, requested_by: &str, note: Option<&str>) -> anyhow::Result<()> {
    let runtime = HiveRuntime::build(config, Arc::new(DryRunExecutor::new()))?;
    let background = runtime.spawn_background();

    Simulation::new(
        SimulationConfig::default(),
        runtime.bus.clone(),
        runtime.store.clone(),
    )
    .seed()
    .await;
    // The mirror task copies the aggregate asynchronously
    let coherence = runtime.bus.coherence().await;
    runtime
        .store
        .set_partial_state(hivegate::StatePatch::new().hive_mind_coherence(coherence))
        .await;
    runtime.store.start_trading().await;

    let mut trigger = TriggerContext::manual(requested_by);
    if let Some(note) = note {
        trigger = trigger.with_note(note);
    }
    let trace = runtime.pipeline.run(trigger).await?;
    println!("{}", trace.to_json()?);

    runtime
        .shutdown
        .request_shutdown(hivegate::ShutdownSignal::Graceful);
    for task in background {
        let _ = task.await;
    }

    if !trace.success {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_service(config: AppConfig) -> anyhow::Result<()> {
    let runtime = HiveRuntime::build(config, Arc::new(DryRunExecutor::new()))?;
    install_signal_handlers(runtime.shutdown.clone());

    let mut tasks = runtime.spawn_background();

    let simulation = Simulation::new(
        SimulationConfig::default(),
        runtime.bus.clone(),
        runtime.store.clone(),
    );
    simulation.seed().await;
    let producers = simulation.spawn(runtime.shutdown.token());

    // Log every finished trace
    let mut events = runtime.pipeline.subscribe();
    let mut token = runtime.shutdown.token();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(PipelineEvent::RunFinished(trace)) => match &trace.failure {
                        None => info!("Run {} succeeded, order {:?}", trace.run_id, trace.order_id),
                        Some(f) => info!(
                            "Run {} stopped at step {} ({}): {}",
                            trace.run_id, f.step_index, f.step_name, f.reason
                        ),
                    },
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = token.wait_for_shutdown() => break,
            }
        }
    }));

    runtime.store.start_trading().await;
    let auto_runner = runtime.spawn_auto_runner();
    info!("hivegate running, press Ctrl+C to stop");

    let mut token = runtime.shutdown.token();
    token.wait_for_shutdown().await;

    let store = runtime.store.clone();
    let pipeline = runtime.pipeline.clone();
    runtime
        .shutdown
        .execute(
            async move {
                store.stop_trading().await;
            },
            async move { pipeline.wait_idle().await },
            async move {
                let _ = auto_runner.await;
                let _ = producers.await;
                for task in tasks {
                    if let Err(e) = task.await {
                        error!("Background task failed: {}", e);
                    }
                }
            },
        )
        .await;

    Ok(())
}
