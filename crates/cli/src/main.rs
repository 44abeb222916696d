mod cli;
mod shutdown;

use clap::Parser;

use jobtree_engine::{start_engine, EngineConfig, JobExit, ManagerEvent};

use crate::cli::Cli;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("JOBTREE_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = EngineConfig {
        directory: cli.directory,
        entry: cli.entry,
        entry_args: cli.args,
        stats_interval: cli.stats_interval,
    };

    let engine = match start_engine(config).await {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("jobtree: {err}");
            std::process::exit(1);
        }
    };

    let mut events = engine.events();
    let shutdown = std::sync::Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    tracing::info!(entry = engine.entry_ident(), "engine started");

    loop {
        tokio::select! {
            ev = shutdown_rx.recv() => {
                match ev {
                    Some(ShutdownEvent::Graceful) => {
                        tracing::warn!("stop requested, sending SIGTERM to all jobs (press CTRL+C again to exit immediately)");
                        engine.kill_all();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        tracing::warn!("stop requested again, exiting immediately");
                        std::process::exit(130);
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                match evt {
                    Ok(ManagerEvent::JobStarted { ident }) => {
                        tracing::info!(job = %ident, "job started");
                    }
                    Ok(ManagerEvent::JobFinished { ident, exit }) => {
                        tracing::info!(job = %ident, ?exit, "job finished");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            exit = engine.run_until_done() => {
                let code = match exit {
                    Some(JobExit::Code(code)) => code,
                    Some(JobExit::Signaled) | None => 1,
                };
                engine.shutdown();
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
