use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::args::{AgentArgs, CliArgs, Command, RunArgs};
use crate::config::{RemoteSettings, load_plan_file, remote_settings};
use crate::distributed::{ConfigureMessage, DistributedRunner, TcpTransport, run_agent};
use crate::engine::{Capabilities, Engine, EngineOptions, RunSummary};
use crate::error::AppResult;
use crate::plan::TestPlan;
use crate::shutdown::{StopMode, stop_channel};
use crate::shutdown_handlers::setup_signal_stop_handler;
use crate::summary_output::{print_summary, write_summary_json};

/// How often the coordinator asks agents whether they are still running.
const REMOTE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Parses the command line, installs logging and runs the chosen subcommand
/// on a multi-threaded runtime.
///
/// # Errors
///
/// Returns the first error of the chosen subcommand.
pub fn run() -> AppResult<()> {
    let args = CliArgs::parse();
    crate::logger::init_logging(args.command.verbose());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("throng-worker")
        .build()?;

    runtime.block_on(execute(args.command))
}

async fn execute(command: Command) -> AppResult<()> {
    match command {
        Command::Run(args) => run_plan(args).await,
        Command::Agent(args) => serve(args).await,
    }
}

async fn run_plan(args: RunArgs) -> AppResult<()> {
    let file = load_plan_file(&args.plan)?;
    match remote_settings(file.remote.as_ref(), &args)? {
        Some(settings) => run_remote(file.plan, settings, &args).await,
        None => run_local(file.plan, &args).await,
    }
}

async fn run_local(plan: TestPlan, args: &RunArgs) -> AppResult<()> {
    let caps = Arc::new(Capabilities::with_builtins()?);
    let options = EngineOptions {
        timer_factor: args.timer_factor,
        ..EngineOptions::default()
    };
    let engine = Engine::new(plan, caps, options)?;
    info!("Running plan '{}' locally", engine.plan().name);

    let (stop_tx, mut stop_rx) = stop_channel();
    let signals = setup_signal_stop_handler(stop_tx);
    let handle = engine.stop_handle();
    let forward = tokio::spawn(async move {
        let mode = stop_rx.stopped().await;
        handle.stop(mode);
    });

    let outcome = engine.run().await;
    forward.abort();
    signals.abort();
    let summary = outcome?;

    print_summary("Local run", &summary);
    if let Some(path) = args.summary_json.as_deref() {
        write_summary_json(path, &summary)?;
    }
    Ok(())
}

enum RemoteOutcome {
    Finished(AppResult<Vec<(String, Option<RunSummary>)>>),
    Interrupted(StopMode),
}

async fn run_remote(plan: TestPlan, settings: RemoteSettings, args: &RunArgs) -> AppResult<()> {
    info!(
        "Running plan '{}' on {} agent(s)",
        plan.name,
        settings.agents.len()
    );
    let config = ConfigureMessage {
        plan,
        timer_factor: args.timer_factor,
    };
    let mut runner = DistributedRunner::new(TcpTransport::default(), settings.options);
    let report = runner.init(&settings.agents, &config).await?;
    for failure in &report.failed {
        warn!("Skipping agent {}", failure);
    }
    let started = runner.start(None).await;
    for failure in &started.failed {
        warn!("Agent {} did not start", failure);
    }

    let (stop_tx, mut stop_rx) = stop_channel();
    let signals = setup_signal_stop_handler(stop_tx);
    let outcome = tokio::select! {
        finished = runner.wait_for_finish(REMOTE_POLL_INTERVAL, Duration::MAX) => {
            RemoteOutcome::Finished(finished)
        }
        mode = stop_rx.stopped() => RemoteOutcome::Interrupted(mode),
    };
    signals.abort();

    let finished = match outcome {
        RemoteOutcome::Finished(finished) => finished,
        RemoteOutcome::Interrupted(mode) => {
            interrupt(&mut runner, mode).await;
            runner
                .wait_for_finish(REMOTE_POLL_INTERVAL, Duration::MAX)
                .await
        }
    };
    runner.exit(None).await;
    report_remote(&finished?, args.summary_json.as_deref())
}

async fn interrupt(runner: &mut DistributedRunner<TcpTransport>, mode: StopMode) {
    let report = match mode {
        StopMode::Immediate => runner.stop(None).await,
        StopMode::Graceful | StopMode::Running => runner.shutdown(None).await,
    };
    for failure in &report.failed {
        warn!("Agent {} did not acknowledge the stop", failure);
    }
}

fn report_remote(finished: &[(String, Option<RunSummary>)], path: Option<&Path>) -> AppResult<()> {
    let mut collected = BTreeMap::new();
    for (address, summary) in finished {
        let Some(summary) = summary else {
            warn!("Agent {} reported no summary", address);
            continue;
        };
        print_summary(&format!("Agent {}", address), summary);
        collected.insert(address.clone(), summary.clone());
    }
    if let Some(path) = path {
        write_summary_json(path, &collected)?;
    }
    Ok(())
}

async fn serve(args: AgentArgs) -> AppResult<()> {
    let caps = Arc::new(Capabilities::with_builtins()?);
    let (stop_tx, stop_rx) = stop_channel();
    let signals = setup_signal_stop_handler(stop_tx);
    let outcome = run_agent(&args.listen, caps, stop_rx).await;
    signals.abort();
    outcome
}
