//! control-runner: connects one controller to a running crowd simulation.
//!
//! Usage:
//!   control-runner --scenario corridors.scenario --port 9999 --client-mode
//!   control-runner --config runner.json --controller-type corridors --json
//!   control-runner --scenario a.scenario --server-mode --port 9997
//!
//! Exit code 0 when the session ended cleanly, 1 on a fatal channel or
//! protocol error.

use anyhow::{Context, Result};
use crowdctl_core::{
    channel::ConnectionMode,
    config::{RunnerConfig, SessionConfig},
    controller::controller_from_name,
    manager::{ConnectionManager, EndReason, SessionReport},
    scenario::Scenario,
};
use std::env;

const DEFAULT_CONTROLLER: &str = "distribute_over_corridors";

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    session: &'a SessionConfig,
    report:  &'a SessionReport,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = build_config(&args)?;
    let json = args.iter().any(|a| a == "--json");

    let controller_type = config
        .controller_type
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTROLLER.to_string());
    let mut controller = controller_from_name(&controller_type, &config)?;
    log::debug!("controller '{}' built from '{controller_type}'", controller.name());

    let scenario_path = config
        .scenario
        .as_deref()
        .context("No scenario given: pass --scenario <path> or set \"scenario\" in --config")?;
    let scenario = Scenario::from_file(scenario_path)?;

    if !json {
        println!("crowdctl control-runner");
        println!("  controller: {}", controller.name());
        println!("  engine:     {}:{}", config.session.host, config.session.port);
        println!("  mode:       {:?}", config.session.mode);
        println!("  scenario:   {} ({} bytes)", scenario.file_name, scenario.content.len());
        println!();
    }

    let manager = ConnectionManager::new(config.session.clone());
    let report = manager.start(controller.as_mut(), &scenario)?;

    if json {
        let summary = RunSummary { session: manager.config(), report: &report };
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_summary(&report);
    }

    if let Some(error) = &report.error {
        log::error!("[{}] session ended uncleanly: {error}", report.session_id);
        std::process::exit(1);
    }
    log::info!(
        "[{}] session ended cleanly after {} steps",
        report.session_id,
        report.steps_seen
    );
    Ok(())
}

/// Config file first (if any), then command-line flags on top.
fn build_config(args: &[String]) -> Result<RunnerConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };

    let session = &mut config.session;
    if let Some(host) = flag_value(args, "--host-name") {
        session.host = host.to_string();
    }
    session.port = parse_arg(args, "--port", session.port);
    session.connect_timeout_ms = parse_arg(args, "--connect-timeout-ms", session.connect_timeout_ms);
    if let Some(ms) = flag_value(args, "--read-timeout-ms") {
        let ms: u64 = ms
            .parse()
            .with_context(|| format!("--read-timeout-ms expects milliseconds, got {ms}"))?;
        session.read_timeout_ms = Some(ms);
    }
    if args.iter().any(|a| a == "--server-mode") {
        session.mode = ConnectionMode::Server;
    } else if args.iter().any(|a| a == "--client-mode") {
        session.mode = ConnectionMode::Client;
    }
    if args.iter().any(|a| a == "--gui-mode") {
        session.gui_mode = true;
    }

    if let Some(name) = flag_value(args, "--controller-type") {
        config.controller_type = Some(name.to_string());
    }
    if let Some(path) = flag_value(args, "--scenario") {
        config.scenario = Some(path.to_string());
    }
    Ok(config)
}

fn print_summary(report: &SessionReport) {
    let ended = match &report.end_reason {
        EndReason::EngineClosed { reason: Some(reason) } => format!("engine closed ({reason})"),
        EndReason::EngineClosed { reason: None } => "engine closed".to_string(),
        EndReason::ControllerDisconnected => "controller disconnected".to_string(),
        EndReason::Failed { error } => format!("FAILED: {error}"),
    };
    let last_time = report
        .last_time
        .map(|t| format!("{t:.2}"))
        .unwrap_or_else(|| "-".to_string());

    println!("=== SESSION SUMMARY ===");
    println!("  session_id:   {}", report.session_id);
    println!("  engine:       {}", report.engine);
    println!("  controller:   {}", report.controller);
    println!("  ended:        {ended}");
    println!("  steps seen:   {}", report.steps_seen);
    println!("  invocations:  {}", report.invocations);
    println!("  commands:     {}", report.commands_issued);
    println!("  last time:    {last_time}");
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
