use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use benchlink_lib::config::BenchConfig;
use benchlink_lib::orchestrator::{TestCallbacks, TestOrchestrator, TestState};
use benchlink_lib::protocol::TelemetryKind;
use benchlink_lib::telemetry::{poll_once, TelemetryEvent};
use benchlink_lib::transport;
use benchlink_lib::CommandScript;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Cli::parse();
    match args.cmd {
        cli::Cmd::Run(opts) => run(opts).await,
        cli::Cmd::Poll(opts) => poll(opts).await,
        cli::Cmd::Ports => ports(),
    }
}

fn load_config(opts: &cli::ConfigOpts) -> Result<BenchConfig> {
    match &opts.config {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => {
            log::info!("No configuration given, using defaults");
            Ok(BenchConfig::default())
        }
    }
}

async fn run(opts: cli::RunOpts) -> Result<()> {
    let mut config = load_config(&opts.cfg)?;
    if opts.no_probe {
        config.test.probe_enabled = false;
    }
    if opts.no_telemetry {
        config.telemetry.enabled = false;
    }

    let script = CommandScript::load(&opts.script)
        .with_context(|| format!("loading script {}", opts.script.display()))?;
    if script.is_empty() {
        return Err(anyhow!("script {} has no usable commands", opts.script.display()));
    }

    let orchestrator = TestOrchestrator::from_script(config, &script);
    let callbacks = TestCallbacks::new(
        |state: TestState, message: &str| log::info!("[{}] {}", state, message),
        |message: &str| log::error!("{}", message),
        |run| log::info!("Run {} finished in state {}", run.id, run.state),
    )
    .with_result_observer(|result| {
        log::info!(
            "#{} {} -> {:?}",
            result.command.seq,
            result.command.description,
            result.decode_status
        )
    })
    .with_telemetry_observer(|event| match event {
        TelemetryEvent::Reading(reading) => {
            log::info!("{} = {} {}", reading.kind, reading.value, reading.kind.unit())
        }
        TelemetryEvent::Error { kind, message } => log::debug!("{} poll failed: {}", kind, message),
    });

    orchestrator.start_test(callbacks).await?;

    let run = tokio::select! {
        run = orchestrator.wait_for_completion() => run,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, stopping test");
            orchestrator.stop_test().await;
            orchestrator.get_test_results().await
        }
    };
    // Joins the run task; a no-op for a run that already finished
    orchestrator.stop_test().await;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print!("{}", run.summary());
        for result in run.results_in_command_order() {
            println!(
                "  #{:<3} {:<32} {}",
                result.command.seq,
                result.command.description,
                if result.passed() { "ok" } else { "FAIL" }
            );
        }
        for command in &run.failed_commands {
            let reason = command
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("  #{:<3} {:<32} {}", command.seq, command.description, reason);
        }
    }

    if run.passed() {
        Ok(())
    } else {
        Err(anyhow!("test run did not pass ({})", run.state))
    }
}

async fn poll(opts: cli::PollOpts) -> Result<()> {
    let config = load_config(&opts.cfg)?;
    let endpoint = config.communication.endpoint()?;
    let response_timeout = config.response_timeout()?;
    let interval = Duration::try_from_secs_f64(opts.interval)
        .context("--interval must be a non-negative number of seconds")?;

    let mut link = endpoint.build();
    link.open()
        .await
        .with_context(|| format!("opening {}", endpoint))?;
    let link = transport::share(link);

    for round in 0..opts.count {
        if round > 0 {
            tokio::time::sleep(interval).await;
        }
        for kind in TelemetryKind::ALL {
            match poll_once(&link, kind, response_timeout).await {
                Ok(reading) => println!("{:<12} {:>10.3} {}", kind, reading.value, kind.unit()),
                Err(e) => println!("{:<12} error: {}", kind, e),
            }
        }
    }

    link.lock().await.close().await?;
    Ok(())
}

fn ports() -> Result<()> {
    let ports = transport::list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {} {}",
                port.port_name,
                vid,
                pid,
                port.manufacturer.unwrap_or_default(),
                port.product.unwrap_or_default()
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}
