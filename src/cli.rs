use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "benchlink", about = "Scripted hardware test bench over serial or TCP")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Run a command script against the configured device
    Run(RunOpts),
    /// Read temperature, current and power once per interval
    Poll(PollOpts),
    /// List serial ports on this host
    Ports,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigOpts {
    /// Bench configuration (YAML); built-in defaults when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub cfg: ConfigOpts,
    /// Command script (YAML)
    #[arg(long)]
    pub script: PathBuf,
    /// Print the full run as JSON instead of a summary
    #[arg(long, default_value_t = false)]
    pub json: bool,
    /// Skip the reachability probe
    #[arg(long, default_value_t = false)]
    pub no_probe: bool,
    /// Do not poll telemetry during the run
    #[arg(long, default_value_t = false)]
    pub no_telemetry: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PollOpts {
    #[command(flatten)]
    pub cfg: ConfigOpts,
    /// Number of polling rounds
    #[arg(long, default_value_t = 1)]
    pub count: u32,
    /// Seconds between rounds
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,
}
