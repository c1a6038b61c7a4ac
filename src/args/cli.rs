use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::parsers::{parse_agent_address, parse_timer_factor};

/// Address an agent listens on when `--listen` is not given.
pub const DEFAULT_AGENT_LISTEN: &str = "0.0.0.0:1099";

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Concurrent virtual-user load engine - throughput pacing, rendezvous barriers, named critical sections and distributed agents."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a test plan locally or across remote agents
    Run(RunArgs),
    /// Serve as a remote execution agent
    Agent(AgentArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Test plan file (.toml or .json)
    #[arg(long = "plan", short = 'p', env = "THRONG_PLAN")]
    pub plan: PathBuf,

    /// Comma-separated agent addresses; runs the plan remotely instead of locally
    #[arg(long = "remote", short = 'R', value_delimiter = ',', value_parser = parse_agent_address)]
    pub remote: Option<Vec<String>>,

    /// Extra connect attempts per agent
    #[arg(long = "retries")]
    pub retries: Option<u32>,

    /// Delay between connect attempts in milliseconds
    #[arg(long = "retry-delay-ms")]
    pub retry_delay_ms: Option<u64>,

    /// Keep going with the reachable agents when some fail to come up
    #[arg(long = "continue-on-fail")]
    pub continue_on_fail: bool,

    /// Multiplier applied to every timer delay (0 disables pacing)
    #[arg(long = "timer-factor", default_value_t = 1.0, value_parser = parse_timer_factor)]
    pub timer_factor: f64,

    /// Write the run summary as JSON to this path
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// Address to accept coordinator connections on
    #[arg(long = "listen", short = 'l', default_value = DEFAULT_AGENT_LISTEN, env = "THRONG_AGENT_LISTEN")]
    pub listen: String,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}

impl Command {
    #[must_use]
    pub const fn verbose(&self) -> bool {
        match self {
            Self::Run(args) => args.verbose,
            Self::Agent(args) => args.verbose,
        }
    }
}
