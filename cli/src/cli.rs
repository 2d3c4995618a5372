use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "courier")]
#[command(version)]
#[command(about = "Typed command IPC over Unix sockets and named pipes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host the demo handlers until Ctrl-C
    Serve(ServeArgs),

    /// Send Ping commands to a running server
    Ping(PingArgs),

    /// Send an Echo command to a running server
    Echo(EchoArgs),

    /// Print the type hash of a command name
    Hash(HashArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct PingArgs {
    /// Number of pings to send
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct EchoArgs {
    /// Text the server sends back
    pub text: String,

    /// Deliver to this target id
    #[arg(long)]
    pub target: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args)]
pub struct HashArgs {
    /// Stable command name
    pub name: String,

    /// Command version mixed into the hash
    #[arg(long = "command-version")]
    pub command_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    Msgpack,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffArg {
    Linear,
    Exponential,
}

/// Transport and pipeline options shared by subcommands
#[derive(Args, Default)]
pub struct CommonArgs {
    // === Transport ===
    /// Base name of the named pipes (Windows) and default socket name
    #[arg(long, env = "COURIER_PIPE_NAME")]
    pub pipe_name: Option<String>,

    /// Base path of the Unix sockets; instance i listens on <path>.<i>
    #[arg(long, env = "COURIER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Number of listener instances
    #[arg(long)]
    pub instances: Option<usize>,

    /// Number of pooled client transports
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Wire codec
    #[arg(long, value_enum)]
    pub codec: Option<CodecArg>,

    // === Timeouts ===
    /// Budget for one client call, retries included (milliseconds)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Budget for one handler invocation (milliseconds)
    #[arg(long)]
    pub business_timeout_ms: Option<u64>,

    // === Retry ===
    /// Total attempts per call
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Delay growth between attempts
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffArg>,

    /// Disable retry jitter
    #[arg(long)]
    pub no_jitter: bool,
}
