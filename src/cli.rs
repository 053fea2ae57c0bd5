use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Transport the JSON-RPC server listens on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// Server-sent events plus HTTP POST on /mcp
    Sse,
}

#[derive(Parser, Debug)]
#[command(name = "vagrant-mcp")]
#[command(about = "Drive Vagrant development VMs over a JSON-RPC tool protocol", long_about = None)]
#[command(version = env!("VAGRANT_MCP_VERSION"))]
pub struct Cli {
    /// Transport to serve on
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// HTTP port for the SSE transport
    #[arg(long, env = "MCP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory holding one subdirectory per VM [default: ~/.vagrant-mcp/vms]
    #[arg(long = "base-dir", env = "VM_BASE_DIR")]
    pub base_dir: Option<PathBuf>,
}
