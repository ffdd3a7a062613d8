//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Supervise MCP servers and call their tools
#[derive(Parser)]
#[command(name = "conduit", about, version, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Server registry file (default: <config dir>/conduit/servers.toml)
    #[arg(short, long, global = true, env = "CONDUIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(short, long, global = true, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Colored terminal output for humans
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List configured servers
    List {
        /// Show every field of each server
        #[arg(short, long)]
        detailed: bool,
    },

    /// Add a server to the registry
    Add {
        /// Unique server ID
        #[arg(short, long)]
        id: String,
        /// Human-readable server name (default: the ID)
        #[arg(short, long)]
        name: Option<String>,
        /// Command to start the server (stdio transport)
        #[arg(short, long)]
        command: Option<String>,
        /// URL of a remote server (http transport)
        #[arg(short, long)]
        url: Option<String>,
        /// Command-line arguments
        #[arg(short, long)]
        args: Vec<String>,
        /// Environment variables (KEY=VALUE format)
        #[arg(short = 'e', long)]
        env: Vec<String>,
        /// Authentication type (bearer, basic, api_key)
        #[arg(long)]
        auth_type: Option<String>,
        /// Authentication token (can use $ENV_VAR for env var references)
        #[arg(long)]
        auth_token: Option<String>,
        /// Do not connect this server automatically
        #[arg(long)]
        no_auto_start: bool,
        /// Seconds to wait for the server to come up
        #[arg(long)]
        connect_timeout: Option<u64>,
        /// Seconds to wait for a single call
        #[arg(long)]
        call_timeout: Option<u64>,
    },

    /// Remove a server from the registry
    Remove {
        /// Server ID to remove
        server_id: String,
    },

    /// Connect servers and report their state (default: auto-start servers)
    Status {
        /// Servers to connect
        server_ids: Vec<String>,
    },

    /// Show the tools a server advertises
    Tools {
        /// Server ID
        server_id: String,
    },

    /// Show the resources a server advertises
    Resources {
        /// Server ID
        server_id: String,
    },

    /// Read one resource
    Read {
        /// Server ID
        server_id: String,
        /// Resource URI
        uri: String,
    },

    /// Call a tool, asking for approval when the tool needs it
    Call {
        /// Server ID
        server_id: String,
        /// Tool name
        tool: String,
        /// JSON arguments
        #[arg(short, long)]
        args: Option<String>,
        /// Approve without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Interactive session: start, stop and restart servers and call tools
    Session,

    /// Connect servers and print every state change until Ctrl-C
    Watch {
        /// Servers to connect (default: auto-start servers)
        server_ids: Vec<String>,
    },
}
