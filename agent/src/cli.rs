use clap::Parser;

/// The port the server binds to when `--port` is not given.
pub const DEFAULT_PORT: u16 = 8000;

/// How long an unhandled fault may wait for a late handler before it is reported.
pub const DEFAULT_UNHANDLED_FAULT_DELAY_MS: u64 = 1000;

#[derive(Parser, Debug, Clone)]
#[command(name = "remote-agent", about = "Remote extension host agent")]
pub struct Args {
    /// The port the agent server listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The address the agent server binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Grace period, in milliseconds, during which a failed background operation may still be
    /// handled before it is reported as unhandled.
    #[arg(long, default_value_t = DEFAULT_UNHANDLED_FAULT_DELAY_MS)]
    pub unhandled_fault_delay_ms: u64,

    /// List the installed extensions and exit.
    #[arg(long)]
    pub list_extensions: bool,

    /// Uninstall the extension with the given identifier and exit.
    #[arg(long, value_name = "ID")]
    pub uninstall_extension: Option<String>,
}
