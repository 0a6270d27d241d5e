use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the todo-frontend binary.
#[derive(Debug, Parser)]
#[command(
    name = "todo-frontend",
    version,
    about = "Todo frontend serving a cached, periodically refreshed image"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TODO_FRONTEND_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP frontend.
    Serve(Box<ServeArgs>),
    /// Print the cache snapshot as JSON.
    Status,
    /// Fetch a new image into the cache now.
    Refresh,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

/// Overrides shared by every command. Each also reads the deployment's
/// plain environment variable.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the cache directory.
    #[arg(long = "cache-dir", env = "CACHE_DIR", value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Override the image time-to-live.
    #[arg(
        long = "cache-ttl-seconds",
        env = "CACHE_TTL_SECONDS",
        value_name = "SECONDS",
        global = true
    )]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the URL the image is fetched from.
    #[arg(long = "image-url", env = "IMG_URL", value_name = "URL", global = true)]
    pub image_url: Option<String>,

    /// Override the image fetch timeout.
    #[arg(long = "source-timeout-seconds", value_name = "SECONDS", global = true)]
    pub source_timeout_seconds: Option<u64>,

    /// Override the deployment namespace.
    #[arg(long = "namespace", env = "POD_NAMESPACE", value_name = "NAME", global = true)]
    pub namespace: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", env = "LOG_LEVEL", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,
}
