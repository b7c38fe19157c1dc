mod commands;
mod output;
mod runtime;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;

const CONFIG_ENV_VAR: &str = "SECRETS_FLEXVOL_CONFIG";
const LOG_ENV_VAR: &str = "SECRETS_FLEXVOL_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";
const CLI_AFTER_HELP: &str = r#"Examples:
  secrets-flexvol init
  secrets-flexvol create '{"name":"web"}'
  secrets-flexvol attach '{"io.rancher.secrets.token":"<token>","name":"web"}'
  secrets-flexvol mount /var/lib/kubelet/pods/<pod>/volumes/secrets <device>
  secrets-flexvol unmount /var/lib/kubelet/pods/<pod>/volumes/secrets
  secrets-flexvol detach <device>
  secrets-flexvol status <device>

Environment:
  CATTLE_URL, CATTLE_AGENT_ACCESS_KEY, CATTLE_AGENT_SECRET_KEY  secret service access
  SECRETS_FLEXVOL_CONFIG                                        config file path
  SECRETS_FLEXVOL_LOG                                           log filter (default: warn)

Every command prints one JSON object on stdout and exits 1 on failure.
"#;

/// Top-level command line parser.
#[derive(Debug, Parser)]
#[command(
    name = "secrets-flexvol",
    version,
    about = "Flexvolume driver materializing encrypted secrets on a tmpfs volume.",
    after_help = CLI_AFTER_HELP,
    arg_required_else_help = true,
    next_line_help = true
)]
pub struct Cli {
    /// Config file override path.
    /// Falls back to `SECRETS_FLEXVOL_CONFIG`, then `/etc/rancher/secrets-flexvol.toml`.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Disable config loading.
    #[arg(long)]
    pub no_config: bool,
    /// Volume root override.
    /// Default: `/var/lib/rancher/volumes/rancher-secrets`.
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Host private key override.
    /// Default: `/var/lib/rancher/etc/ssl/host.key`.
    #[arg(long)]
    pub host_key: Option<PathBuf>,
    /// Secret service base URL.
    #[arg(long, env = "CATTLE_URL", hide_env_values = true)]
    pub service_url: Option<String>,
    /// Secret service access key.
    #[arg(long, env = "CATTLE_AGENT_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,
    /// Secret service secret key.
    #[arg(long, env = "CATTLE_AGENT_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// Driver calls issued by the host.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reports readiness.
    Init,
    /// Creates the staging tmpfs for a named volume.
    Create {
        /// Volume options as JSON.
        options: String,
    },
    /// Tears down the staging device named in the options.
    Delete {
        /// Delete options as JSON.
        options: String,
    },
    /// Fetches, decrypts, and writes the volume's secrets.
    Attach {
        /// Attach parameters as JSON, including the one-time token.
        params: String,
        /// Node name passed by some hosts. Ignored.
        #[arg(hide = true)]
        node: Option<String>,
    },
    /// Unmounts and purges a staging device.
    Detach {
        /// Staging device path.
        device: PathBuf,
    },
    /// Bind-mounts a staging device onto a consumer directory.
    Mount {
        /// Consumer mount target.
        target: PathBuf,
        /// Staging device path.
        device: PathBuf,
        /// Mount options as JSON. Ignored.
        params: Option<String>,
    },
    /// Removes a consumer bind mount.
    Unmount {
        /// Consumer mount target.
        target: PathBuf,
    },
    /// Reports the observed state of a device or mount target.
    Status {
        /// Staging device or consumer target path.
        path: PathBuf,
    },
}

/// Runs CLI and returns process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    init_tracing();
    commands::run(cli)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
