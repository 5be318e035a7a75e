//! Bosun CLI - GitOps control-plane bootstrap installer

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod commands;
mod display;
mod error;
mod exit_codes;

#[derive(Parser)]
#[command(name = "bosun")]
#[command(version)]
#[command(about = "Bootstrap a GitOps control plane onto a fresh cluster", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress progress output
    #[arg(long, global = true)]
    silent: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the GitOps controller and root applications
    Install {
        /// Target cluster identifier (context becomes k3d-<cluster>)
        cluster: String,

        /// Deployment mode
        #[arg(long, default_value = "tenant-oss")]
        mode: String,

        /// Skip CRD installation (pre-provisioned environments)
        #[arg(long)]
        skip_crds: bool,

        /// Validate and render without mutating the cluster
        #[arg(long)]
        dry_run: bool,

        /// Never prompt; fail instead
        #[arg(long)]
        non_interactive: bool,

        /// Controller values overrides (key=value)
        #[arg(long = "set")]
        set: Vec<String>,

        /// TLS certificate for the controller server endpoint
        #[arg(long, requires = "tls_key")]
        tls_cert: Option<PathBuf>,

        /// TLS key for the controller server endpoint
        #[arg(long, requires = "tls_cert")]
        tls_key: Option<PathBuf>,

        /// App-of-apps chart path; enables the app-of-apps phase
        #[arg(long)]
        app_chart: Option<PathBuf>,

        /// Values file for the app-of-apps release
        #[arg(long, requires = "app_chart")]
        app_values: Option<PathBuf>,

        /// Namespace for the app-of-apps release
        #[arg(long, default_value = "argocd")]
        app_namespace: String,

        /// Helm timeout for the app-of-apps release (e.g. "5m")
        #[arg(long)]
        app_timeout: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.debug, cli.silent);

    // First Ctrl+C requests a clean stop; phases observe the token and
    // finish their in-flight call before unwinding.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Install {
            cluster,
            mode,
            skip_crds,
            dry_run,
            non_interactive,
            set,
            tls_cert,
            tls_key,
            app_chart,
            app_values,
            app_namespace,
            app_timeout,
        } => {
            commands::install::run(
                commands::install::InstallArgs {
                    cluster,
                    mode,
                    skip_crds,
                    dry_run,
                    silent: cli.silent,
                    debug: cli.debug,
                    non_interactive,
                    set,
                    tls_cert,
                    tls_key,
                    app_chart,
                    app_values,
                    app_namespace,
                    app_timeout,
                },
                &cancel,
            )
            .await
        }
    };

    if let Err(e) = result {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
}

fn init_logging(debug: bool, silent: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if debug {
        "bosun=debug,info"
    } else if silent {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
