//! cloudtari launcher - starts one emulator session and prints its address.
//!
//! This is the entry point for the `start-game` binary. Stdout carries a
//! small line protocol read by the web front end:
//!
//! ```text
//! current_clients=3
//! port=8081
//! address=10.0.0.5:8081
//! url=http://10.0.0.5:8081/
//! ```
//!
//! or `server full` when every slot is taken. When no port is free or the
//! session is never placed, the address line reads `address=problem:0`.
//! Logs go to stderr.
//!
//! The front end already holds `/tmp/cloudtari_lock.txt` while this runs, so
//! the launch lock is only taken when `--lock-path` or `CLOUDTARI_LOCK_PATH`
//! names one.

mod lock;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use cloudtari_scheduler::{KubeCluster, LaunchConfig, Launcher, SchedulerError};

use lock::LaunchLock;

/// Exit code for failures outside the launch flow itself.
const EXIT_SETUP_FAILURE: u8 = 5;

/// Start a cloudtari emulator session on the cluster.
#[derive(Parser, Debug)]
#[command(name = "start-game")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ROM file to run, relative to the emulator's ROM directory.
    rom: Option<String>,

    /// Kubernetes namespace for session jobs.
    #[arg(long, env = "CLOUDTARI_NAMESPACE")]
    namespace: Option<String>,

    /// Emulator container image.
    #[arg(long, env = "CLOUDTARI_IMAGE")]
    image: Option<String>,

    /// Maximum number of concurrent sessions.
    #[arg(long, env = "CLOUDTARI_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Seconds to wait for the session to be placed.
    #[arg(long)]
    resolve_timeout_secs: Option<u64>,

    /// Lock file serializing launches on this host. Must not be the file
    /// the front end already holds.
    #[arg(long)]
    lock_path: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    /// Environment config with command-line overrides applied.
    fn launch_config(&self, base: LaunchConfig) -> LaunchConfig {
        let mut config = base;

        if let Some(namespace) = &self.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Some(image) = &self.image {
            config.image.clone_from(image);
        }
        if let Some(max) = self.max_clients {
            config.max_clients = max;
        }
        if let Some(secs) = self.resolve_timeout_secs {
            config.resolve_timeout_secs = secs;
        }
        if let Some(path) = &self.lock_path {
            config.lock_path = Some(path.clone());
        }

        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_tracing(args.debug);

    let Some(rom) = args.rom.as_deref() else {
        println!("Usage: start-game <romfile>");
        return ExitCode::SUCCESS;
    };

    match run(&args, rom).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = report_failure(&e, &mut std::io::stdout().lock());
            eprintln!("error: {e:#}");
            ExitCode::from(code)
        }
    }
}

/// Write the stdout lines the front end expects for a failed launch and
/// pick the exit code.
fn report_failure(err: &anyhow::Error, out: &mut impl Write) -> u8 {
    let Some(err) = err.downcast_ref::<SchedulerError>() else {
        return EXIT_SETUP_FAILURE;
    };

    let line = match err {
        SchedulerError::ServerFull { .. } => Some("server full"),
        SchedulerError::NoFreePort { .. } | SchedulerError::ResolveTimeout { .. } => {
            Some("address=problem:0")
        }
        _ => None,
    };
    if let Some(line) = line {
        // Stdout going away leaves nothing to report to.
        let _ = writeln!(out, "{line}");
    }

    err.exit_code()
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "info,cloudtari_scheduler=debug,start_game=debug"
    } else {
        "warn,cloudtari_scheduler=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: &Args, rom: &str) -> anyhow::Result<()> {
    let config = args.launch_config(LaunchConfig::from_env());
    config.validate()?;

    tracing::debug!(
        namespace = %config.namespace,
        image = %config.image,
        max_clients = config.max_clients,
        "Loaded launch configuration"
    );

    // Held until the session has been resolved or the launch has failed.
    let _lock = acquire_lock(&config).await?;

    let cluster = KubeCluster::new(&config)
        .await
        .context("cannot connect to the Kubernetes cluster")?;
    let launcher = Launcher::new(cluster, config);

    let plan = launcher.plan(rom).await?;
    println!("current_clients={}", plan.active_clients);
    println!("port={}", plan.port);

    let outcome = launcher.start(plan).await?;
    println!("address={}", outcome.address);
    println!("url={}", outcome.url());

    Ok(())
}

async fn acquire_lock(config: &LaunchConfig) -> anyhow::Result<Option<LaunchLock>> {
    match &config.lock_path {
        Some(path) => Ok(Some(LaunchLock::acquire(path).await?)),
        None => Ok(None),
    }
}
