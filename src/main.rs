use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use osc_cli::payload::{cleanup::run_cleanup, copy::CopyPayload, direct::run_direct};
use osc_cli::session::DbSession;
use osc_cli::{CancelFlag, ConnectArgs, CopyArgs, OscError, ThreadRegistry};

#[derive(Parser)]
#[command(name = "osc_cli")]
#[command(about = "Online schema change for MySQL via shadow-table copy")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: shadow copy, change replay, atomic cutover
    Copy {
        #[command(flatten)]
        connect: ConnectArgs,

        #[command(flatten)]
        copy: CopyArgs,

        /// File with one CREATE TABLE statement per target table
        #[arg(long)]
        ddl_file: PathBuf,
    },
    /// Execute the DDL file natively, no shadow machinery
    Direct {
        #[command(flatten)]
        connect: ConnectArgs,

        #[arg(long)]
        ddl_file: PathBuf,
    },
    /// Drop artifacts recorded by an earlier unclean run
    Cleanup {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Specific state file; default scans the state directory
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Directory holding state files; defaults to the system temp dir
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Kill the running schema-change connection on the instance before
        /// dropping artifacts
        #[arg(long)]
        kill: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            if matches!(e, OscError::Cleanup(_)) {
                error!("state file retained; rerun `osc_cli cleanup` to finish");
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), OscError> {
    match cli.command {
        Commands::Copy {
            connect,
            copy,
            ddl_file,
        } => {
            let ddl = std::fs::read_to_string(&ddl_file)?;
            let cancel = CancelFlag::new();
            let registry = ThreadRegistry::new();
            spawn_signal_handler(cancel.clone(), registry.clone(), connect.clone());

            let payload = CopyPayload::new(&connect, copy, cancel, registry);
            let stats = payload.run(&ddl).await?;
            info!(
                rows_copied = stats.rows_copied,
                changes_replayed = stats.changes_replayed,
                "schema change finished"
            );
            Ok(())
        }
        Commands::Direct { connect, ddl_file } => {
            let ddl = std::fs::read_to_string(&ddl_file)?;
            run_direct(&connect.to_opts(), &ddl).await
        }
        Commands::Cleanup {
            connect,
            state_file,
            state_dir,
            kill,
        } => {
            let dir = state_dir.unwrap_or_else(std::env::temp_dir);
            run_cleanup(&connect.to_opts(), &dir, state_file.as_deref(), kill).await
        }
    }
}

/// On SIGINT, set the cooperative cancel flag and abort in-flight statements
/// from a side session so blocked workers notice promptly.
fn spawn_signal_handler(cancel: CancelFlag, registry: ThreadRegistry, connect: ConnectArgs) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("termination signal received, cancelling run");
        cancel.cancel();
        let pool = connect.to_opts().pool();
        match DbSession::connect(&pool).await {
            Ok(mut side) => {
                for thread_id in registry.thread_ids() {
                    if let Err(e) = side.kill_query(thread_id).await {
                        warn!(thread_id, error = %e, "failed to kill in-flight query");
                    }
                }
            }
            Err(e) => warn!(error = %e, "no side session for query kill"),
        }
    });
}
