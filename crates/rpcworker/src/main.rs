mod cli;
mod exit;
mod handlers;
mod logging;

use clap::error::ErrorKind;
use clap::Parser;
use rpcworker::proto::TERMINATE_NORMAL;
use rpcworker::runtime::{Shutdown, Worker, WorkerConfig};
use tracing::info;

use crate::cli::WorkerArgs;
use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::logging::init_logging;

fn main() {
    let args = match WorkerArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit::SUCCESS,
                _ => USAGE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_logging(args.log_format, args.log_level);

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

fn run(args: WorkerArgs) -> CliResult<i32> {
    let config = args.into_config().map_err(exit::startup_error)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;
    let local = tokio::task::LocalSet::new();
    let shutdown = local
        .block_on(&runtime, serve(config))
        .map_err(|err| exit::worker_error("worker failed", err))?;

    Ok(exit::shutdown_code(&shutdown))
}

async fn serve(config: WorkerConfig) -> rpcworker::runtime::Result<Shutdown> {
    let worker = Worker::new(config, handlers::registry());
    let handle = worker.handle();
    tokio::task::spawn_local(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, terminating");
            handle.terminate(TERMINATE_NORMAL, "interrupted");
        }
    });
    worker.run().await
}
