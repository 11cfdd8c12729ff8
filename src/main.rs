// src/main.rs

use std::process::ExitCode;

use ffapipe::cli::{self, Command};
use ffapipe::errors::PipelineError;
use ffapipe::{logging, run, run_monitor};

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => code,
        Err(err) => {
            if let Some(PipelineError::Environment { summary, .. }) = err.downcast_ref() {
                eprint!("{summary}");
            }
            eprintln!("ffapipe error: {err:?}");
            ExitCode::from(2)
        }
    }
}

async fn run_main() -> anyhow::Result<ExitCode> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    match args.command {
        Command::Run(run_args) => {
            let summary = run(&run_args).await?;
            if run_args.dry_run {
                return Ok(ExitCode::SUCCESS);
            }
            eprint!("{summary}");
            Ok(if summary.all_done() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Monitor(monitor_args) => {
            run_monitor(&monitor_args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
