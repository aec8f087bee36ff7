use std::process;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reconcile::cli::{
    await_exit_code, format_await_reports, format_kind_rules, format_kinds, format_plan,
    format_violations, plan_documents, run_await, Cli, CommandError, Commands, OutputFormat,
    TOKEN_ENV_VAR,
};
use reconcile::config::load_config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Plan(args) => match plan_documents(args.kind, &args.desired, &args.observed) {
            Ok(plan) => {
                match args.output {
                    OutputFormat::Text => print!("{}", format_plan(&plan)),
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                }
                Ok(0)
            }
            Err(CommandError::Plan(err)) => {
                match args.output {
                    OutputFormat::Text => eprint!("{}", format_violations(&err)),
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&err.violations)?)
                    }
                }
                Ok(3)
            }
            Err(e) => Err(e.into()),
        },

        Commands::Await(args) => {
            let config = load_config(cli.config.as_deref()).context("loading config")?;
            // Re-read after --env-file so tokens defined there are picked up
            let args = args.with_token_fallback(std::env::var(TOKEN_ENV_VAR).ok());

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling");
                    on_signal.cancel();
                }
            });

            let reports = run_await(&args, &config, &cancel).await?;
            info!(resources = reports.len(), "All waits finished");
            match args.output {
                OutputFormat::Text => print!("{}", format_await_reports(&reports)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
            }
            Ok(await_exit_code(&reports))
        }

        Commands::Kinds(args) => {
            match args.kind {
                Some(kind) => print!("{}", format_kind_rules(kind)),
                None => print!("{}", format_kinds()),
            }
            Ok(0)
        }
    }
}
