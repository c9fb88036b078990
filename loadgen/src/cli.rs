//! Command line entry point of `s3-loadgen`.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::loadgen::{LoadGenerator, create_store};
use crate::{observability, report};

/// Synthetic load generator for S3-compatible object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Prepare(PrepareCommand),
    Version(VersionCommand),
}

/// generate load until interrupted, then print a report
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// create the buckets and write the read corpus, then exit
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "prepare")]
struct PrepareCommand {}

/// print the load generator version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadgen-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let metrics_guard = observability::init_metrics(&config)?;

    let result = runtime.block_on(async move {
        let store = create_store(&config.store)?;
        let loadgen = LoadGenerator::new(store, &config);

        match args.command {
            Command::Run(RunCommand {}) => run(loadgen).await,
            Command::Prepare(PrepareCommand {}) => {
                let summary = loadgen.populate().await?;
                report::print_populate(&summary);
                Ok(())
            }
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    });

    // Flush metrics unconditionally before shutdown, even on error.
    runtime.block_on(async {
        if let Some(metrics_guard) = metrics_guard {
            metrics_guard.flush(None).await.ok();
        }
    });

    result
}

async fn run(loadgen: LoadGenerator) -> Result<()> {
    merni::counter!("loadgen.start": 1);

    let shutdown = async {
        elegant_departure::tokio::depart()
            .on_termination()
            .on_sigint()
            .on_signal(SignalKind::hangup())
            .on_signal(SignalKind::quit())
            .await;
        tracing::info!("shutting down ...");
    };

    let summary = loadgen.run(shutdown).await?;
    report::print_report(&summary);
    Ok(())
}
