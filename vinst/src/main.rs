// vinst/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use vinst_common::config::{logs_dir, Config};
use vinst_common::error::{Result as VinstResult, VinstError};
use vinst_common::manifest::ReleaseSpec;

mod cli;
use cli::CliArgs;

fn init_tracing(verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("VINST_LOG")
        .from_env_lossy();

    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let log_dir = logs_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Warning:".yellow(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr.with_max_level(max_log_level))
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "vinst.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    // Keep the writer thread alive for the life of the process.
    Box::leak(Box::new(guard));

    debug!(
        "Verbose logging enabled. Writing logs to: {}/vinst.log",
        log_dir.display()
    );
}

async fn run(cli_args: &CliArgs) -> VinstResult<()> {
    let Some(manifest) = cli_args.config.as_deref() else {
        return Err(VinstError::Config(
            "no release manifest given; pass -c/--config <PATH>".to_string(),
        ));
    };
    let spec = ReleaseSpec::load(manifest)?;
    let config = Config::load(&spec, cli_args.install_root.as_deref())?;
    debug!(
        "Loaded {} {} (install root {})",
        spec.name,
        spec.version,
        config.install_root().display()
    );
    cli_args.command.run(spec, config, cli_args.yes).await
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    init_tracing(cli_args.verbose);

    if let Err(e) = run(&cli_args).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        if e.is_preflight() {
            eprintln!("{}", "The install root was not modified.".dimmed());
        }
        process::exit(1);
    }

    debug!("Command completed successfully.");
}
