//! dllama-bench CLI entry point

use anyhow::{Context, Result};
use dllama_bench::command;
use dllama_bench::config::{cli::Cli, toml::load_config, validator::validate_config};
use dllama_bench::driver;
use dllama_bench::output::text;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    init_tracing(cli.debug);

    println!("dllama-bench v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = load_config(&cli)?;
    validate_config(&config).context("Configuration validation failed")?;

    if cli.dry_run {
        let worker = (!config.cluster.workers.is_empty())
            .then(|| command::worker_command(&config.inference).to_shell_string());
        let master = command::master_command(&config.inference, &config.cluster.workers);
        text::print_run_header(&config, &master.to_shell_string(), worker.as_deref());
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(driver::run(&config))?;

    Ok(())
}

/// INFO by default, DEBUG with `--debug`; `RUST_LOG` overrides both
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
