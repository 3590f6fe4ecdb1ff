use std::fs::File;

use anyhow::{Context, Result};
use cash_ledger::{bin_utils::Service, config::Config};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("Expected a script file name as the first argument")?;
    let config = match args.next() {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config `{path}`"))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("Invalid log filter `{}`", config.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;
    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err}")),
    };
    service.run()
}
