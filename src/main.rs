use anyhow::Result;
use clap::Parser;
use ledgerwell::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ledgerwell::telemetry::init(cli.verbose, cli.log_format);
    cli.run().await
}
