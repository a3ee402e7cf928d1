use anyhow::Result;
use clap::Parser;
use uttercut::cli::{Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
