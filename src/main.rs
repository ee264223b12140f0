use clap::Parser;
use tracing_subscriber::EnvFilter;

use docship::{run, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(error) => {
            eprintln!("[ERROR] {error:#}");
            std::process::exit(1);
        }
    }
}
