mod config;
mod connection;
mod gateway;
mod metrics;
mod server;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "relaymx.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match config::Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %args.config.display(), error = %e, "config file unreadable, starting with defaults");
            config::Config::default()
        }
    };

    server::run(config).await
}
