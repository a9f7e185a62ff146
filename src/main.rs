use chrono::Local;
use clap::Parser;
use skolkarta::{
    config::{Args, Config},
    info_time,
    process::run,
    Result,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let start_time = Local::now();
    let config = Config::from_args(Args::parse())?;
    run(config).await?;
    info_time!(start_time, "Full program time:");

    Ok(())
}
