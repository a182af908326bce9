use clap::Parser;
use env_logger::Env;
use playground_relay::cli::{run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    run(args).await?;
    Ok(())
}
