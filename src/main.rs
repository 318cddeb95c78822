use clap::Parser;
use sth::{SthConfig, SthServer, logging};

#[derive(Parser, Debug)]
#[command(name = "sth", about = "Short Time Historic server")]
struct Args {
    #[arg(short, long, default_value = "sth-config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing();

    let config = SthConfig::from_file_or_default(&args.config)?;
    SthServer::bind(config).await?.serve().await
}
