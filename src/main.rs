use mcqfw::config::Config;

fn main() -> anyhow::Result<()> {
    let config = Config::parse_validated()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!(?config, "starting mcqfw");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcqfw::run(config))
}
