use stratusd::daemon::{DaemonConfig, DaemonRuntime};
use stratusd::sync::store::NodeStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Reset,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--reset" => mode = CliMode::Reset,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: stratusd [--once] [--reset]");
            println!("  --once    Run one reconcile pass and queue drain, then exit");
            println!("  --reset   Clear the local node cache and exit");
            Ok(())
        }
        CliMode::Reset => {
            let store = match std::env::var("STRATUS_DATABASE_URL").ok() {
                Some(url) => NodeStore::new(&url).await?,
                None => NodeStore::new_default().await?,
            };
            store.clear().await?;
            tracing::info!("local node cache cleared");
            Ok(())
        }
        CliMode::Once => {
            let config = DaemonConfig::from_env()?;
            let runtime = DaemonRuntime::bootstrap(config).await?;
            runtime.run_once().await
        }
        CliMode::Run => {
            let config = DaemonConfig::from_env()?;
            let runtime = DaemonRuntime::bootstrap(config).await?;
            runtime.run().await
        }
    }
}
