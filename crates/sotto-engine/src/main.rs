use sotto_engine::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_VOICE, RuntimePaths, Supervisor};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let paths = RuntimePaths::from_env();
    tracing::info!(data_root = %paths.base_dir().display(), "sotto engine supervisor starting");

    let supervisor = Supervisor::new(paths);
    supervisor.install_if_needed().await?;

    let host = env_or("SOTTO_HOST", DEFAULT_HOST);
    let port = std::env::var("SOTTO_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let voice = env_or("SOTTO_VOICE", DEFAULT_VOICE);
    let auto_restart = std::env::var("SOTTO_AUTO_RESTART")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    supervisor.start(&host, port, &voice, auto_restart).await?;
    tracing::info!(%host, port, "speech service is up; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    supervisor.stop().await;

    Ok(())
}
