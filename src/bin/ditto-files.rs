#[cfg(feature = "gateway")]
use std::path::PathBuf;
#[cfg(feature = "gateway")]
use std::sync::Arc;

#[cfg(feature = "gateway")]
use clap::Parser;

#[cfg(feature = "gateway")]
#[derive(Debug, Parser)]
#[command(name = "ditto-files")]
#[command(version, about = "Gemini-compatible Files API server", long_about = None)]
struct Cli {
    /// Config file (.json, .toml, or .yaml with `gateway-config-yaml`)
    config: PathBuf,

    /// Overrides `listen` from the config file
    #[arg(long, alias = "addr")]
    listen: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Export spans over OTLP/HTTP (requires `gateway-otel`)
    #[arg(long)]
    otel: bool,

    /// OTLP endpoint; defaults to the exporter's standard endpoint
    #[arg(long, requires = "otel")]
    otel_endpoint: Option<String>,
}

#[cfg(feature = "gateway")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _otel_guard = init_telemetry(cli.otel, cli.otel_endpoint.as_deref(), cli.json_logs)?;

    let mut config = ditto_files::gateway::ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    let addr = config.listen_addr()?;

    let Some(gateway) = ditto_files::gateway::FilesGateway::from_config(&config).await? else {
        return Err("files API is disabled (set files.enable = true)".into());
    };
    let gateway = Arc::new(gateway);

    let app = ditto_files::gateway::router(Arc::clone(&gateway));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        listen = %addr,
        mode = gateway.mode().as_str(),
        "ditto-files listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.close();
    tracing::info!("ditto-files stopped");
    Ok(())
}

#[cfg(feature = "gateway")]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(all(feature = "gateway", feature = "gateway-otel"))]
fn init_telemetry(
    enabled: bool,
    endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<ditto_files::gateway::otel::OtelGuard>, Box<dyn std::error::Error>> {
    if !enabled {
        ditto_files::gateway::logging::init_logging(json_logs)?;
        return Ok(None);
    }

    Ok(Some(ditto_files::gateway::otel::init_tracing(
        ditto_files::gateway::otel::DEFAULT_SERVICE_NAME,
        endpoint,
        json_logs,
    )?))
}

#[cfg(all(feature = "gateway", not(feature = "gateway-otel")))]
fn init_telemetry(
    enabled: bool,
    _endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<()>, Box<dyn std::error::Error>> {
    if enabled {
        return Err("otel requires `--features gateway-otel`".into());
    }
    ditto_files::gateway::logging::init_logging(json_logs)?;
    Ok(None)
}

#[cfg(not(feature = "gateway"))]
fn main() {
    eprintln!("gateway feature disabled; rebuild with --features gateway");
}
