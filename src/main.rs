use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use amenityd::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use amenityd::tenant::TenantManager;
use amenityd::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server settings, each read from an `AMENITYD_*` variable.
struct Config {
    bind: String,
    port: u16,
    data_dir: PathBuf,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    fn from_env() -> Self {
        Self {
            bind: env_or("AMENITYD_BIND", "0.0.0.0".to_string()),
            port: env_or("AMENITYD_PORT", 5433),
            data_dir: env_or("AMENITYD_DATA_DIR", PathBuf::from("./data")),
            password: env_or("AMENITYD_PASSWORD", "amenityd".to_string()),
            max_connections: env_or("AMENITYD_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("AMENITYD_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("AMENITYD_METRICS_PORT").ok().and_then(|s| s.parse().ok()),
            tls_cert: std::env::var("AMENITYD_TLS_CERT").ok(),
            tls_key: std::env::var("AMENITYD_TLS_KEY").ok(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let Config {
        bind,
        port,
        data_dir,
        password,
        max_connections,
        compact_threshold,
        metrics_port,
        tls_cert,
        tls_key,
    } = Config::from_env();

    amenityd::observability::init(metrics_port)?;
    let tls_acceptor = amenityd::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;
    let tenant_manager = Arc::new(TenantManager::new(data_dir.clone(), compact_threshold));
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "amenityd listening on {addr} (data_dir {}, max_connections {max_connections}, tls {}, metrics {})",
        data_dir.display(),
        if tls_acceptor.is_some() { "on" } else { "off" },
        metrics_port.map_or("off".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")),
    );

    // Stop accepting on SIGTERM or ctrl-c, then drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    drain(&semaphore, max_connections, DRAIN_TIMEOUT).await;
    info!("amenityd stopped");
    Ok(())
}

/// Wait until every connection permit is back, or `timeout` passes.
async fn drain(semaphore: &Semaphore, max_connections: usize, timeout: Duration) {
    let open = || max_connections - semaphore.available_permits();
    info!("draining {} connections", open());
    let deadline = tokio::time::Instant::now() + timeout;
    while open() > 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("drain timeout, {} connections still open", open());
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}
