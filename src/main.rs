use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use stayd::clock::SystemClock;
use stayd::config::Config;
use stayd::engine::Engine;
use stayd::payment::PaymentCoordinator;
use stayd::payment::http::HttpGateway;
use stayd::{observability, reconciler, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing();

    let config = Config::from_env();
    observability::init_metrics(config.metrics_port)?;

    let tls_acceptor =
        stayd::tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(SystemClock))?);

    if config.payment.api_key.is_empty() {
        tracing::warn!("STAYD_PAYMENT_API_KEY is not set; charges will be refused by the gateway");
    }
    let gateway = HttpGateway::new(
        &config.payment.api_base,
        &config.payment.api_key,
        config.payment.timeout,
    )?;
    let payments = Arc::new(PaymentCoordinator::new(
        Arc::new(gateway),
        config.payment.currency.clone(),
        config.payment.on_failure,
    ));

    tokio::spawn(reconciler::run_reconciler(
        engine.clone(),
        config.reconcile_interval,
    ));
    tokio::spawn(reconciler::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        data_dir = %config.data_dir.display(),
        properties = engine.property_count(),
        max_connections,
        reconcile_interval = ?config.reconcile_interval,
        payment_api = %config.payment.api_base,
        currency = %config.payment.currency,
        on_payment_failure = ?config.payment.on_failure,
        tls = tls_acceptor.is_some(),
        "stayd listening"
    );

    let shutdown = shutdown_signal();
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

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    tracing::warn!(%peer, "connection limit reached, rejecting");
                    metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };

                tracing::debug!(%peer, "accepted connection");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let payments = payments.clone();
                let password = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    if let Err(e) = wire::process_connection(socket, engine, payments, password, tls).await {
                        tracing::warn!(%peer, "connection ended with error: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                    drop(permit);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting connections");
                break;
            }
        }
    }

    drain(&semaphore, max_connections, Duration::from_secs(10)).await;
    info!("stayd stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("SIGTERM handler unavailable: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("ctrl-c handler unavailable: {e}");
    }
}

/// Wait until every connection permit is back or `grace` runs out.
async fn drain(semaphore: &Semaphore, max_connections: usize, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let open = max_connections - semaphore.available_permits();
        if open == 0 {
            info!("all connections closed");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(open, "grace period over, exiting with connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
