use std::net::SocketAddr;

use tonic::transport::Server;

use runlens_core::config::Config;
use runlens_core::error::{Result, RunlensError};
use runlens_core::translate::LegacyWarningWindow;
use runlens_store::Store;

use crate::fanout::FanoutHub;
use crate::otlp::decode::Normalizer;
use crate::otlp::grpc::GrpcIngest;
use crate::otlp::http;
use crate::pipeline::Pipeline;

/// Run both trace receivers. The schema migration is the gate: neither
/// receiver binds until it has completed.
pub async fn run_ingest_servers(store: Store, fanout: FanoutHub, cfg: &Config) -> Result<()> {
    let grpc_addr: SocketAddr = cfg
        .otlp_grpc_addr
        .parse()
        .map_err(|e| RunlensError::Config(format!("bad otlp_grpc_addr {}: {e}", cfg.otlp_grpc_addr)))?;
    let http_addr: SocketAddr = cfg
        .otlp_http_addr
        .parse()
        .map_err(|e| RunlensError::Config(format!("bad otlp_http_addr {}: {e}", cfg.otlp_http_addr)))?;

    let migration_store = store.clone();
    let batch_size = cfg.migration_batch_size;
    let report = tokio::task::spawn_blocking(move || migration_store.migrate_legacy_spans(batch_size))
        .await
        .map_err(|e| RunlensError::Internal(format!("migration task failed: {e}")))??;
    tracing::info!(
        outcome = ?report.outcome,
        migrated = report.migrated,
        failed = report.failed,
        "span schema ready"
    );

    let normalizer = Normalizer::new(LegacyWarningWindow::new(cfg.legacy_warning_window));
    let pipeline = Pipeline::new(store, fanout);
    let grpc = GrpcIngest::new(pipeline.clone(), normalizer);
    let http_router = http::router(pipeline, normalizer);

    let grpc_task = tokio::spawn(async move {
        Server::builder()
            .add_service(grpc.traces_service())
            .serve(grpc_addr)
            .await
    });

    let http_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        axum::serve(listener, http_router).await
    });

    tokio::select! {
        res = grpc_task => {
            let inner = res.map_err(|e| RunlensError::Ingest(format!("gRPC task join failed: {e}")))?;
            inner.map_err(|e| RunlensError::Ingest(format!("gRPC server failed: {e}")))
        }
        res = http_task => {
            let inner = res.map_err(|e| RunlensError::Ingest(format!("HTTP task join failed: {e}")))?;
            inner.map_err(|e| RunlensError::Ingest(format!("HTTP server failed: {e}")))
        }
    }
}
