use std::sync::Arc;

use anyhow::Result;
use kvdb_core::PersistentMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvdb_server::acceptor::Acceptor;
use kvdb_server::config::Config;
use kvdb_server::processor::CommandProcessor;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env_and_args()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(?config.host, ?config.port, map_file = ?config.map_file, "starting kvdb-server");

    let map = Arc::new(
        PersistentMap::open(&config.map_file, config.initial_segment_len)?.with_lock_timeout(config.lock_timeout),
    );
    let processor = Arc::new(CommandProcessor::new(map));
    let report_task = processor.clone().spawn_report_task(config.report_interval);

    let acceptor = Acceptor::bind(&config.host, config.port, processor.clone(), config.receive_timeout).await?;

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    };

    acceptor.run(shutdown).await;

    report_task.abort();
    processor.report_and_flush();
    info!("kvdb-server stopped");
    Ok(())
}
