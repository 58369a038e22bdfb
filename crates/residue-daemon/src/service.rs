//! Core Service - 同步服务器与隧道管理

use anyhow::Result;
use residue_core::tunnel::TunnelState;
use residue_core::{ServerSettings, SyncServer, spawn_tunnel};
use tokio::net::TcpListener;
use tokio::sync::watch;

pub async fn run_service(settings: ServerSettings) -> Result<()> {
    tracing::info!("核心服务初始化...");

    let listener = TcpListener::bind(settings.listen_addr()).await?;

    let tunnel = spawn_tunnel(settings.tunnel.clone());
    let monitor = tokio::spawn(log_tunnel_changes(tunnel.subscribe()));

    let server = SyncServer::new(tunnel.subscribe()).with_body_limit(settings.body_limit_bytes());
    let result = server.serve(listener, shutdown_signal()).await;

    monitor.abort();
    tunnel.shutdown();
    tracing::info!("服务已停止");

    result
}

/// 记录隧道状态变化
async fn log_tunnel_changes(mut rx: watch::Receiver<TunnelState>) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        match state {
            TunnelState::NotStarted => {}
            TunnelState::Starting => tracing::info!("正在建立公网隧道..."),
            TunnelState::Active { url } => tracing::info!("公网地址: {}", url),
            TunnelState::Exited { code, .. } => {
                tracing::warn!("隧道进程已退出 (code: {:?})，不会自动重启", code);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("无法监听 Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号");
}
