//! Data Residue Daemon
//!
//! 服务端进程，负责：
//! - 持有进程内的条目存储
//! - 提供 HTTP 同步接口
//! - 启动公网隧道并发布其 URL

mod service;

use anyhow::Result;
use clap::Parser;
use residue_core::ServerSettings;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "residue-daemon", version, about = "Data Residue 同步服务器")]
struct Args {
    /// HTTP 监听端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,
    /// 监听地址（覆盖配置文件）
    #[arg(short, long)]
    bind: Option<String>,
    /// 隧道转发的本地端口（覆盖配置文件）
    #[arg(long)]
    tunnel_port: Option<u16>,
    /// 不启动公网隧道
    #[arg(long)]
    no_tunnel: bool,
    /// 写入当前生效的配置后退出
    #[arg(long)]
    write_config: bool,
}

impl Args {
    fn apply(&self, settings: &mut ServerSettings) {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(bind) = &self.bind {
            settings.bind_address.clone_from(bind);
        }
        if let Some(port) = self.tunnel_port {
            settings.tunnel.local_port = port;
        }
        if self.no_tunnel {
            settings.tunnel.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（residue-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,residue_core=debug")),
        )
        .try_init();

    let args = Args::parse();
    let mut settings = ServerSettings::load();
    args.apply(&mut settings);

    if args.write_config {
        settings.save()?;
        tracing::info!("配置已写入 {:?}", ServerSettings::config_path());
        return Ok(());
    }

    tracing::info!("Data Residue Daemon starting...");

    service::run_service(settings).await
}
