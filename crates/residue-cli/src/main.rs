//! Data Residue CLI
//!
//! 命令行客户端，通过 HTTP 与服务器同步，并维护本地镜像

use anyhow::Result;
use clap::{Parser, Subcommand};
use residue_core::sync::client::DEFAULT_SERVER_URL;
use residue_core::{IncomingFile, Item, ItemId, LocalMirror, SyncClient};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "residue", version, about = "Data Residue - 跨设备临时文件收件箱")]
struct Cli {
    /// 服务器地址
    #[arg(short, long, default_value = DEFAULT_SERVER_URL, global = true)]
    server: String,
    /// 本地镜像目录 (默认: 数据目录/data-residue)
    #[arg(long, global = true)]
    mirror_dir: Option<PathBuf>,
    /// 输出 JSON
    #[arg(long, global = true)]
    json: bool,
    /// 详细日志
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出全部文件（服务器不可达时显示本地镜像）
    List,
    /// 上传文件
    Upload {
        /// 要上传的文件
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 标记为已打开
    Open {
        id: String,
    },
    /// 标记为未打开
    Unopen {
        id: String,
    },
    /// 删除文件
    Delete {
        id: String,
    },
    /// 显示公网隧道地址
    TunnelUrl,
    /// 本地镜像操作
    Mirror {
        #[command(subcommand)]
        action: MirrorAction,
    },
}

#[derive(Subcommand)]
enum MirrorAction {
    /// 显示镜像内容
    Show,
    /// 记录一个未经服务器到达的文件
    Record {
        name: String,
        size: u64,
    },
    /// 清空镜像
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = tracing_log::LogTracer::init();
    let filter = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();

    let mirror = match &cli.mirror_dir {
        Some(dir) => LocalMirror::in_dir(dir),
        None => LocalMirror::open_default(),
    };

    let client = SyncClient::new(&cli.server).with_mirror(mirror);

    match cli.command {
        Commands::List => {
            let items = client.list_or_cached().await?;
            print_items(&items, cli.json)?;
        }
        Commands::Upload { files } => {
            println!("📤 上传 {} 个文件到 {}", files.len(), client.base_url());
            let items = client.upload_paths(&files).await?;
            print_items(&items, cli.json)?;
        }
        Commands::Open { id } => {
            let items = client.set_opened(&ItemId::new(id), true).await?;
            print_items(&items, cli.json)?;
        }
        Commands::Unopen { id } => {
            let items = client.set_opened(&ItemId::new(id), false).await?;
            print_items(&items, cli.json)?;
        }
        Commands::Delete { id } => {
            let items = client.remove(&ItemId::new(id)).await?;
            print_items(&items, cli.json)?;
        }
        Commands::TunnelUrl => match client.tunnel_url().await? {
            Some(url) => println!("{}", url),
            None => println!("隧道地址尚未就绪"),
        },
        Commands::Mirror { action } => {
            if let Some(mirror) = client.mirror() {
                run_mirror(mirror, &action, cli.json)?;
            }
        }
    }

    Ok(())
}

fn run_mirror(mirror: &LocalMirror, action: &MirrorAction, json: bool) -> Result<()> {
    if !mirror.is_available() {
        eprintln!("⚠️  本地镜像不可用");
    }

    match action {
        MirrorAction::Show => match mirror.load()? {
            Some(items) => print_items(&items, json)?,
            None => println!("镜像尚未保存过"),
        },
        MirrorAction::Record { name, size } => {
            let items = mirror.record_incoming(IncomingFile {
                name: name.clone(),
                size: *size,
            })?;
            print_items(&items, json)?;
        }
        MirrorAction::Clear => {
            mirror.clear()?;
            println!("🧹 镜像已清空");
        }
    }
    Ok(())
}

fn print_items(items: &[Item], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("   (空)");
        return Ok(());
    }
    for item in items {
        let mark = if item.opened { " " } else { "●" };
        println!(
            "{} {:<32} {:>10} {:>5}  {}",
            mark,
            item.title.as_deref().unwrap_or("(untitled)"),
            item.size.map(format_size).unwrap_or_default(),
            item.date,
            item.id
        );
    }
    Ok(())
}

/// 人类可读的大小，保留一位小数（整数运算，四舍五入）
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut unit = 0;
    let mut divisor: u64 = 1;
    while unit < UNITS.len() - 1 && bytes / divisor >= 1024 {
        divisor *= 1024;
        unit += 1;
    }
    if unit == 0 {
        return format!("{} B", bytes);
    }
    let divisor = u128::from(divisor);
    let tenths = (u128::from(bytes) * 10 + divisor / 2) / divisor;
    format!("{}.{} {}", tenths / 10, tenths % 10, UNITS[unit])
}
