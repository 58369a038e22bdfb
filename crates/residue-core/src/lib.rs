//! Data Residue Core Library
//!
//! 把文件从一台设备（如通过公网隧道访问的手机）推送到另一台设备的临时收件箱，
//! 不依赖任何持久化后端。
//!
//! # 模块
//!
//! - **item**: 条目数据模型和 ID 生成
//! - **store**: 服务端权威集合（进程生命周期内有效）
//! - **mirror**: 客户端本地镜像（持久化快照 + 变更通知）
//! - **tunnel**: 公网隧道进程监控和 URL 发现
//! - **sync**: HTTP 服务端和客户端
//! - **config**: 服务器配置
//!
//! # 使用示例
//!
//! ## 启动服务器
//!
//! ```ignore
//! use residue_core::{ServerSettings, SyncServer, spawn_tunnel};
//!
//! let settings = ServerSettings::load();
//! let tunnel = spawn_tunnel(settings.tunnel.clone());
//! let server = SyncServer::new(tunnel.subscribe());
//! let addr = server.start(&settings.listen_addr()).await?;
//! ```
//!
//! ## 客户端同步
//!
//! ```ignore
//! use residue_core::{LocalMirror, SyncClient};
//!
//! let client = SyncClient::new("http://localhost:3001").with_mirror(LocalMirror::open_default());
//! let items = client.list_or_cached().await?;
//! ```

pub mod config;
pub mod item;
pub mod mirror;
pub mod store;
pub mod sync;
pub mod tunnel;

pub use config::ServerSettings;
pub use item::{IncomingFile, Item, ItemId, UploadBody, UploadInput};
pub use mirror::{LocalMirror, MirrorError, MirrorEvent};
pub use store::ItemStore;
pub use sync::{AppState, ClientError, SyncClient, SyncServer};
pub use tunnel::{TunnelConfig, TunnelHandle, TunnelState, spawn_tunnel};
