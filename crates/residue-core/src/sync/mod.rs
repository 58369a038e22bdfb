//! 同步接口
//!
//! 包含:
//! - HTTP 服务端：把条目存储和隧道 URL 暴露给任意数量的客户端
//! - HTTP 客户端：调用上述接口，并把每次拿到的完整集合写入本地镜像
//!
//! 每个修改类请求都返回修改后的完整集合，客户端总是整体替换本地视图，不做合并。

pub mod client;
pub mod server;

pub use client::{ClientError, SyncClient};
pub use server::{AppState, SyncServer};

use crate::item::ItemId;
use serde::{Deserialize, Serialize};

/// `PATCH /files` 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedPatch {
    #[serde(default)]
    pub id: Option<ItemId>,
    /// 缺省视为 `false`
    #[serde(default)]
    pub opened: bool,
}

/// `DELETE /files?id=<id>` 查询参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteQuery {
    pub id: Option<String>,
}

/// `GET /tunnel-url` 响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelUrlResponse {
    pub url: Option<String>,
}
