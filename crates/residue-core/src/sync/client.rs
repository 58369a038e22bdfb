//! HTTP 同步客户端
//!
//! 每次成功拿到完整集合后写入本地镜像（整体替换）。镜像读写是同步文件操作，
//! 放在 `spawn_blocking` 线程上执行。镜像写入失败只记录警告，不影响请求结果。

use log::{debug, warn};

use crate::item::{Item, ItemId, UploadBody, UploadInput};
use crate::mirror::{LocalMirror, MirrorError};
use crate::sync::{OpenedPatch, TunnelUrlResponse};
use std::path::PathBuf;
use std::sync::Arc;

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";

/// 同步客户端错误
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Local mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Failed to read {path:?}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Mirror task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    mirror: Option<Arc<LocalMirror>>,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            mirror: None,
        }
    }

    /// 附加本地镜像
    pub fn with_mirror(mut self, mirror: LocalMirror) -> Self {
        self.mirror = Some(Arc::new(mirror));
        self
    }

    pub fn mirror(&self) -> Option<&LocalMirror> {
        self.mirror.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    /// 获取全部条目
    pub async fn list(&self) -> Result<Vec<Item>, ClientError> {
        let items = self
            .http
            .get(self.files_url())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Item>>()
            .await?;
        self.resync(items).await
    }

    /// 获取全部条目，服务器不可达时回退到本地镜像
    pub async fn list_or_cached(&self) -> Result<Vec<Item>, ClientError> {
        match self.list().await {
            Ok(items) => Ok(items),
            Err(ClientError::Http(e)) => match &self.mirror {
                Some(mirror) => {
                    warn!("Server unreachable ({}), using local mirror", e);
                    let mirror = Arc::clone(mirror);
                    let cached = tokio::task::spawn_blocking(move || mirror.load()).await??;
                    Ok(cached.unwrap_or_default())
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e),
        }
    }

    /// 上传（一个或多个）文件
    pub async fn upload(&self, inputs: Vec<UploadInput>) -> Result<Vec<Item>, ClientError> {
        let body = UploadBody::Batch(inputs);
        let items = self
            .http
            .post(self.files_url())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Item>>()
            .await?;
        self.resync(items).await
    }

    /// 读取本地文件并上传
    pub async fn upload_paths(&self, paths: &[PathBuf]) -> Result<Vec<Item>, ClientError> {
        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            let input = UploadInput::from_path(path)
                .await
                .map_err(|source| ClientError::ReadFile {
                    path: path.clone(),
                    source,
                })?;
            inputs.push(input);
        }
        self.upload(inputs).await
    }

    /// 修改打开状态
    pub async fn set_opened(&self, id: &ItemId, opened: bool) -> Result<Vec<Item>, ClientError> {
        let patch = OpenedPatch {
            id: Some(id.clone()),
            opened,
        };
        let items = self
            .http
            .patch(self.files_url())
            .json(&patch)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Item>>()
            .await?;
        self.resync(items).await
    }

    /// 删除条目
    pub async fn remove(&self, id: &ItemId) -> Result<Vec<Item>, ClientError> {
        let items = self
            .http
            .delete(self.files_url())
            .query(&[("id", id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Item>>()
            .await?;
        self.resync(items).await
    }

    /// 当前公网隧道 URL（可能尚未发现）
    pub async fn tunnel_url(&self) -> Result<Option<String>, ClientError> {
        let response = self
            .http
            .get(format!("{}/tunnel-url", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json::<TunnelUrlResponse>()
            .await?;
        Ok(response.url)
    }

    /// 用服务器返回的集合替换本地镜像，原样返回该集合
    async fn resync(&self, items: Vec<Item>) -> Result<Vec<Item>, ClientError> {
        let Some(mirror) = self.mirror.clone() else {
            return Ok(items);
        };
        let (items, saved) = tokio::task::spawn_blocking(move || {
            let saved = mirror.save(&items);
            (items, saved)
        })
        .await?;
        match saved {
            Ok(()) => debug!("Mirrored {} items", items.len()),
            Err(e) => warn!("Failed to update local mirror: {}", e),
        }
        Ok(items)
    }
}
