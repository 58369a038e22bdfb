//! 客户端本地镜像
//!
//! 服务器集合的持久化副本，用于离线显示和服务器不可达时的回退。
//! 快照保存在数据目录下的 `dataResidueItems.json`，每次保存都完整替换旧快照，
//! 并通过 broadcast 通道通知同一进程内的观察者。
//!
//! 平台没有数据目录时镜像不可用，所有操作都变为空操作。

use log::{debug, warn};

use crate::item::{IncomingFile, Item, ItemId, UploadInput};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// 快照的存储键
pub const MIRROR_KEY: &str = "dataResidueItems";

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 镜像变更通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    Saved { count: usize },
    Cleared,
}

pub struct LocalMirror {
    path: Option<PathBuf>,
    events: broadcast::Sender<MirrorEvent>,
}

impl LocalMirror {
    /// 使用平台数据目录（如 `~/.local/share/data-residue`）
    pub fn open_default() -> Self {
        match dirs::data_dir() {
            Some(dir) => Self::in_dir(dir.join("data-residue")),
            None => {
                warn!("No data directory available, local mirror disabled");
                Self::unavailable()
            }
        }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let path = dir.into().join(format!("{MIRROR_KEY}.json"));
        Self::with_path(Some(path))
    }

    pub fn unavailable() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { path, events }
    }

    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }

    /// 快照文件路径
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 订阅变更通知
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    /// 读取快照
    ///
    /// 从未保存过时返回 `None`（与已保存的空集合不同）；镜像不可用时返回空集合。
    pub fn load(&self) -> Result<Option<Vec<Item>>, MirrorError> {
        let Some(path) = &self.path else {
            return Ok(Some(Vec::new()));
        };

        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 保存快照，完整替换旧内容
    pub fn save(&self, items: &[Item]) -> Result<(), MirrorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // 先写临时文件再重命名，避免读到半截快照
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(items)?)?;
        fs::rename(&tmp, path)?;
        debug!("Saved {} items to {:?}", items.len(), path);

        let _ = self.events.send(MirrorEvent::Saved { count: items.len() });
        Ok(())
    }

    /// 记录一个绕过服务器到达的文件
    ///
    /// 新条目插入到最前面并立即保存，返回更新后的集合。
    pub fn record_incoming(&self, file: IncomingFile) -> Result<Vec<Item>, MirrorError> {
        let mut items = self.load()?.unwrap_or_default();
        let input = UploadInput {
            name: Some(file.name),
            size: Some(file.size),
            ..Default::default()
        };
        let id = ItemId::generate_unique(|id| items.iter().any(|item| item.id == *id));
        items.insert(0, Item::from_upload(id, input));
        self.save(&items)?;
        Ok(items)
    }

    /// 删除快照
    pub fn clear(&self) -> Result<(), MirrorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Cleared mirror {:?}", path);

        let _ = self.events.send(MirrorEvent::Cleared);
        Ok(())
    }
}
