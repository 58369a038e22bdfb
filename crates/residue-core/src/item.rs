//! 条目数据模型
//!
//! 服务端存储和客户端镜像共用同一种记录格式，JSON 字段名与网页端保持一致：
//! `id`, `title`, `opened`, `date`, `size`, `type`, `content`。

use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// 条目 ID
///
/// 不透明值，只保存规范化后的字符串形式，所有比较都基于这个形式。
/// 反序列化时同时接受 JSON 字符串和 JSON 数字（旧客户端会把 ID 当数字回传），
/// `1718000000000.5` 与 `"1718000000000.5"` 视为同一个 ID。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItemId {
    Text(String),
    Number(serde_json::Number),
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawItemId::deserialize(deserializer)? {
            RawItemId::Text(text) => ItemId::new(text),
            RawItemId::Number(number) => ItemId::new(number.to_string()),
        })
    }
}

impl ItemId {
    /// 生成新 ID：`<unix 毫秒> + [0, 1) 随机小数`
    ///
    /// 字符串形式就是这个 f64 的最短往返表示，客户端把 ID 当 JSON 数字回传时
    /// 规范化结果与原字符串一致。整数值会被跳过，保证总带小数部分。
    /// 不保证唯一，调用方用 [`ItemId::generate_unique`] 排除已占用的 ID。
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut rng = rand::thread_rng();
        loop {
            #[allow(clippy::cast_precision_loss)]
            let value = millis as f64 + rng.gen_range(0.0..1.0);
            if value.fract() != 0.0 {
                return Self(canonical_number(value));
            }
        }
    }

    /// 生成一个 `taken` 判定为未占用的新 ID
    pub fn generate_unique(mut taken: impl FnMut(&ItemId) -> bool) -> Self {
        loop {
            let id = Self::generate();
            if !taken(&id) {
                return id;
            }
        }
    }
}

/// 与 JSON 数字反序列化走同一套格式化，保证两条路径得到相同字符串
fn canonical_number(value: f64) -> String {
    serde_json::Number::from_f64(value).map_or_else(|| value.to_string(), |n| n.to_string())
}

/// 当前本地时间，`HH:MM` 格式，仅用于显示
pub fn local_time_label() -> String {
    Local::now().format("%H:%M").to_string()
}

/// 文件条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub opened: bool,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// data URL 形式的文件内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Item {
    /// 由上传数据创建新条目（未打开，时间为当前时间）
    pub fn from_upload(id: ItemId, input: UploadInput) -> Self {
        Self {
            id,
            title: input.name,
            opened: false,
            date: local_time_label(),
            size: input.size,
            mime_type: input.mime_type,
            content: input.content,
        }
    }
}

/// 单个上传文件
///
/// 所有字段都可缺省，缺失的字段在生成的条目中同样缺失。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UploadInput {
    /// 读取本地文件并编码为 `data:<mime>;base64,...`
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());

        Ok(Self {
            name,
            size: Some(bytes.len() as u64),
            content: Some(data_url(&mime, &bytes)),
            mime_type: Some(mime),
        })
    }
}

/// 编码为 base64 data URL
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// `POST /files` 的请求体：单个对象或对象数组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UploadBody {
    Batch(Vec<UploadInput>),
    Single(UploadInput),
}

impl UploadBody {
    pub fn into_inputs(self) -> Vec<UploadInput> {
        match self {
            UploadBody::Batch(inputs) => inputs,
            UploadBody::Single(input) => vec![input],
        }
    }
}

/// 绕过服务器直接到达本机的文件（如系统分享入口）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingFile {
    pub name: String,
    pub size: u64,
}
