//! 公网隧道发现
//!
//! 启动隧道程序（默认 `cloudflared tunnel --url localhost:<port>`），
//! 从其诊断输出 (stderr) 中提取公网 URL。
//!
//! # 状态机
//!
//! `NotStarted -> Starting -> Active(url) -> Exited(code)`
//!
//! - 输出中出现新的 URL 时覆盖旧值（视为重连）
//! - 没有超时：一直没有 URL 也是合法状态
//! - 进程退出后不会自动重启，只记录退出码
//!
//! 状态保存在 `watch` 通道中，HTTP 处理器读取时不会等待子进程。

use log::{debug, error, info, warn};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_PUBLIC_HOST: &str = "trycloudflare.com";

static DEFAULT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://[-a-zA-Z0-9]+\.trycloudflare\.com").unwrap());

/// 隧道状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    NotStarted,
    Starting,
    Active {
        url: String,
    },
    /// 进程已退出，保留最后一次发现的 URL
    Exited {
        code: Option<i32>,
        last_url: Option<String>,
    },
}

impl TunnelState {
    /// 当前已知的公网 URL
    pub fn url(&self) -> Option<&str> {
        match self {
            TunnelState::Active { url } => Some(url),
            TunnelState::Exited { last_url, .. } => last_url.as_deref(),
            TunnelState::NotStarted | TunnelState::Starting => None,
        }
    }

    fn exited(&self, code: Option<i32>) -> Self {
        TunnelState::Exited {
            code,
            last_url: self.url().map(str::to_string),
        }
    }
}

/// 隧道配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// 是否启动隧道
    pub enabled: bool,
    /// 隧道程序
    pub program: String,
    /// 自定义参数（为空时使用 `tunnel --url localhost:<local_port>`）
    pub args: Vec<String>,
    /// 隧道转发到的本地端口
    pub local_port: u16,
    /// 公网域名（URL 匹配用）
    pub public_host: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "cloudflared".to_string(),
            args: Vec::new(),
            local_port: 8080,
            public_host: DEFAULT_PUBLIC_HOST.to_string(),
        }
    }
}

impl TunnelConfig {
    pub fn command_args(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec![
                "tunnel".to_string(),
                "--url".to_string(),
                format!("localhost:{}", self.local_port),
            ]
        } else {
            self.args.clone()
        }
    }
}

/// 公网 URL 匹配器
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    pattern: Regex,
}

impl Default for UrlMatcher {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.clone(),
        }
    }
}

impl UrlMatcher {
    /// 匹配 `https://<token>.<host>`
    pub fn for_host(host: &str) -> Result<Self, regex::Error> {
        if host == DEFAULT_PUBLIC_HOST {
            return Ok(Self::default());
        }
        let pattern = Regex::new(&format!(
            r"https://[-a-zA-Z0-9]+\.{}",
            regex::escape(host)
        ))?;
        Ok(Self { pattern })
    }

    pub fn find<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.pattern.find(line).map(|m| m.as_str())
    }
}

/// 发布新发现的 URL
///
/// 与当前 URL 相同时不通知订阅者；进程退出后忽略。
/// 返回是否发生了变化。
pub fn publish_url(tx: &watch::Sender<TunnelState>, url: &str) -> bool {
    tx.send_if_modified(|state| {
        if let TunnelState::Active { url: current } = state {
            if *current == url {
                return false;
            }
            info!("Tunnel URL changed: {} -> {}", current, url);
            *current = url.to_string();
            return true;
        }
        if matches!(state, TunnelState::Exited { .. }) {
            return false;
        }
        info!(">>> Tunnel URL: {}", url);
        *state = TunnelState::Active {
            url: url.to_string(),
        };
        true
    })
}

/// 逐行扫描诊断输出，直到流结束
///
/// 非 UTF-8 内容按有损方式解码，不会中断扫描。
pub async fn watch_diagnostics<R>(
    mut reader: R,
    matcher: &UrlMatcher,
    tx: &watch::Sender<TunnelState>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(url) = matcher.find(&line) {
            publish_url(tx, url);
        }
    }
}

async fn log_stdout<R>(mut reader: R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        debug!("[tunnel] {}", String::from_utf8_lossy(&buf).trim_end());
    }
}

/// 运行中的隧道发现任务
pub struct TunnelHandle {
    state: watch::Receiver<TunnelState>,
    task: Option<JoinHandle<()>>,
}

impl TunnelHandle {
    /// 未启用隧道：状态永远是 `NotStarted`
    pub fn disabled() -> Self {
        let (_tx, state) = watch::channel(TunnelState::NotStarted);
        Self { state, task: None }
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.clone()
    }

    pub fn current(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    pub fn current_url(&self) -> Option<String> {
        self.state.borrow().url().map(str::to_string)
    }

    /// 停止任务；子进程随任务一起被杀掉
    pub fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 启动隧道发现（需要在 tokio 运行时中调用）
pub fn spawn_tunnel(config: TunnelConfig) -> TunnelHandle {
    if !config.enabled {
        info!("Tunnel disabled by configuration");
        return TunnelHandle::disabled();
    }

    let (tx, state) = watch::channel(TunnelState::NotStarted);
    let task = tokio::spawn(supervise(config, tx));

    TunnelHandle {
        state,
        task: Some(task),
    }
}

async fn supervise(config: TunnelConfig, tx: watch::Sender<TunnelState>) {
    tx.send_replace(TunnelState::Starting);

    let matcher = match UrlMatcher::for_host(&config.public_host) {
        Ok(m) => m,
        Err(e) => {
            error!("Invalid tunnel host {:?}: {}", config.public_host, e);
            tx.send_modify(|s| *s = s.exited(None));
            return;
        }
    };

    info!(
        "Starting tunnel for localhost:{} ({})",
        config.local_port, config.program
    );

    let mut child = match Command::new(&config.program)
        .args(config.command_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start tunnel program {}: {}", config.program, e);
            tx.send_modify(|s| *s = s.exited(None));
            return;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (matcher, tx_ref) = (&matcher, &tx);
    let stdout_task = async move {
        if let Some(out) = stdout
            && let Err(e) = log_stdout(BufReader::new(out)).await
        {
            warn!("Tunnel stdout read error: {}", e);
        }
    };
    let stderr_task = async move {
        if let Some(err) = stderr
            && let Err(e) = watch_diagnostics(BufReader::new(err), matcher, tx_ref).await
        {
            warn!("Tunnel stderr read error: {}", e);
        }
    };
    tokio::join!(stdout_task, stderr_task);

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for tunnel process: {}", e);
            None
        }
    };
    info!("Tunnel process exited with code {:?}", code);
    tx.send_modify(|s| *s = s.exited(code));
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "2024-06-01T10:00:00Z INF |  https://quiet-river-42.trycloudflare.com  |";

    #[test]
    fn test_default_matcher() {
        let matcher = UrlMatcher::default();
        assert_eq!(
            matcher.find(LINE),
            Some("https://quiet-river-42.trycloudflare.com")
        );
        assert_eq!(matcher.find("INF Registered tunnel connection"), None);
        assert_eq!(matcher.find("https://example.com"), None);
    }

    #[test]
    fn test_custom_host_is_escaped() {
        let matcher = UrlMatcher::for_host("tunnel.example.org").unwrap();
        assert_eq!(
            matcher.find("url=https://abc.tunnel.example.org/ ok"),
            Some("https://abc.tunnel.example.org")
        );
        assert_eq!(matcher.find("https://abc.tunnelXexample.org"), None);
    }

    #[test]
    fn test_publish_transitions() {
        let (tx, rx) = watch::channel(TunnelState::Starting);

        assert!(publish_url(&tx, "https://a.trycloudflare.com"));
        assert_eq!(rx.borrow().url(), Some("https://a.trycloudflare.com"));

        // 相同 URL 不重复发布
        assert!(!publish_url(&tx, "https://a.trycloudflare.com"));

        assert!(publish_url(&tx, "https://b.trycloudflare.com"));
        assert_eq!(rx.borrow().url(), Some("https://b.trycloudflare.com"));
    }

    #[test]
    fn test_exited_keeps_last_url() {
        let state = TunnelState::Active {
            url: "https://a.trycloudflare.com".to_string(),
        };
        let exited = state.exited(Some(1));
        assert_eq!(exited.url(), Some("https://a.trycloudflare.com"));

        let (tx, _rx) = watch::channel(exited);
        assert!(!publish_url(&tx, "https://b.trycloudflare.com"));
    }

    #[test]
    fn test_default_command_args() {
        let config = TunnelConfig::default();
        assert_eq!(
            config.command_args(),
            vec!["tunnel", "--url", "localhost:8080"]
        );
    }

    #[tokio::test]
    async fn test_watch_diagnostics_stream() {
        let output = format!("starting\n{LINE}\nreconnect https://other-7.trycloudflare.com\n");
        let (tx, rx) = watch::channel(TunnelState::Starting);

        watch_diagnostics(output.as_bytes(), &UrlMatcher::default(), &tx)
            .await
            .unwrap();

        assert_eq!(rx.borrow().url(), Some("https://other-7.trycloudflare.com"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_scan() {
        let (tx, rx) = watch::channel(TunnelState::Starting);
        let output: &[u8] = b"\xff\xfe garbage\n| https://late-1.trycloudflare.com |\n";
        watch_diagnostics(output, &UrlMatcher::default(), &tx)
            .await
            .unwrap();
        assert_eq!(rx.borrow().url(), Some("https://late-1.trycloudflare.com"));
    }

    #[tokio::test]
    async fn test_no_match_stays_starting() {
        let (tx, rx) = watch::channel(TunnelState::Starting);
        watch_diagnostics(&b"error: nothing here\n"[..], &UrlMatcher::default(), &tx)
            .await
            .unwrap();
        assert_eq!(*rx.borrow(), TunnelState::Starting);
    }

    #[tokio::test]
    async fn test_disabled_handle() {
        let handle = spawn_tunnel(TunnelConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(handle.current(), TunnelState::NotStarted);
        assert_eq!(handle.current_url(), None);
    }
}
