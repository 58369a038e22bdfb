//! HTTP 同步服务器
//!
//! # 接口
//!
//! - `GET /files`: 全部条目
//! - `POST /files`: 上传单个对象或对象数组，插入到最前面
//! - `PATCH /files`: `{id, opened}` 修改打开状态
//! - `DELETE /files?id=<id>`: 删除条目
//! - `GET /tunnel-url`: `{url: string | null}`
//!
//! 所有接口都返回 200 和完整集合；找不到 ID 时静默忽略。
//! 允许任意来源跨域访问。

use log::{debug, error, info};

use crate::item::{Item, ItemId, UploadBody};
use crate::store::ItemStore;
use crate::sync::{DeleteQuery, OpenedPatch, TunnelUrlResponse};
use crate::tunnel::TunnelState;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};

/// 默认请求体上限 (500 MiB)
pub const DEFAULT_BODY_LIMIT: usize = 500 * 1024 * 1024;

/// 非预检请求和未声明请求头的预检使用的 `Access-Control-Allow-Headers`
const DEFAULT_ALLOW_HEADERS: &str = "Content-Type";

/// 服务器状态
///
/// 存储的每次操作都在持有锁期间完整执行，期间不会 await。
pub struct AppState {
    pub store: Mutex<ItemStore>,
    pub tunnel: watch::Receiver<TunnelState>,
}

/// 同步服务器
pub struct SyncServer {
    state: Arc<AppState>,
    body_limit: usize,
}

impl SyncServer {
    pub fn new(tunnel: watch::Receiver<TunnelState>) -> Self {
        Self {
            state: Arc::new(AppState {
                store: Mutex::new(ItemStore::new()),
                tunnel,
            }),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/files",
                get(list_files)
                    .post(create_files)
                    .patch(patch_file)
                    .delete(delete_file),
            )
            .route("/tunnel-url", get(tunnel_url))
            .layer(DefaultBodyLimit::max(self.body_limit))
            .layer(middleware::from_fn(cors))
            .with_state(self.state.clone())
    }

    /// 在后台启动服务器，返回实际监听地址（端口为 0 时随机分配）
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let app = self.router();

        info!("Sync server listening on http://{}", local);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Server error: {}", e);
            }
        });

        Ok(local)
    }

    /// 在当前任务中运行，直到 `shutdown` 完成
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Sync server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn list_files(State(state): State<Arc<AppState>>) -> Json<Vec<Item>> {
    let store = state.store.lock().await;
    Json(store.list_all().to_vec())
}

async fn create_files(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadBody>,
) -> Json<Vec<Item>> {
    let items = {
        let mut store = state.store.lock().await;
        store.create_many(body.into_inputs()).to_vec()
    };
    info!("Received upload. Total items: {}", items.len());
    Json(items)
}

async fn patch_file(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<OpenedPatch>,
) -> Json<Vec<Item>> {
    let mut store = state.store.lock().await;
    match &patch.id {
        Some(id) => {
            if !store.set_opened(id, patch.opened) {
                debug!("PATCH for unknown id {}", id);
            }
        }
        None => debug!("PATCH without id ignored"),
    }
    Json(store.list_all().to_vec())
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteQuery>,
) -> Json<Vec<Item>> {
    let mut store = state.store.lock().await;
    if let Some(raw) = &query.id {
        let id = ItemId::new(raw);
        if store.remove(&id) == 0 {
            debug!("DELETE for unknown id {}", id);
        }
    }
    Json(store.list_all().to_vec())
}

async fn tunnel_url(State(state): State<Arc<AppState>>) -> Json<TunnelUrlResponse> {
    let url = state.tunnel.borrow().url().map(str::to_string);
    Json(TunnelUrlResponse { url })
}

/// 允许任意来源跨域访问，预检请求直接返回 204
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        // 预检请求声明了哪些请求头就放行哪些
        let allow_headers = request
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOW_HEADERS));
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut(), allow_headers);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(
        response.headers_mut(),
        HeaderValue::from_static(DEFAULT_ALLOW_HEADERS),
    );
    response
}

fn apply_cors_headers(headers: &mut HeaderMap, allow_headers: HeaderValue) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,PUT,PATCH,POST,DELETE"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        allow_headers,
    );
}
