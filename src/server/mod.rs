//! HTTP surface: the inline UI, the realtime WebSocket, archive downloads,
//! and the artifact API.

mod api;
mod download;
mod web;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::fs::{FileSystem, TokioFileSystem};
use crate::session::SessionController;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionController>,
    fs: Arc<dyn FileSystem>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Creates handler state. Cancelling `shutdown` closes every WebSocket
    /// connection and cancels the sessions started on them.
    #[must_use]
    pub fn new(sessions: Arc<SessionController>, shutdown: CancellationToken) -> Self {
        Self {
            sessions,
            fs: Arc::new(TokioFileSystem::new()),
            shutdown,
        }
    }
}

async fn index() -> impl IntoResponse {
    Html(web::INDEX_HTML)
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        web::SCRIPT_JS,
    )
}

/// Builds the application router.
#[must_use]
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/", get(index))
        .route("/script.js", get(script))
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(api::health))
        .route("/api/artifacts", get(api::list))
        .route("/api/artifacts/{name}", axum::routing::delete(api::remove))
        .route("/{filename}", get(download::download_archive));

    if let Some(public_dir) = config.public_dir.as_ref().filter(|dir| dir.is_dir()) {
        log::info!("Serving static files from {}", public_dir.display());
        app = app.nest_service("/static", ServeDir::new(public_dir));
    }

    app.layer(cors).with_state(state)
}

/// Serves the application until `state`'s shutdown token is cancelled.
///
/// # Errors
///
/// Returns an error if the server cannot bind to the configured address.
pub async fn run_server(config: &ServerConfig, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state, config);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    log::info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::CrawlConfig;
    use crate::crawl::{
        CrawlObserver, CrawlRequest, Crawler, PageRecord, ResourceKind, ResourceRecord,
    };
    use crate::error::Error;
    use crate::registry::ActiveNames;

    /// Saves a single page, or waits for cancellation when `hang` is set.
    pub struct OnePageCrawler {
        pub hang: bool,
    }

    #[async_trait]
    impl Crawler for OnePageCrawler {
        async fn crawl(
            &self,
            request: CrawlRequest,
            observer: Arc<dyn CrawlObserver>,
            cancel: CancellationToken,
        ) -> crate::Result<Vec<PageRecord>> {
            if self.hang {
                cancel.cancelled().await;
                return Err(Error::Cancelled);
            }
            let url = request.urls[0].to_string();
            observer.on_resource_discovered(&url);
            tokio::fs::create_dir_all(&request.directory).await?;
            tokio::fs::write(request.directory.join("index.html"), "<html></html>").await?;
            let record = ResourceRecord {
                url: url.clone(),
                filename: "index.html".to_string(),
                kind: ResourceKind::Page,
                depth: 0,
                size: 13,
            };
            observer.on_resource_saved(&record);
            Ok(vec![PageRecord {
                url,
                filename: record.filename.clone(),
                children: vec![record],
            }])
        }
    }

    pub fn state(root: &Path, hang: bool) -> AppState {
        let controller = SessionController::new(
            Arc::new(OnePageCrawler { hang }),
            CrawlConfig::default(),
            root.to_path_buf(),
            ActiveNames::new(),
        );
        AppState::new(Arc::new(controller), CancellationToken::new())
    }

    /// Serves the router on an ephemeral port and returns its base URL.
    pub async fn serve(state: AppState) -> String {
        let app = router(state, &ServerConfig::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}
