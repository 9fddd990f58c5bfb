use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::middleware::map_response_with_state;
use axum::response::Response;
use camino::Utf8PathBuf;
use console::style;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServeError;
use crate::live::{LiveReload, WebSocketHub, client_snippet};

/// A running dev server.
pub struct Session {
    /// Address of the HTTP listener.
    pub http: SocketAddr,
    pub reload: Arc<LiveReload>,
}

/// Serves the output tree over HTTP and owns the live-reload channel.
///
/// No notification overlay, no control panel, no browser tab is opened.
pub struct DevServer {
    config: ServerConfig,
    root: Utf8PathBuf,
    session: Mutex<Option<Arc<Session>>>,
}

impl DevServer {
    pub fn new(config: ServerConfig, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
            session: Mutex::new(None),
        }
    }

    /// Binds both listeners and starts serving. Calling it again returns the
    /// already running session.
    pub fn start(&self) -> Result<Arc<Session>, ServeError> {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(session) = session.as_ref() {
            return Ok(session.clone());
        }

        let host = self.config.host.as_str();

        let hub = WebSocketHub::bind(host, self.config.reload_port)
            .map_err(|e| ServeError::Bind(format!("{host}:{}", self.config.reload_port), e))?;
        let snippet: Arc<str> = client_snippet(hub.port()).into();
        let reload = Arc::new(LiveReload::new(hub));

        let listener = std::net::TcpListener::bind((host, self.config.port))
            .map_err(|e| ServeError::Bind(format!("{host}:{}", self.config.port), e))?;
        listener.set_nonblocking(true)?;
        let http = listener.local_addr()?;

        let router = router(self.root.clone(), snippet);

        thread::spawn(move || {
            let result = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(anyhow::Error::from)
                .and_then(|rt| rt.block_on(serve(listener, router)));

            if let Err(e) = result {
                tracing::error!("dev server stopped: {e}");
            }
        });

        info!(url = %style(format!("http://{http}/")).yellow(), "serving {}", self.root);

        let started = Arc::new(Session { http, reload });
        *session = Some(started.clone());

        Ok(started)
    }

    /// Instructs every connected client to reload. Does nothing before
    /// [`DevServer::start`].
    pub fn reload_all(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(session) = session.as_ref() {
            session.reload.reload_all();
        }
    }
}

async fn serve(listener: std::net::TcpListener, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn router(root: Utf8PathBuf, snippet: Arc<str>) -> Router {
    Router::new()
        // path to the output directory with the generated assets
        .fallback_service(ServeDir::new(root))
        .layer(map_response_with_state(snippet, inject_client))
        .layer(CorsLayer::permissive())
}

async fn inject_client(State(snippet): State<Arc<str>>, response: Response) -> Response {
    // partial and cached responses must keep their exact bytes
    if response.status() != StatusCode::OK {
        return response;
    }

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = inject_snippet(&String::from_utf8_lossy(&bytes), &snippet);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Inserts `snippet` right before the closing `</body>` tag, or at the very
/// end of documents without one.
pub(crate) fn inject_snippet(html: &str, snippet: &str) -> String {
    let lower = html.to_ascii_lowercase();

    match lower.rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + snippet.len());
            out.push_str(&html[..at]);
            out.push_str(snippet);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{snippet}"),
    }
}
