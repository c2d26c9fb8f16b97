//! Local HTTP server publishing transcoder output to players.
//!
//! Routes:
//! - `GET /index/{slot}`: HTML page with a `<video>` pointing at `/stream/{slot}`
//! - `GET /stream/{slot}`: chunked `video/mp4` read from the registry slot
//! - `GET /site-map`: plain-text list of parameterless routes
//!
//! Anything else is a 404.

mod registry;

pub use registry::{SLOT_CAP, SlotEntry, StreamRegistry};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::transport::CHUNK_BYTES;
use crate::Result;

/// `(path, has parameters)` of every declared route.
const ROUTES: &[(&str, bool)] = &[
    ("/index/{slot}", true),
    ("/stream/{slot}", true),
    ("/site-map", false),
];

pub fn router(registry: Arc<StreamRegistry>) -> Router {
    Router::new()
        .route("/index/{slot}", get(index))
        .route("/stream/{slot}", get(stream))
        .route("/site-map", get(site_map))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

fn parse_slot(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|&slot| slot < SLOT_CAP)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

async fn index(State(registry): State<Arc<StreamRegistry>>, Path(slot): Path<String>) -> Response {
    let Some(entry) = parse_slot(&slot).and_then(|slot| registry.get(slot)) else {
        return not_found().await.into_response();
    };
    let title = escape_html(&entry.title);
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"margin:0;background:#000\">\
         <video src=\"/stream/{slot}\" controls autoplay style=\"width:100%;height:100vh\"></video>\
         </body></html>"
    ))
    .into_response()
}

async fn stream(State(registry): State<Arc<StreamRegistry>>, Path(slot): Path<String>) -> Response {
    let Some(entry) = parse_slot(&slot).and_then(|slot| registry.get(slot)) else {
        return not_found().await.into_response();
    };
    let Ok(reader) = Arc::clone(&entry.reader).try_lock_owned() else {
        debug!(slot = %slot, "Slot already being streamed");
        return (StatusCode::CONFLICT, "stream already in use").into_response();
    };

    let chunks = futures::stream::unfold(reader, |mut reader| async move {
        let mut buf = vec![0u8; CHUNK_BYTES];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    });

    (
        [(header::CONTENT_TYPE, "video/mp4"), (header::CACHE_CONTROL, "no-store")],
        Body::from_stream(chunks),
    )
        .into_response()
}

async fn site_map() -> impl IntoResponse {
    let mut body = String::new();
    for (path, _) in ROUTES.iter().filter(|(_, parameterised)| !parameterised) {
        body.push_str(path);
        body.push('\n');
    }
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// A running server. Dropping it without [`HttpServer::stop`] leaves it running.
#[derive(Debug)]
pub struct HttpServer {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl HttpServer {
    /// Bind `(host, port)` and serve `registry` in the background.
    pub async fn start(host: &str, port: u16, registry: Arc<StreamRegistry>) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        let cancel_token = CancellationToken::new();

        let shutdown = cancel_token.clone();
        let app = router(registry);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                    info!("Stream server shutting down");
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "Stream server error");
            }
        });

        info!("Stream server listening on http://{addr}");
        Ok(Self {
            addr,
            cancel_token,
            task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections; open streams get `grace` to finish.
    pub async fn stop(self, grace: Duration) {
        self.cancel_token.cancel();
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            debug!("Stream server still draining, aborting");
            task.abort();
        }
    }
}
