//! Development proxy with live reload.
//!
//! The dev server is built from three independent pieces:
//!
//! 1. **Proxy**: an `axum` server on [`PROXY_PORT`] forwarding every request
//!    to the configured backend with `reqwest`. HTML responses get backend
//!    URLs rewritten to the proxy and a small client script injected.
//! 2. **WebSocket server**: `tungstenite` threads keeping connections with
//!    open browser tabs and broadcasting reload messages to them.
//! 3. **Artifact watcher**: a debounced `notify` watcher over the compiled
//!    stylesheet, the bundled script and the templates. Stylesheet-only
//!    changes are injected without a page reload.
//!
//! None of this is retried: a port that can't be bound ends the server with
//! an error.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use console::style;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tungstenite::WebSocket;

use crate::config::Environment;
use crate::error::ServeError;
use crate::watch::{DEBOUNCE, WatchTarget, outermost};

/// Port the proxy listens on.
pub const PROXY_PORT: u16 = 3000;
/// Preferred port of the live reload websocket.
pub const SOCKET_PORT: u16 = 3001;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;
type Detached = (&'static str, JoinHandle<anyhow::Result<()>>);

/// What connected browsers should do after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    /// Swap stylesheets in place.
    Css,
    /// Reload the whole page.
    Full,
}

impl Reload {
    fn message(self) -> &'static str {
        match self {
            Reload::Css => "css",
            Reload::Full => "reload",
        }
    }

    /// Stylesheets can be injected, anything else needs a reload.
    pub fn for_paths<'p>(paths: impl IntoIterator<Item = &'p std::path::Path>) -> Option<Self> {
        let mut reload = None;

        for path in paths {
            let is_css = path.extension().is_some_and(|ext| ext == "css");
            reload = match (reload, is_css) {
                (None | Some(Reload::Css), true) => Some(Reload::Css),
                _ => Some(Reload::Full),
            };
        }

        reload
    }
}

/// Starts the dev server and returns the threads that keep it running.
pub fn start(env: &Environment) -> Result<Vec<Detached>, ServeError> {
    let target = env.proxy_target()?;
    let (socket, socket_port) = reserve_port()?;

    let clients: Clients = Arc::new(Mutex::new(vec![]));
    let _thread_i = new_thread_ws_incoming(socket, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);

    let watcher = new_thread_reload_watch(env, tx_reload)?;

    let proxy = Proxy {
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?,
        origin: format!("http://localhost:{PROXY_PORT}"),
        script: client_script(socket_port).into(),
        target,
    };

    tracing::info!(
        url = %style(&proxy.origin).yellow(),
        "proxying {}",
        style(&proxy.target).yellow()
    );

    let open_browser = env.config.open;
    let http = thread::spawn(move || -> anyhow::Result<()> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(proxy, PROXY_PORT, open_browser))
    });

    Ok(vec![("browser-sync", http), ("browser-sync watch", watcher)])
}

#[derive(Clone)]
struct Proxy {
    client: reqwest::Client,
    /// Backend origin, e.g. `http://begonia.test:8080`.
    target: String,
    /// Origin browsers use to reach the proxy.
    origin: String,
    script: Arc<str>,
}

async fn serve(proxy: Proxy, port: u16, open_browser: bool) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("couldn't bind the proxy to {address}: {err}");
            return Err(err.into());
        }
    };

    if open_browser && let Err(err) = open::that_detached(&proxy.origin) {
        tracing::warn!("couldn't open a browser at {}: {err}", proxy.origin);
    }

    axum::serve(listener, router(proxy)).await?;

    Ok(())
}

/// Every request, whatever the path or method, goes to the backend.
fn router(proxy: Proxy) -> Router {
    Router::new().fallback(forward).with_state(proxy)
}

async fn forward(State(proxy): State<Proxy>, request: Request) -> Result<Response, ServeError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let body = axum::body::to_bytes(body, usize::MAX).await?;

    let mut upstream = proxy
        .client
        .request(parts.method.clone(), format!("{}{}", proxy.target, path));

    for (name, value) in &parts.headers {
        if name != header::HOST && name != header::ACCEPT_ENCODING {
            upstream = upstream.header(name.clone(), value.clone());
        }
    }

    // identity so HTML bodies can be rewritten
    let response = upstream
        .header(header::ACCEPT_ENCODING, "identity")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let mut headers = response.headers().clone();
    let is_html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));
    let bytes = response.bytes().await?;

    if let Some(location) = headers
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
    {
        let location = rewrite_origin(location, &proxy.target, &proxy.origin);
        if let Ok(value) = HeaderValue::from_str(&location) {
            headers.insert(header::LOCATION, value);
        }
    }

    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);

    let body = if is_html {
        headers.remove(header::CONTENT_LENGTH);
        let html = String::from_utf8_lossy(&bytes);
        let html = rewrite_origin(&html, &proxy.target, &proxy.origin);
        Body::from(inject(&html, &proxy.script))
    } else {
        Body::from(bytes)
    };

    let mut response = Response::builder().status(status).body(body)?;
    *response.headers_mut() = headers;

    Ok(response)
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        tracing::error!("proxy: {self}");
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

/// Points backend URLs at the proxy, including the JSON-escaped form that
/// ends up in inline scripts.
pub fn rewrite_origin(text: &str, target: &str, origin: &str) -> String {
    text.replace(target, origin)
        .replace(&target.replace('/', "\\/"), &origin.replace('/', "\\/"))
}

/// Inserts the client script right before `</body>`, or appends it.
pub fn inject(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], tag, &html[at..]),
        None => format!("{html}{tag}"),
    }
}

/// Browser side of live reload.
pub fn client_script(port: u16) -> String {
    format!(
        r#"
(() => {{
    const socket = new WebSocket("ws://" + location.hostname + ":{port}");
    socket.addEventListener("message", event => {{
        if (event.data !== "css") {{
            window.location.reload();
            return;
        }}
        for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
            const url = new URL(link.href);
            url.searchParams.set("livereload", Date.now());
            link.href = url.toString();
        }}
    }});
}})();
"#
    )
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", SOCKET_PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream.map(tungstenite::accept) {
                Ok(Ok(socket)) => socket,
                Ok(Err(err)) => {
                    tracing::debug!("websocket handshake failed: {err}");
                    continue;
                }
                Err(err) => {
                    tracing::debug!("websocket connection failed: {err}");
                    continue;
                }
            };

            match clients.lock() {
                Ok(mut clients) => clients.push(socket),
                Err(poisoned) => poisoned.into_inner().push(socket),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<Reload>, JoinHandle<()>) {
    let (tx, rx) = channel::<Reload>();

    let thread = thread::spawn(move || {
        while let Ok(reload) = rx.recv() {
            let mut clients = match clients.lock() {
                Ok(clients) => clients,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(reload.message().into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }

            tracing::info!("{} browsers notified ({})", clients.len(), reload.message());
        }
    });

    (tx, thread)
}

/// Watches the served artifacts and tells browsers what to do about them.
fn new_thread_reload_watch(
    env: &Environment,
    tx: Sender<Reload>,
) -> Result<JoinHandle<anyhow::Result<()>>, ServeError> {
    let mut targets = Vec::new();

    for glob in &env.layout().reload {
        match WatchTarget::resolve(&env.glob(glob)) {
            Ok(target) => targets.push(target),
            Err(err) => tracing::warn!("not reloading on {}: {}", glob, err),
        }
    }

    let roots = outermost(targets.iter().map(|target| target.dir.clone()));

    Ok(thread::spawn(move || -> anyhow::Result<()> {
        let (tx_events, rx_events) = channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx_events)?;

        for root in &roots {
            debouncer.watch(root, RecursiveMode::Recursive)?;
        }

        while let Ok(result) = rx_events.recv() {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for err in errors {
                        tracing::error!("watch error: {:?}", err);
                    }
                    continue;
                }
            };

            let changed = events
                .iter()
                .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
                .flat_map(|de| de.event.paths.iter())
                .filter(|path| targets.iter().any(|target| target.matches(path)))
                .map(|path| path.as_path());

            if let Some(reload) = Reload::for_paths(changed)
                && tx.send(reload).is_err()
            {
                break;
            }
        }

        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_inject_before_body() {
        let html = "<html><body><p>hi</p></BODY></html>";
        assert_eq!(
            inject(html, "x()"),
            "<html><body><p>hi</p><script>x()</script></BODY></html>"
        );
    }

    #[test]
    fn test_inject_without_body() {
        assert_eq!(inject("<p>hi</p>", "x()"), "<p>hi</p><script>x()</script>");
    }

    #[test]
    fn test_rewrite_origin() {
        let html = r#"<a href="http://begonia.test/about/">a</a><script>{"url":"http:\/\/begonia.test\/wp-json"}</script>"#;

        assert_eq!(
            rewrite_origin(html, "http://begonia.test", "http://localhost:3000"),
            r#"<a href="http://localhost:3000/about/">a</a><script>{"url":"http:\/\/localhost:3000\/wp-json"}</script>"#
        );
    }

    #[test]
    fn test_client_script_port() {
        let script = client_script(4242);
        assert!(script.contains(":4242"));
        assert!(script.contains("window.location.reload()"));
    }

    #[test]
    fn test_reload_kind() {
        let css = Path::new("/t/style.css");
        let js = Path::new("/t/assets/js/main.js");

        assert_eq!(Reload::for_paths([css]), Some(Reload::Css));
        assert_eq!(Reload::for_paths([css, js]), Some(Reload::Full));
        assert_eq!(Reload::for_paths([js, css]), Some(Reload::Full));
        assert_eq!(Reload::for_paths([]), None);
    }

    #[test]
    fn test_proxy_round_trip() {
        use axum::response::Html;
        use axum::routing::get;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let target = format!("http://{}", backend.local_addr().unwrap());

            let home = format!(r#"<html><body><a href="{target}/about/">About</a></body></html>"#);
            let login = format!("{target}/login/");
            let upstream = Router::new()
                .route(
                    "/",
                    get(move || {
                        let home = home.clone();
                        async move { Html(home) }
                    }),
                )
                .route(
                    "/old",
                    get(move || {
                        let login = login.clone();
                        async move { (StatusCode::FOUND, [(header::LOCATION, login)]) }
                    }),
                )
                .route(
                    "/logo.bin",
                    get(|| async {
                        (
                            [(header::CONTENT_TYPE, "application/octet-stream")],
                            vec![0u8, 159, 146, 150],
                        )
                    }),
                );
            tokio::spawn(async move { axum::serve(backend, upstream).await });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let origin = format!("http://{}", listener.local_addr().unwrap());
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap();
            let proxy = Proxy {
                client: client.clone(),
                target,
                origin: origin.clone(),
                script: "reload()".into(),
            };
            tokio::spawn(async move { axum::serve(listener, router(proxy)).await });

            let page = client.get(format!("{origin}/")).send().await.unwrap();
            assert_eq!(page.status(), reqwest::StatusCode::OK);
            let page = page.bytes().await.unwrap();
            let page = String::from_utf8_lossy(&page);
            assert!(page.contains(&format!(r#"href="{origin}/about/""#)));
            assert!(page.contains("<script>reload()</script></body>"));

            let moved = client.get(format!("{origin}/old")).send().await.unwrap();
            assert_eq!(moved.status(), reqwest::StatusCode::FOUND);
            assert_eq!(
                moved.headers()[header::LOCATION].to_str().unwrap(),
                format!("{origin}/login/")
            );

            let logo = client.get(format!("{origin}/logo.bin")).send().await.unwrap();
            assert_eq!(logo.bytes().await.unwrap().as_ref(), [0u8, 159, 146, 150]);
        });
    }
}
