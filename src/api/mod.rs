//! HTTP control surface.
//!
//! A small hand-rolled HTTP/1.1 server on std `TcpListener`. The accept loop
//! is non-blocking and polls a shutdown flag; each connection is served on
//! its own thread so a long-lived `/video_feed` stream never blocks `/stop`.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::HubRecv;
use crate::session::{SessionManager, SessionStatus};
use crate::storage::ProductRecord;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const STREAM_POLL: Duration = Duration::from_millis(500);
const BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stops accepting connections. Open streams end at their next poll.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    sessions: Arc<SessionManager>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, sessions: Arc<SessionManager>) -> Self {
        Self { cfg, sessions }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid http address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("bind {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let sessions = self.sessions;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, sessions, shutdown_thread) {
                log::error!("http api stopped: {}", err);
            }
        });
        log::info!("http api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    sessions: Arc<SessionManager>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let sessions = sessions.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &sessions, &shutdown) {
                        log::warn!("http request from {} rejected: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    running: bool,
}

fn handle_connection(
    mut stream: TcpStream,
    sessions: &SessionManager,
    shutdown: &AtomicBool,
) -> Result<()> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);

    let allowed = match request.path.as_str() {
        "/" | "/video_feed" | "/products" | "/health" => "GET",
        "/start" | "/stop" => "POST",
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != allowed {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/" => match sessions.store().list_all() {
            Ok(products) => {
                let page = render_index(&products);
                write_response(&mut stream, 200, "text/html; charset=utf-8", page.as_bytes())
            }
            Err(err) => write_server_error(&mut stream, err),
        },
        "/products" => match sessions.store().list_all() {
            Ok(products) => {
                let payload = serde_json::to_vec(&products)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            Err(err) => write_server_error(&mut stream, err),
        },
        "/health" => {
            let running = sessions.status()?.is_running();
            let payload = serde_json::to_vec(&HealthBody {
                status: "ok",
                running,
            })?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/start" => match sessions.start() {
            Ok(_) => write_status(&mut stream, "analyzing started"),
            Err(err) => write_server_error(&mut stream, err),
        },
        "/stop" => match sessions.stop() {
            Ok(_) => write_status(&mut stream, "analyzing stopped"),
            Err(err) => write_server_error(&mut stream, err),
        },
        "/video_feed" => stream_video(&mut stream, sessions, shutdown),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Serves the annotated frames of the running session.
///
/// Viewing never starts detection: while idle the response is a multipart
/// header with no parts. Otherwise it streams until the session closes or
/// the client disconnects. Leaving the stream does not stop the session.
fn stream_video(
    stream: &mut TcpStream,
    sessions: &SessionManager,
    shutdown: &AtomicBool,
) -> Result<()> {
    let status = match sessions.status() {
        Ok(status) => status,
        Err(err) => return write_server_error(stream, err),
    };
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    let session_id = match status {
        SessionStatus::Running(id) => id,
        SessionStatus::Idle => {
            stream.write_all(header.as_bytes())?;
            log::debug!("video feed requested while idle");
            return Ok(());
        }
    };
    let mut subscription = sessions.hub().subscribe(session_id)?;
    stream.write_all(header.as_bytes())?;

    let mut sent = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match subscription.recv(STREAM_POLL)? {
            HubRecv::Frame(frame) => {
                if let Err(err) = write_part(stream, &frame.jpeg) {
                    log::debug!(
                        "video feed client left after {} frames of session {}: {}",
                        sent,
                        session_id,
                        err
                    );
                    return Ok(());
                }
                sent += 1;
            }
            HubRecv::Timeout => continue,
            HubRecv::Closed => break,
        }
    }
    log::debug!("video feed for session {} ended after {} frames", session_id, sent);
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let head = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    stream.write_all(head.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn render_index(products: &[ProductRecord]) -> String {
    let mut rows = String::new();
    for product in products {
        rows.push_str(&format!(
            "      <tr><td>{}</td><td>{}</td></tr>\n",
            escape_html(&product.name),
            product.price
        ));
    }
    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Product scanner</title>
  </head>
  <body>
    <h1>Product scanner</h1>
    <button onclick="fetch('/start', {{method: 'POST'}})">Start</button>
    <button onclick="fetch('/stop', {{method: 'POST'}})">Stop</button>
    <div><img src="/video_feed" alt="video feed"></div>
    <h2>Products</h2>
    <table>
      <tr><th>Name</th><th>Price</th></tr>
{rows}    </table>
  </body>
</html>
"#,
        rows = rows
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_status(stream: &mut TcpStream, status: &str) -> Result<()> {
    let payload = serde_json::to_vec(&StatusBody { status })?;
    write_response(stream, 200, "application/json", &payload)
}

fn write_server_error(stream: &mut TcpStream, err: anyhow::Error) -> Result<()> {
    log::error!("request failed: {:#}", err);
    write_json_response(stream, 500, r#"{"error":"internal_error"}"#)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
