//! Control surface: a small HTTP dispatcher over the gate, supervisor,
//! and capture store.
//!
//! Every route except `/login` and `/health` passes the credential gate
//! before anything else runs. A missing Authorization header is 401, a
//! rejected token 403. Supervisor failures are acknowledged with a
//! warning payload rather than an error status; store and auth failures
//! map to distinct statuses per kind.

use anyhow::{anyhow, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::auth::{AuthError, Gate};
use crate::store::{CaptureStore, StoreError, Variant};
use crate::supervisor::{StopAck, Supervisor};

// Capture submissions carry a base64 still image in the body.
const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3001".to_string(),
        }
    }
}

/// Everything a request handler needs, shared across connection threads.
pub struct AppState {
    pub gate: Gate,
    pub supervisor: Supervisor,
    pub store: CaptureStore,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
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
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AppState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("capture api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = state.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state) {
                        log::warn!("capture api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &AppState) -> Result<()> {
    let request = read_request(&mut stream)?;
    let response = route(state, &request);
    write_response(&mut stream, response.status, response.content_type, &response.body)
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }

    fn jpeg(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "image/jpeg",
            body,
        }
    }
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct CaptureBody {
    image_data: String,
}

fn route(state: &AppState, request: &HttpRequest) -> Response {
    let method = request.method.as_str();
    let path = request.path.as_str();

    match (method, path) {
        ("GET", "/health") => return Response::json(200, r#"{"status":"ok"}"#),
        ("POST", "/login") => return login(state, request),
        _ => {}
    }

    // Every other route is gated, reads included.
    let token = match request.bearer_token() {
        Some(token) => token,
        None => return auth_response(&AuthError::Unauthenticated),
    };
    if let Err(err) = state.gate.authenticate(&token) {
        return auth_response(&err);
    }

    match (method, path) {
        ("POST", "/start") => start_detector(state),
        ("POST", "/stop") => stop_detector(state),
        ("GET", "/status") => {
            let state_json = serde_json::to_string(&state.supervisor.status())
                .unwrap_or_else(|_| "\"unknown\"".to_string());
            Response::json(200, &format!(r#"{{"detector":{state_json}}}"#))
        }
        ("POST", "/capture") => submit_capture(state, request),
        ("GET", "/captures") => list_captures(state.store.list()),
        ("GET", "/previews") => list_captures(state.store.list_previews()),
        ("GET", _) if path.starts_with("/captures/") => {
            fetch_capture(state, &path["/captures/".len()..], Variant::Full)
        }
        ("GET", _) if path.starts_with("/previews/") => {
            fetch_capture(state, &path["/previews/".len()..], Variant::Preview)
        }
        ("DELETE", _) if path.starts_with("/captures/") => {
            delete_capture(state, &path["/captures/".len()..])
        }
        ("GET" | "POST" | "DELETE", _) => Response::json(404, r#"{"error":"not_found"}"#),
        _ => Response::json(405, r#"{"error":"method_not_allowed"}"#),
    }
}

fn login(state: &AppState, request: &HttpRequest) -> Response {
    let body: LoginBody = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(_) => return Response::json(400, r#"{"error":"bad_request"}"#),
    };
    match state.gate.issue(&body.username, &body.password) {
        Ok(token) => {
            let payload = serde_json::json!({ "token": token });
            Response::json(200, &payload.to_string())
        }
        Err(err) => {
            log::warn!("login rejected for {:?}: {}", body.username, err);
            Response::json(401, r#"{"error":"invalid_credentials"}"#)
        }
    }
}

fn start_detector(state: &AppState) -> Response {
    match state.supervisor.start() {
        Ok(()) => Response::json(200, r#"{"status":"ok","detector":"running"}"#),
        Err(err) => {
            log::warn!("detector start failed: {}", err);
            warning_response(&err.to_string())
        }
    }
}

fn stop_detector(state: &AppState) -> Response {
    match state.supervisor.stop() {
        Ok(StopAck::Stopped) => Response::json(200, r#"{"status":"ok","detector":"stopped"}"#),
        Ok(StopAck::NotRunning) => {
            Response::json(200, r#"{"status":"ok","detail":"nothing to stop"}"#)
        }
        Err(err) => {
            log::warn!("detector stop failed: {}", err);
            warning_response(&err.to_string())
        }
    }
}

fn submit_capture(state: &AppState, request: &HttpRequest) -> Response {
    let body: CaptureBody = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(_) => return Response::json(400, r#"{"error":"bad_request"}"#),
    };
    let raw = match base64::engine::general_purpose::STANDARD.decode(&body.image_data) {
        Ok(raw) => raw,
        Err(_) => return Response::json(400, r#"{"error":"bad_request"}"#),
    };
    match state.store.submit(&raw) {
        Ok(id) => {
            let payload = serde_json::json!({ "id": id });
            Response::json(200, &payload.to_string())
        }
        Err(err) => {
            log::warn!("capture submit failed: {}", err);
            Response::json(500, r#"{"error":"persist_failure"}"#)
        }
    }
}

fn list_captures(ids: Result<Vec<String>>) -> Response {
    match ids.and_then(|ids| Ok(serde_json::to_string(&ids)?)) {
        Ok(payload) => Response::json(200, &payload),
        Err(err) => {
            log::warn!("capture listing failed: {}", err);
            Response::json(500, r#"{"error":"listing_failure"}"#)
        }
    }
}

fn fetch_capture(state: &AppState, id: &str, variant: Variant) -> Response {
    match state.store.fetch(id, variant) {
        Ok(bytes) => Response::jpeg(bytes),
        Err(StoreError::NotFound) => Response::json(404, r#"{"error":"not_found"}"#),
        Err(err) => {
            log::warn!("capture fetch failed: {}", err);
            Response::json(500, r#"{"error":"fetch_failure"}"#)
        }
    }
}

fn delete_capture(state: &AppState, id: &str) -> Response {
    match state.store.delete(id) {
        Ok(()) => Response::json(200, r#"{"status":"deleted"}"#),
        Err(StoreError::NotFound) => Response::json(404, r#"{"error":"not_found"}"#),
        Err(err) => {
            log::warn!("capture delete failed: {}", err);
            Response::json(500, r#"{"error":"delete_failure"}"#)
        }
    }
}

fn auth_response(err: &AuthError) -> Response {
    match err {
        AuthError::Unauthenticated => Response::json(401, r#"{"error":"missing_token"}"#),
        AuthError::Forbidden => Response::json(403, r#"{"error":"invalid_token"}"#),
        AuthError::InvalidCredentials => {
            Response::json(401, r#"{"error":"invalid_credentials"}"#)
        }
    }
}

fn warning_response(detail: &str) -> Response {
    let payload = serde_json::json!({ "status": "warning", "detail": detail });
    Response::json(200, &payload.to_string())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed mid-request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
        if body.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request body too large"));
        }
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
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
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }
}
