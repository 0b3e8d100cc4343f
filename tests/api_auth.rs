use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::net::TcpStream;
use tempfile::tempdir;

use motion_warden::api::{ApiConfig, ApiHandle, ApiServer, AppState};
use motion_warden::supervisor::DetectorConfig;
use motion_warden::{CaptureStore, Gate, GateConfig, StoreConfig, Supervisor};

fn password_hex(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

struct TestApi {
    _dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        Self::with_seed("seed:api-test")
    }

    fn with_seed(seed: &str) -> Result<Self> {
        let dir = tempdir()?;
        let gate = Gate::new(&GateConfig {
            username: "alice".to_string(),
            password_sha256: password_hex("correct"),
            token_key_seed: seed.to_string(),
        })?;
        let store = CaptureStore::open(&StoreConfig {
            data_dir: dir.path().to_path_buf(),
        })?;
        let supervisor = Supervisor::new(DetectorConfig {
            program: "true".to_string(),
            args: vec![],
        });
        let state = std::sync::Arc::new(AppState {
            gate,
            supervisor,
            store,
        });
        let api_handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            state,
        )
        .spawn()?;
        Ok(Self {
            _dir: dir,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<&str>,
    ) -> Result<(String, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let body = body.unwrap_or("");
        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(token) = token {
            request.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        request.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        stream.write_all(request.as_bytes())?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let split = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap_or(response.len());
        let headers = String::from_utf8_lossy(&response[..split]).to_string();
        let payload = response[(split + 4).min(response.len())..].to_vec();
        Ok((headers, payload))
    }

    fn login(&self, username: &str, password: &str) -> Result<(String, Vec<u8>)> {
        let body = serde_json::json!({ "username": username, "password": password });
        self.request("POST", "/login", None, Some(&body.to_string()))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn gated_routes_reject_missing_token() -> Result<()> {
    let api = TestApi::new()?;

    for (method, path) in [
        ("POST", "/start"),
        ("POST", "/stop"),
        ("GET", "/status"),
        ("POST", "/capture"),
        ("GET", "/captures"),
        ("GET", "/captures/capture_0000000000000_0000"),
        ("GET", "/previews"),
        ("GET", "/previews/capture_0000000000000_0000"),
        ("DELETE", "/captures/capture_0000000000000_0000"),
    ] {
        let (headers, _body) = api.request(method, path, None, None)?;
        assert!(
            headers.contains("401 Unauthorized"),
            "{method} {path}: {headers}"
        );
    }
    Ok(())
}

#[test]
fn token_from_another_key_is_forbidden() -> Result<()> {
    let api = TestApi::new()?;
    let other = TestApi::with_seed("seed:somewhere-else")?;

    let (_headers, body) = other.login("alice", "correct")?;
    let parsed: Value = serde_json::from_slice(&body)?;
    let foreign_token = parsed["token"].as_str().expect("token").to_string();

    let (headers, _body) = api.request("GET", "/captures", Some(&foreign_token), None)?;
    assert!(headers.contains("403 Forbidden"), "{headers}");
    Ok(())
}

#[test]
fn garbage_token_is_forbidden() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _body) = api.request("GET", "/captures", Some("not-a-token"), None)?;
    assert!(headers.contains("403 Forbidden"), "{headers}");
    Ok(())
}

#[test]
fn login_flow_grants_access() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _body) = api.login("alice", "wrong")?;
    assert!(headers.contains("401 Unauthorized"), "{headers}");

    let (headers, body) = api.login("alice", "correct")?;
    assert!(headers.contains("200 OK"), "{headers}");
    let parsed: Value = serde_json::from_slice(&body)?;
    let token = parsed["token"].as_str().expect("token").to_string();

    let (headers, body) = api.request("GET", "/captures", Some(&token), None)?;
    assert!(headers.contains("200 OK"), "{headers}");
    let listing: Value = serde_json::from_slice(&body)?;
    assert!(listing.as_array().expect("array").is_empty());
    Ok(())
}

#[test]
fn health_is_ungated() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.request("GET", "/health", None, None)?;
    assert!(headers.contains("200 OK"), "{headers}");
    let parsed: Value = serde_json::from_slice(&body)?;
    assert_eq!(parsed["status"], "ok");
    Ok(())
}

#[test]
fn unknown_route_is_not_found() -> Result<()> {
    let api = TestApi::new()?;
    let (_headers, body) = api.login("alice", "correct")?;
    let parsed: Value = serde_json::from_slice(&body)?;
    let token = parsed["token"].as_str().expect("token").to_string();

    let (headers, _body) = api.request("GET", "/nonexistent", Some(&token), None)?;
    assert!(headers.contains("404 Not Found"), "{headers}");
    Ok(())
}
