//! Scripted HTTP mock for driving the backend end to end against canned
//! responses: one accepted connection per scripted exchange, request
//! bodies captured for assertion.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use vaultfs_api::{SUPPORTED_VERSION, VERSION_HEADER};

use crate::config::VaultConfig;

pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn html(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    pub fn query(&self) -> &str {
        self.target.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }
}

pub struct MockServer {
    pub url: String,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl MockServer {
    pub fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();
        let url = format!("http://127.0.0.1:{port}");
        let handle = std::thread::spawn(move || {
            let mut records = Vec::new();
            for response in responses {
                let (stream, _) = listener.accept().expect("accept");
                records.push(serve_one(stream, &response));
            }
            records
        });
        Self { url, handle }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api", self.url)
    }

    pub fn config(&self) -> VaultConfig {
        VaultConfig {
            username: "admin".into(),
            password: "hunter2".into(),
            endpoint: self.endpoint(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            resume_deposit_id: None,
            show_deposit_progress: false,
        }
    }

    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().expect("mock server thread")
    }
}

fn serve_one(mut stream: TcpStream, response: &MockResponse) -> RecordedRequest {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).expect("read request head");
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        stream.read_exact(&mut body).expect("read request body");
    }

    let mut out = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: {}\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).expect("write response head");
    stream.write_all(&response.body).expect("write response body");
    stream.flush().expect("flush response");

    RecordedRequest {
        method,
        target,
        headers,
        body,
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        302 => "Found",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

// ---------------------------------------------------------------------
// Canned fixtures
// ---------------------------------------------------------------------

/// Construction-time traffic: login page, login post, version probe.
pub fn session_prelude() -> Vec<MockResponse> {
    vec![
        MockResponse::html(
            200,
            "<form method=\"post\"><input type=\"hidden\" \
             name=\"csrfmiddlewaretoken\" value=\"FormTok123\"></form>",
        ),
        MockResponse::empty(302)
            .with_header("Location", "/")
            .with_header("Set-Cookie", "sessionid=s3ss10n; Path=/; HttpOnly"),
        MockResponse::json(200, "{}").with_header(VERSION_HEADER, SUPPORTED_VERSION),
    ]
}

/// Browsable-API page carrying the session CSRF token.
pub fn csrf_page() -> MockResponse {
    MockResponse::html(200, "<script>var config = {csrfToken: \"SessTok456\"};</script>")
}

pub fn page_json(results: &[serde_json::Value]) -> MockResponse {
    MockResponse::json(
        200,
        &serde_json::json!({
            "count": results.len(),
            "next": null,
            "previous": null,
            "results": results,
        })
        .to_string(),
    )
}

pub fn tree_node(id: i64, name: &str, node_type: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "node_type": node_type,
        "parent": null,
        "path": format!("{id}"),
        "modified_at": "January 2, 2006 15:04:05 UTC",
        "size": null,
        "content_url": null,
        "file_type": null,
        "md5_sum": null,
        "sha1_sum": null,
        "sha256_sum": null,
        "url": "",
    })
}

/// user → organization → root-treenode chain; the root node id is 1.
pub fn root_discovery() -> Vec<MockResponse> {
    vec![
        page_json(&[serde_json::json!({
            "username": "admin",
            "organization": "http://unused/api/organizations/3/",
        })]),
        MockResponse::json(
            200,
            &serde_json::json!({
                "name": "ACME",
                "plan": "http://unused/api/plans/2/",
                "quota_bytes": 1_000_000u64,
                "tree_node": "http://unused/api/treenodes/1/",
            })
            .to_string(),
        ),
        MockResponse::json(200, &tree_node(1, "ACME", "ORGANIZATION").to_string()),
    ]
}

/// A collection document wrapping treenode 5, with collection id 7.
pub fn collection_for_node_5() -> MockResponse {
    page_json(&[serde_json::json!({
        "name": "C1",
        "tree_node": "http://unused/api/treenodes/5/",
        "url": "http://unused/api/collections/7/",
    })])
}
