//! Scripted single-threaded HTTP mock for exercising the client against
//! canned responses, one accepted connection per scripted exchange.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

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
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

pub struct MockServer {
    pub url: String,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl MockServer {
    /// Bind an ephemeral port and serve the scripted responses in order,
    /// one fresh connection each (responses carry `Connection: close`).
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

    /// Endpoint URL as a backend would configure it.
    pub fn endpoint(&self) -> String {
        format!("{}/api", self.url)
    }

    /// Join the server thread and hand back what it saw. Panics if fewer
    /// requests arrived than responses were scripted.
    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().expect("mock server thread")
    }
}

fn serve_one(mut stream: TcpStream, response: &MockResponse) -> RecordedRequest {
    // Headers arrive byte-wise so nothing of the body is over-read.
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

pub const LOGIN_FORM_TOKEN: &str = "FormTok123";
pub const SESSION_CSRF_TOKEN: &str = "SessTok456";

/// The login form page with the hidden CSRF input.
pub fn login_page() -> MockResponse {
    MockResponse::html(
        200,
        &format!(
            "<form method=\"post\"><input type=\"hidden\" \
             name=\"csrfmiddlewaretoken\" value=\"{LOGIN_FORM_TOKEN}\"></form>"
        ),
    )
}

/// Successful login: redirect home, session cookie issued.
pub fn login_ok() -> MockResponse {
    MockResponse::empty(302)
        .with_header("Location", "/")
        .with_header("Set-Cookie", "sessionid=s3ss10n; Path=/; HttpOnly")
        .with_header("Set-Cookie", "csrftoken=c00k13; Path=/")
}

/// Browsable-API HTML page carrying the session CSRF token.
pub fn csrf_page() -> MockResponse {
    csrf_page_with(SESSION_CSRF_TOKEN)
}

pub fn csrf_page_with(token: &str) -> MockResponse {
    MockResponse::html(
        200,
        &format!("<script>var config = {{csrfToken: \"{token}\"}};</script>"),
    )
}

/// A one-page listing envelope.
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

/// Minimal treenode document.
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

/// The user → organization → root-treenode discovery chain for an
/// organization whose root node id is 1.
pub fn root_discovery(url: &str, username: &str) -> Vec<MockResponse> {
    vec![
        page_json(&[serde_json::json!({
            "username": username,
            "organization": format!("{url}/api/organizations/3/"),
        })]),
        MockResponse::json(
            200,
            &serde_json::json!({
                "name": "ACME",
                "plan": format!("{url}/api/plans/2/"),
                "quota_bytes": 1_000_000u64,
                "tree_node": format!("{url}/api/treenodes/1/"),
            })
            .to_string(),
        ),
        MockResponse::json(200, &tree_node(1, "ACME", "ORGANIZATION").to_string()),
    ]
}
