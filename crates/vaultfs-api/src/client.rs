use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::cache::Cache;
use crate::error::{ApiError, Result};
use crate::multipart::MultipartForm;
use crate::types::{
    Collection, CollectionStats, DepositStatus, Organization, Page, PathInfo, Plan,
    RegisterDepositRequest, RegisterDepositResponse, TreeNode, User,
};

/// Response header carrying the server's API version.
pub const VERSION_HEADER: &str = "X-Vault-API-Version";

/// API version this client speaks.
pub const SUPPORTED_VERSION: &str = "1";

/// Query window for `find_*` calls. One organization's contents fit in a
/// single page, which keeps pagination out of the picture.
const DEFAULT_LIMIT: &str = "10000";

/// Upper bound when slurping an HTML or error body.
const MAX_RESPONSE_BODY: u64 = 1 << 24;

static CSRF_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="csrfmiddlewaretoken"\s+value="([^"]+)""#).expect("static regex")
});

static CSRF_JS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"csrfToken:\s*"([^"]*)""#).expect("static regex"));

/// Filter parameters for `find_*` queries. Keys iterate in sorted order so
/// the cache fingerprint is stable.
#[derive(Debug, Clone, Default)]
pub struct Query {
    params: BTreeMap<String, String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn ensure_page_defaults(&mut self) {
        if !self.params.contains_key("limit") && !self.params.contains_key("offset") {
            self.params.insert("offset".into(), "0".into());
            self.params.insert("limit".into(), DEFAULT_LIMIT.into());
        }
    }

    fn fingerprint(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_default()
    }
}

/// Authenticated client for the Vault REST API.
///
/// Thread-safe: the agent is shareable, and the cookie map, CSRF token and
/// result cache are behind their own locks. One instance is meant to be
/// shared by every concurrent caller of a backend.
pub struct VaultApi {
    endpoint: String,
    username: String,
    password: String,
    login_url: String,
    agent: ureq::Agent,
    /// Separate agent with redirects disabled, so the `Set-Cookie` headers
    /// on the login 302 are observable.
    login_agent: ureq::Agent,
    cookies: Mutex<BTreeMap<String, String>>,
    csrf: Mutex<Option<String>>,
    cache: Cache,
}

impl VaultApi {
    /// Set up a client for `endpoint` (e.g. `https://vault.example.org/api`;
    /// a trailing slash is stripped). No network traffic happens here.
    pub fn new(endpoint: &str, username: &str, password: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let parsed = Url::parse(&endpoint)
            .map_err(|e| ApiError::Config(format!("invalid endpoint URL '{endpoint}': {e}")))?;

        let mut login = parsed.clone();
        let base = login.path().trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base).to_string();
        // Trailing slash required, cf. django APPEND_SLASH.
        login.set_path(&format!("{base}/accounts/login/"));

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();
        let login_agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();

        Ok(Self {
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
            login_url: login.to_string(),
            agent,
            login_agent,
            cookies: Mutex::new(BTreeMap::new()),
            csrf: Mutex::new(None),
            cache: Cache::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    // -----------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------

    /// Establish a session via the browser-style login form: fetch the form,
    /// lift the hidden CSRF token out of it, post the credentials with the
    /// token both as a form field and a seeded `csrftoken` cookie, then keep
    /// the cookies the server hands back.
    pub fn login(&self) -> Result<()> {
        let resp = self
            .login_agent
            .get(&self.login_url)
            .call()
            .map_err(|e| ApiError::Auth(format!("cannot access login url: {e}")))?;
        let body = read_limited(resp)?;
        let token = CSRF_INPUT_RE
            .captures(&body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| ApiError::Auth("login page has no csrfmiddlewaretoken field".into()))?;

        let result = self
            .login_agent
            .post(&self.login_url)
            // The server refuses CSRF-protected posts without a Referer.
            .set("Referer", &self.login_url)
            .set("Cookie", &format!("csrftoken={token}"))
            .send_form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("csrfmiddlewaretoken", token.as_str()),
            ]);
        let resp = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(ApiError::Auth(format!("login failed with HTTP {code}")))
            }
            Err(e) => return Err(ApiError::Auth(format!("login post: {e}"))),
        };

        {
            let mut cookies = self.lock_cookies();
            cookies.insert("csrftoken".into(), token);
            for header in resp.all("set-cookie") {
                if let Some((name, value)) = parse_set_cookie(header) {
                    if value.is_empty() {
                        cookies.remove(&name);
                    } else {
                        cookies.insert(name, value);
                    }
                }
            }
            if !cookies.contains_key("sessionid") {
                return Err(ApiError::Auth("server did not issue a session cookie".into()));
            }
        }
        tracing::debug!("logged in to {} as {}", self.endpoint, self.username);
        Ok(())
    }

    /// Compare the advertised API version against [`SUPPORTED_VERSION`].
    /// A missing header (or an unreachable probe) is tolerated.
    pub fn ensure_version(&self) -> Result<()> {
        let resp = match self.with_cookies(self.agent.get(&self.abs("/"))).call() {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("could not probe API version: {e}");
                return Ok(());
            }
        };
        match resp.header(VERSION_HEADER) {
            Some(server) if server != SUPPORTED_VERSION => Err(ApiError::VersionMismatch {
                server: server.to_string(),
                supported: SUPPORTED_VERSION.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                tracing::debug!("server does not advertise an API version");
                Ok(())
            }
        }
    }

    /// Drop the session cookies.
    pub fn logout(&self) {
        self.lock_cookies().clear();
        *self.lock_csrf() = None;
    }

    /// Teardown: clear the result cache and the session state.
    pub fn reset(&self) {
        self.cache.reset();
        self.logout();
    }

    // -----------------------------------------------------------------
    // Typed reads
    // -----------------------------------------------------------------

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.get_cached("users", "user", id)
    }

    pub fn get_organization(&self, id: i64) -> Result<Organization> {
        self.get_cached("organizations", "organization", id)
    }

    pub fn get_collection(&self, id: i64) -> Result<Collection> {
        self.get_cached("collections", "collection", id)
    }

    pub fn get_tree_node(&self, id: i64) -> Result<TreeNode> {
        self.get_cached("treenodes", "treenode", id)
    }

    pub fn get_plan(&self, id: i64) -> Result<Plan> {
        self.get_cached("plans", "plan", id)
    }

    pub fn find_users(&self, query: &Query) -> Result<Vec<User>> {
        self.find("find_users", "/users/", Some("users"), query)
    }

    pub fn find_organizations(&self, query: &Query) -> Result<Vec<Organization>> {
        self.find("find_organizations", "/organizations/", None, query)
    }

    pub fn find_collections(&self, query: &Query) -> Result<Vec<Collection>> {
        self.find("find_collections", "/collections/", None, query)
    }

    pub fn find_tree_nodes(&self, query: &Query) -> Result<Vec<TreeNode>> {
        self.find("find_tree_nodes", "/treenodes/", Some("treenodes"), query)
    }

    /// The current user.
    pub fn user(&self) -> Result<User> {
        let users = self.find_users(&Query::new().set("username", &self.username))?;
        match users.len() {
            0 => Err(ApiError::NotFound),
            1 => Ok(users.into_iter().next().expect("length checked")),
            n => Err(ApiError::Ambiguous(format!(
                "{n} users named '{}'",
                self.username
            ))),
        }
    }

    /// The current user's organization.
    pub fn organization(&self) -> Result<Organization> {
        let user = self.user()?;
        let id = user.organization_id().ok_or_else(|| {
            ApiError::InvalidResponse(format!(
                "user '{}' does not belong to an organization",
                user.username
            ))
        })?;
        self.get_organization(id)
    }

    /// The organization's plan.
    pub fn plan(&self) -> Result<Plan> {
        let org = self.organization()?;
        let id = org.plan_id().ok_or_else(|| {
            ApiError::InvalidResponse(format!("organization '{}' has no plan", org.name))
        })?;
        self.get_plan(id)
    }

    /// The organization treenode, the root of the session's tree.
    pub fn root_node(&self) -> Result<TreeNode> {
        let org = self.organization()?;
        let id = org.tree_node_id().ok_or_else(|| {
            ApiError::InvalidResponse(format!("organization '{}' has no tree node", org.name))
        })?;
        self.get_tree_node(id)
    }

    /// Immediate children of a treenode.
    pub fn children(&self, node: &TreeNode) -> Result<Vec<TreeNode>> {
        self.find_tree_nodes(&Query::new().set("parent", node.id))
    }

    /// The collection wrapping a COLLECTION treenode.
    pub fn tree_node_to_collection(&self, node: &TreeNode) -> Result<Collection> {
        let found = self.find_collections(&Query::new().set("tree_node", node.id))?;
        found.into_iter().next().ok_or_else(|| {
            ApiError::InvalidResponse(format!("no collection wraps treenode {}", node.id))
        })
    }

    /// Usage counters per collection (file counts and sizes).
    pub fn collection_stats(&self) -> Result<CollectionStats> {
        self.get_json("collection_stats", "/collections_stats", &Query::new())
    }

    /// Progress counters for a deposit.
    pub fn deposit_status(&self, id: i64) -> Result<DepositStatus> {
        self.get_json(
            "deposit_status",
            "/deposit_status",
            &Query::new().set("deposit_id", id),
        )
    }

    // -----------------------------------------------------------------
    // Path resolution
    // -----------------------------------------------------------------

    /// Resolve an absolute path to a treenode by walking the tree segment
    /// by segment from the organization root. Case sensitive, like the
    /// server. `""` and `"/"` resolve to the root.
    pub fn resolve_path(&self, path: &str) -> Result<TreeNode> {
        let mut node = self.root_node()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let matches = self.find_tree_nodes(
                &Query::new().set("parent", node.id).set("name", segment),
            )?;
            match matches.len() {
                0 => return Err(ApiError::NotFound),
                1 => node = matches.into_iter().next().expect("length checked"),
                n => {
                    return Err(ApiError::Ambiguous(format!(
                        "{n} siblings named '{segment}' under node {}",
                        node.id
                    )))
                }
            }
        }
        Ok(node)
    }

    /// Split an absolute path into its collection node, leaf node and the
    /// path below the collection (`"/"` when there is none).
    pub fn split_path(&self, path: &str) -> Result<PathInfo> {
        if !path.starts_with('/') {
            return Err(ApiError::InvalidPath(format!(
                "absolute path required: {path}"
            )));
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let first = segments
            .first()
            .ok_or_else(|| ApiError::InvalidPath(path.to_string()))?;
        let collection = self.resolve_path(&format!("/{first}"))?;
        let leaf = self.resolve_path(path)?;
        let relative_path = if segments.len() > 1 {
            segments[1..].join("/")
        } else {
            "/".to_string()
        };
        Ok(PathInfo {
            collection,
            leaf,
            relative_path,
        })
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    /// Create a top-level collection.
    pub fn create_collection(&self, name: &str) -> Result<()> {
        let body = serde_json::json!({ "name": name });
        self.mutate(
            "create_collection",
            "POST",
            "/collections/",
            Some(&body),
            "collections",
        )?;
        Ok(())
    }

    /// Create a folder below a collection or folder node.
    pub fn create_folder(&self, parent: &TreeNode, name: &str) -> Result<()> {
        tracing::debug!("creating folder {name} under node {}", parent.id);
        let body = serde_json::json!({
            "name": name,
            "node_type": "FOLDER",
            "parent": self.node_url(parent.id),
        });
        self.mutate(
            "create_folder",
            "POST",
            "/treenodes/",
            Some(&body),
            "treenodes",
        )?;
        Ok(())
    }

    /// Rename a node in place.
    pub fn rename(&self, node: &TreeNode, new_name: &str) -> Result<()> {
        let body = serde_json::json!({ "name": new_name });
        self.mutate(
            "rename",
            "PATCH",
            &format!("/treenodes/{}/", node.id),
            Some(&body),
            "treenodes",
        )?;
        Ok(())
    }

    /// Re-parent a node under a new container.
    pub fn move_node(&self, node: &TreeNode, new_parent: &TreeNode) -> Result<()> {
        let body = serde_json::json!({ "parent": self.node_url(new_parent.id) });
        self.mutate(
            "move_node",
            "PATCH",
            &format!("/treenodes/{}/", node.id),
            Some(&body),
            "treenodes",
        )?;
        Ok(())
    }

    /// Delete a node. The server cascades to children.
    pub fn remove(&self, node: &TreeNode) -> Result<()> {
        self.mutate(
            "remove",
            "DELETE",
            &format!("/treenodes/{}/", node.id),
            None,
            "treenodes",
        )?;
        Ok(())
    }

    /// Register a batch of planned uploads. A 5xx here commonly signals a
    /// transient server-side integrity violation, so it maps to a
    /// retry-after-delay hint rather than a hard failure.
    pub fn register_deposit(&self, request: &RegisterDepositRequest) -> Result<i64> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::InvalidResponse(format!("register_deposit encode: {e}")))?;
        let resp = self
            .mutate(
                "register_deposit",
                "POST",
                "/register_deposit",
                Some(&body),
                "deposits",
            )
            .map_err(|e| match e {
                ApiError::Http {
                    context,
                    status,
                    message,
                } if status >= 500 => ApiError::Transient {
                    context,
                    status,
                    message,
                },
                other => other,
            })?;
        let out: RegisterDepositResponse = resp
            .into_json()
            .map_err(|e| ApiError::InvalidResponse(format!("register_deposit decode: {e}")))?;
        tracing::info!("deposit registered: {}", out.deposit_id);
        Ok(out.deposit_id)
    }

    // -----------------------------------------------------------------
    // Escape hatches and streaming
    // -----------------------------------------------------------------

    /// Raw call against an API path, for endpoints without a typed wrapper
    /// (the chunk probe leg).
    pub fn call(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ureq::Response> {
        let mut req = self.agent.request(method, &self.abs(path));
        for (key, value) in query {
            req = req.query(key, value);
        }
        self.with_cookies(req)
            .call()
            .map_err(|e| ApiError::from_ureq(path, e))
    }

    /// Raw call decoding a JSON response.
    pub fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self.call(method, path, query)?;
        resp.into_json()
            .map_err(|e| ApiError::InvalidResponse(format!("{path}: {e}")))
    }

    /// Multipart POST against an API path (the chunk upload leg). `fields`
    /// become form fields in order, followed by a `file` part carrying
    /// `data` under `filename`.
    pub fn call_multipart(
        &self,
        path: &str,
        fields: &[(&str, String)],
        filename: &str,
        data: &[u8],
    ) -> Result<ureq::Response> {
        let mut retried = false;
        loop {
            let token = self.csrf_token()?;
            let mut form = MultipartForm::new();
            for (key, value) in fields {
                form.text(key, value);
            }
            form.file("file", filename, data);
            let (content_type, body) = form.finish();

            let req = self
                .agent
                .post(&self.abs(path))
                .set("Content-Type", &content_type)
                .set("X-CSRFTOKEN", &token)
                .set("Referer", &self.referer_url("flow_chunk"));
            match self.with_cookies(req).send_bytes(&body) {
                Ok(resp) => return Ok(resp),
                Err(ureq::Error::Status(403, _)) if !retried => {
                    retried = true;
                    tracing::debug!("{path}: CSRF token rejected, refetching");
                    self.invalidate_csrf();
                }
                Err(e) => return Err(ApiError::from_ureq(path, e)),
            }
        }
    }

    /// Stream the content of an assembled FILE node.
    pub fn content(&self, node: &TreeNode) -> Result<Box<dyn Read + Send + 'static>> {
        let url = node.content_url().ok_or_else(|| {
            ApiError::InvalidResponse(format!(
                "treenode {} ('{}') has no content url; the deposit may not be assembled yet",
                node.id, node.name
            ))
        })?;
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| ApiError::from_ureq("content", e))?;
        Ok(Box::new(resp.into_reader()))
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn abs(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn node_url(&self, id: i64) -> String {
        format!("{}/treenodes/{}/", self.endpoint, id)
    }

    fn referer_url(&self, suffix: &str) -> String {
        format!("{}/{}", self.endpoint, suffix)
    }

    fn lock_cookies(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_csrf(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.csrf.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self.lock_cookies();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn with_cookies(&self, req: ureq::Request) -> ureq::Request {
        match self.cookie_header() {
            Some(header) => req.set("Cookie", &header),
            None => req,
        }
    }

    /// Session CSRF token for mutating calls, fetched once from any
    /// HTML-accepting endpoint and cached. Invalidated on 403.
    fn csrf_token(&self) -> Result<String> {
        if let Some(token) = self.lock_csrf().clone() {
            return Ok(token);
        }
        let resp = self
            .with_cookies(self.agent.get(&self.abs("/users/")))
            .set("Accept", "text/html")
            .call()
            .map_err(|e| ApiError::from_ureq("csrf_token", e))?;
        let body = read_limited(resp)?;
        let token = CSRF_JS_RE
            .captures(&body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| {
                ApiError::InvalidResponse("no csrfToken in HTML response".to_string())
            })?;
        *self.lock_csrf() = Some(token.clone());
        Ok(token)
    }

    fn invalidate_csrf(&self) {
        *self.lock_csrf() = None;
    }

    /// Shared driver for CSRF-guarded mutations. Retries exactly once with
    /// a fresh token when the server answers 403.
    fn mutate(
        &self,
        context: &str,
        method: &str,
        path: &str,
        body: Option<&serde_json::Value>,
        referer_suffix: &str,
    ) -> Result<ureq::Response> {
        let mut retried = false;
        loop {
            let token = self.csrf_token()?;
            let req = self
                .agent
                .request(method, &self.abs(path))
                .set("X-CSRFTOKEN", &token)
                .set("Referer", &self.referer_url(referer_suffix));
            let req = self.with_cookies(req);
            let result = match body {
                Some(value) => req.send_json(value),
                None => req.call(),
            };
            match result {
                Ok(resp) => return Ok(resp),
                Err(ureq::Error::Status(403, _)) if !retried => {
                    retried = true;
                    tracing::debug!("{context}: CSRF token rejected, refetching");
                    self.invalidate_csrf();
                }
                Err(e) => return Err(ApiError::from_ureq(context, e)),
            }
        }
    }

    fn get_json<T: DeserializeOwned>(&self, context: &str, path: &str, query: &Query) -> Result<T> {
        let mut req = self.agent.get(&self.abs(path));
        for (key, value) in query.pairs() {
            req = req.query(key, value);
        }
        let resp = self
            .with_cookies(req)
            .call()
            .map_err(|e| ApiError::from_ureq(context, e))?;
        resp.into_json()
            .map_err(|e| ApiError::InvalidResponse(format!("{context}: {e}")))
    }

    fn get_cached<T: DeserializeOwned + Serialize>(
        &self,
        collection: &str,
        group: &str,
        id: i64,
    ) -> Result<T> {
        let key = id.to_string();
        if let Some(hit) = self.cache.get_group::<T>(&key, group) {
            return Ok(hit);
        }
        let doc: T = self.get_json(group, &format!("/{collection}/{id}/"), &Query::new())?;
        self.cache.set_group(&key, group, &doc);
        Ok(doc)
    }

    /// Shared driver for filter queries. Results for cached groups are
    /// memoized by query fingerprint; empty result sets are deliberately
    /// not cached, so a lookup repeated after a create sees the new node.
    fn find<T: DeserializeOwned + Serialize>(
        &self,
        context: &str,
        path: &str,
        group: Option<&str>,
        query: &Query,
    ) -> Result<Vec<T>> {
        let mut query = query.clone();
        query.ensure_page_defaults();
        let key = query.fingerprint();
        if let Some(group) = group {
            if let Some(hit) = self.cache.get_group::<Vec<T>>(&key, group) {
                return Ok(hit);
            }
        }
        let page: Page<T> = self.get_json(context, path, &query)?;
        if let Some(group) = group {
            if !page.results.is_empty() {
                self.cache.set_group(&key, group, &page.results);
            }
        }
        Ok(page.results)
    }
}

impl fmt::Display for VaultApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vault api (v{SUPPORTED_VERSION})")
    }
}

/// Read a response body up to [`MAX_RESPONSE_BODY`] bytes.
fn read_limited(resp: ureq::Response) -> Result<String> {
    let mut body = String::new();
    resp.into_reader()
        .take(MAX_RESPONSE_BODY)
        .read_to_string(&mut body)?;
    Ok(body)
}

/// First `name=value` pair of a `Set-Cookie` header.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn api(endpoint: &str) -> VaultApi {
        VaultApi::new(endpoint, "admin", "hunter2").unwrap()
    }

    #[test]
    fn endpoint_trailing_slash_is_stripped() {
        let api = api("http://vault.example.org/api/");
        assert_eq!(api.endpoint(), "http://vault.example.org/api");
        assert_eq!(api.login_url, "http://vault.example.org/accounts/login/");
    }

    #[test]
    fn login_url_substitutes_api_suffix() {
        let api = api("http://vault.example.org/depot/api");
        assert_eq!(
            api.login_url,
            "http://vault.example.org/depot/accounts/login/"
        );
    }

    #[test]
    fn login_collects_session_cookies() {
        let server = MockServer::start(vec![login_page(), login_ok()]);
        let api = api(&server.endpoint());
        api.login().unwrap();

        let header = api.cookie_header().unwrap();
        assert!(header.contains("sessionid=s3ss10n"), "got: {header}");
        assert!(header.contains("csrftoken=c00k13"), "got: {header}");

        let requests = server.finish();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].target, "/accounts/login/");
        assert_eq!(requests[1].method, "POST");
        assert!(requests[1]
            .header("referer")
            .is_some_and(|r| r.ends_with("/accounts/login/")));
        assert_eq!(
            requests[1].header("cookie"),
            Some(format!("csrftoken={LOGIN_FORM_TOKEN}").as_str())
        );
        let form = requests[1].body_str();
        assert!(form.contains("username=admin"), "got: {form}");
        assert!(form.contains("password=hunter2"), "got: {form}");
        assert!(
            form.contains(&format!("csrfmiddlewaretoken={LOGIN_FORM_TOKEN}")),
            "got: {form}"
        );
    }

    #[test]
    fn login_http_error_is_auth_failure() {
        let server = MockServer::start(vec![login_page(), MockResponse::html(403, "nope")]);
        let api = api(&server.endpoint());
        let err = api.login().unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)), "got: {err}");
        server.finish();
    }

    #[test]
    fn login_without_session_cookie_is_auth_failure() {
        let server = MockServer::start(vec![login_page(), MockResponse::empty(302)]);
        let api = api(&server.endpoint());
        let err = api.login().unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)), "got: {err}");
        server.finish();
    }

    #[test]
    fn version_gate_rejects_mismatch() {
        let server = MockServer::start(vec![
            MockResponse::json(200, "{}").with_header(VERSION_HEADER, "2")
        ]);
        let api = api(&server.endpoint());
        let err = api.ensure_version().unwrap_err();
        match err {
            ApiError::VersionMismatch { server, supported } => {
                assert_eq!(server, "2");
                assert_eq!(supported, SUPPORTED_VERSION);
            }
            other => panic!("expected VersionMismatch, got {other}"),
        }
        server.finish();
    }

    #[test]
    fn version_gate_tolerates_missing_header() {
        let server = MockServer::start(vec![MockResponse::json(200, "{}")]);
        let api = api(&server.endpoint());
        api.ensure_version().unwrap();
        server.finish();
    }

    #[test]
    fn find_applies_pagination_defaults() {
        let server = MockServer::start(vec![page_json(&[])]);
        let api = api(&server.endpoint());
        let found = api
            .find_tree_nodes(&Query::new().set("parent", 1))
            .unwrap();
        assert!(found.is_empty());
        let requests = server.finish();
        assert_eq!(
            requests[0].target,
            "/api/treenodes/?limit=10000&offset=0&parent=1"
        );
    }

    #[test]
    fn empty_find_results_are_not_cached() {
        let server = MockServer::start(vec![page_json(&[]), page_json(&[])]);
        let api = api(&server.endpoint());
        let q = Query::new().set("parent", 1).set("name", "missing");
        assert!(api.find_tree_nodes(&q).unwrap().is_empty());
        assert!(api.find_tree_nodes(&q).unwrap().is_empty());
        // Both lookups reached the wire.
        assert_eq!(server.finish().len(), 2);
    }

    #[test]
    fn resolve_walks_segments_and_caches() {
        let mut responses = root_discovery("http://unused", "admin");
        responses.push(page_json(&[tree_node(10, "a", "COLLECTION")]));
        responses.push(page_json(&[tree_node(11, "b", "FOLDER")]));
        let server = MockServer::start(responses);
        let api = api(&server.endpoint());

        let node = api.resolve_path("/a/b").unwrap();
        assert_eq!(node.id, 11);
        assert_eq!(node.node_type, crate::NodeType::Folder);

        // Deterministic and fully cache-served the second time.
        let again = api.resolve_path("/a/b").unwrap();
        assert_eq!(again.id, 11);

        // Root resolution needs no further queries either.
        assert_eq!(api.resolve_path("/").unwrap().id, 1);
        assert_eq!(api.resolve_path("").unwrap().id, 1);

        let requests = server.finish();
        assert_eq!(requests.len(), 5);
        assert!(requests[3].target.contains("name=a"));
        assert!(requests[3].target.contains("parent=1"));
        assert!(requests[4].target.contains("name=b"));
        assert!(requests[4].target.contains("parent=10"));
    }

    #[test]
    fn resolve_missing_segment_is_not_found() {
        let mut responses = root_discovery("http://unused", "admin");
        responses.push(page_json(&[]));
        let server = MockServer::start(responses);
        let api = api(&server.endpoint());
        let err = api.resolve_path("/nope").unwrap_err();
        assert!(matches!(err, ApiError::NotFound), "got: {err}");
        server.finish();
    }

    #[test]
    fn resolve_duplicate_siblings_is_ambiguous() {
        let mut responses = root_discovery("http://unused", "admin");
        responses.push(page_json(&[
            tree_node(10, "x", "FOLDER"),
            tree_node(12, "x", "FOLDER"),
        ]));
        let server = MockServer::start(responses);
        let api = api(&server.endpoint());
        let err = api.resolve_path("/x").unwrap_err();
        assert!(matches!(err, ApiError::Ambiguous(_)), "got: {err}");
        server.finish();
    }

    #[test]
    fn split_path_requires_absolute_input() {
        let api = api("http://127.0.0.1:1/api");
        let err = api.split_path("relative/path").unwrap_err();
        assert!(matches!(err, ApiError::InvalidPath(_)), "got: {err}");
    }

    #[test]
    fn split_path_returns_collection_leaf_and_remainder() {
        let mut responses = root_discovery("http://unused", "admin");
        responses.push(page_json(&[tree_node(5, "C1", "COLLECTION")]));
        responses.push(page_json(&[tree_node(6, "a", "FILE")]));
        let server = MockServer::start(responses);
        let api = api(&server.endpoint());

        let info = api.split_path("/C1/a").unwrap();
        assert_eq!(info.collection.id, 5);
        assert_eq!(info.leaf.id, 6);
        assert_eq!(info.relative_path, "a");
        server.finish();
    }

    #[test]
    fn register_deposit_maps_500_to_transient() {
        let server = MockServer::start(vec![
            csrf_page(),
            MockResponse::html(500, "duplicate file pending assembly"),
        ]);
        let api = api(&server.endpoint());
        let err = api
            .register_deposit(&RegisterDepositRequest {
                collection_id: Some(7),
                parent_node_id: None,
                total_size: 1,
                files: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::Transient { status: 500, .. }), "got: {err}");
        let requests = server.finish();
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].path(), "/api/register_deposit");
        assert_eq!(requests[1].header("x-csrftoken"), Some(SESSION_CSRF_TOKEN));
    }

    #[test]
    fn csrf_rejection_refetches_token_once() {
        let server = MockServer::start(vec![
            csrf_page_with("stale"),
            MockResponse::html(403, "CSRF verification failed"),
            csrf_page_with("fresh"),
            MockResponse::json(200, "{}"),
        ]);
        let api = api(&server.endpoint());
        let node: TreeNode =
            serde_json::from_value(tree_node(9, "old", "FOLDER")).unwrap();
        api.rename(&node, "new").unwrap();

        let requests = server.finish();
        assert_eq!(requests[1].header("x-csrftoken"), Some("stale"));
        assert_eq!(requests[3].header("x-csrftoken"), Some("fresh"));
        assert_eq!(requests[3].method, "PATCH");
        assert_eq!(requests[3].path(), "/api/treenodes/9/");
        assert_eq!(requests[3].json(), serde_json::json!({"name": "new"}));
    }

    #[test]
    fn rename_and_move_emit_single_patches() {
        let server = MockServer::start(vec![
            csrf_page(),
            MockResponse::json(200, "{}"),
            MockResponse::json(200, "{}"),
        ]);
        let api = api(&server.endpoint());
        let node: TreeNode = serde_json::from_value(tree_node(9, "x", "FOLDER")).unwrap();
        let parent: TreeNode = serde_json::from_value(tree_node(4, "B", "COLLECTION")).unwrap();

        api.rename(&node, "y").unwrap();
        api.move_node(&node, &parent).unwrap();

        let requests = server.finish();
        assert_eq!(requests[1].json(), serde_json::json!({"name": "y"}));
        let parent_url = requests[2].json()["parent"].as_str().unwrap().to_string();
        assert!(parent_url.ends_with("/api/treenodes/4/"), "got: {parent_url}");
    }

    #[test]
    fn create_folder_posts_parent_url() {
        let server = MockServer::start(vec![csrf_page(), MockResponse::json(201, "{}")]);
        let api = api(&server.endpoint());
        let parent: TreeNode = serde_json::from_value(tree_node(5, "C1", "COLLECTION")).unwrap();
        api.create_folder(&parent, "sub").unwrap();

        let requests = server.finish();
        let body = requests[1].json();
        assert_eq!(body["name"], "sub");
        assert_eq!(body["node_type"], "FOLDER");
        assert!(body["parent"].as_str().unwrap().ends_with("/api/treenodes/5/"));
    }

    #[test]
    fn deposit_status_decodes_counters() {
        let server = MockServer::start(vec![MockResponse::json(
            200,
            r#"{"total_files": 3, "uploaded_files": 2, "assembled_files": 1,
                "in_storage_files": 0, "file_queue": 1, "errored_files": 0}"#,
        )]);
        let api = api(&server.endpoint());
        let status = api.deposit_status(42).unwrap();
        assert_eq!(status.total_files, 3);
        assert_eq!(status.uploaded_files, 2);
        let requests = server.finish();
        assert_eq!(requests[0].target, "/api/deposit_status?deposit_id=42");
    }

    #[test]
    fn parse_set_cookie_takes_first_pair() {
        assert_eq!(
            parse_set_cookie("sessionid=abc; Path=/; HttpOnly"),
            Some(("sessionid".into(), "abc".into()))
        );
        assert_eq!(parse_set_cookie("junk"), None);
    }
}
