//! Test helpers for org-portal integration tests.
//!
//! The router is driven in-process with `oneshot`; the hosted backend is
//! replaced by in-memory fakes.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use org_portal::config::{GateSettings, ServerSettings, SiteSettings};
use org_portal::models::{
    AuthSession, AuthUser, Organization, OrganizationChanges, SessionTokens, UserRecord,
    UserUpdate,
};
use org_portal::services::{AssetStore, AuthProvider, ProfileStore};
use org_portal::startup::build_router;
use org_portal::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

pub const TEST_EMAIL: &str = "ada@example.com";
pub const TEST_PASSWORD: &str = "correct-horse";
pub const TEST_USER_ID: &str = "user-1";
pub const TEST_OAUTH_CODE: &str = "good-code";
pub const FIRST_SESSION_ID: &str = "sess-1";
pub const ROTATED_SESSION_ID: &str = "sess-2";

pub fn test_user() -> AuthUser {
    AuthUser {
        id: TEST_USER_ID.to_string(),
        email: Some(TEST_EMAIL.to_string()),
        full_name: Some("Ada Lovelace".to_string()),
        avatar_url: None,
    }
}

/// Unsigned JWT for the test user, tagged with a provider session id.
pub fn access_token(session_id: &str) -> String {
    let claims = serde_json::json!({
        "sub": TEST_USER_ID,
        "email": TEST_EMAIL,
        "exp": 4_102_444_800i64,
        "session_id": session_id,
    });
    format!(
        "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.{}.signature",
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

fn tokens_for(session_id: &str) -> SessionTokens {
    SessionTokens {
        access_token: access_token(session_id),
        refresh_token: Some(format!("refresh-{}", session_id)),
        expires_at: 4_102_444_800,
    }
}

/// Auth provider that knows one user and honours one access token at a time.
pub struct FakeAuth {
    /// Make session lookups fail as if the provider were unreachable.
    pub session_fails: Mutex<bool>,
    /// Tokens handed out at sign-in are rejected afterwards.
    pub sessions_revoked: Mutex<bool>,
    /// The next session lookup refreshes the token pair.
    pub rotate_next: Mutex<bool>,
    pub live_tokens: Mutex<SessionTokens>,
    /// Access tokens presented to `get_session`, in order.
    pub session_lookups: Mutex<Vec<String>>,
    /// Access tokens presented to `get_user`, in order.
    pub user_lookups: Mutex<Vec<String>>,
    pub sign_outs: AtomicUsize,
    pub verifiers: Mutex<Vec<String>>,
}

impl Default for FakeAuth {
    fn default() -> Self {
        Self {
            session_fails: Mutex::new(false),
            sessions_revoked: Mutex::new(false),
            rotate_next: Mutex::new(false),
            live_tokens: Mutex::new(tokens_for(FIRST_SESSION_ID)),
            session_lookups: Mutex::new(Vec::new()),
            user_lookups: Mutex::new(Vec::new()),
            sign_outs: AtomicUsize::new(0),
            verifiers: Mutex::new(Vec::new()),
        }
    }
}

impl FakeAuth {
    fn honours(&self, access_token: &str) -> bool {
        !*self.sessions_revoked.lock().unwrap()
            && self.live_tokens.lock().unwrap().access_token == access_token
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn get_session(&self, tokens: &SessionTokens) -> Result<Option<AuthSession>> {
        self.session_lookups
            .lock()
            .unwrap()
            .push(tokens.access_token.clone());
        if *self.session_fails.lock().unwrap() {
            return Err(anyhow::anyhow!("auth provider unreachable"));
        }
        if !self.honours(&tokens.access_token) {
            return Ok(None);
        }

        let refreshed = std::mem::take(&mut *self.rotate_next.lock().unwrap());
        let tokens = if refreshed {
            let rotated = tokens_for(ROTATED_SESSION_ID);
            *self.live_tokens.lock().unwrap() = rotated.clone();
            rotated
        } else {
            tokens.clone()
        };

        Ok(Some(AuthSession {
            user_id: TEST_USER_ID.to_string(),
            email: Some(TEST_EMAIL.to_string()),
            expires_at: tokens.expires_at,
            tokens,
            refreshed,
        }))
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        self.user_lookups
            .lock()
            .unwrap()
            .push(access_token.to_string());
        if self.honours(access_token) {
            Ok(Some(test_user()))
        } else {
            Ok(None)
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionTokens>> {
        if email == TEST_EMAIL && password == TEST_PASSWORD {
            Ok(Some(self.live_tokens.lock().unwrap().clone()))
        } else {
            Ok(None)
        }
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String {
        format!(
            "https://auth.test/authorize?provider={}&redirect_to={}&code_challenge={}",
            provider, redirect_to, code_challenge
        )
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<SessionTokens> {
        self.verifiers
            .lock()
            .unwrap()
            .push(code_verifier.to_string());
        if auth_code == TEST_OAUTH_CODE {
            Ok(self.live_tokens.lock().unwrap().clone())
        } else {
            Err(anyhow::anyhow!("invalid grant"))
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Formatted log output of the current test, captured through a scoped subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Route this thread's events here until the guard is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// How the fake answers the organization existence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgCheck {
    /// Answer from the stored organizations.
    FromRecords,
    Fail,
    Hang,
}

pub struct FakeProfiles {
    pub org_check: Mutex<OrgCheck>,
    pub org_checks: AtomicUsize,
    pub users: Mutex<HashMap<String, UserRecord>>,
    pub organizations: Mutex<Vec<Organization>>,
}

impl Default for FakeProfiles {
    fn default() -> Self {
        Self {
            org_check: Mutex::new(OrgCheck::FromRecords),
            org_checks: AtomicUsize::new(0),
            users: Mutex::new(HashMap::new()),
            organizations: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProfiles {
    pub fn with_organization(self, creator: &str, name: &str) -> Self {
        self.organizations.lock().unwrap().push(Organization {
            id: format!("org-{}", creator),
            name: name.to_string(),
            creator: creator.to_string(),
            ..Organization::default()
        });
        self
    }

    pub fn set_org_check(&self, check: OrgCheck) {
        *self.org_check.lock().unwrap() = check;
    }

    pub fn org_check_count(&self) -> usize {
        self.org_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn organization_exists(&self, user_id: &str, _access_token: &str) -> Result<bool> {
        self.org_checks.fetch_add(1, Ordering::SeqCst);
        let check = *self.org_check.lock().unwrap();
        match check {
            OrgCheck::FromRecords => Ok(self
                .organizations
                .lock()
                .unwrap()
                .iter()
                .any(|o| o.creator == user_id)),
            OrgCheck::Fail => Err(anyhow::anyhow!("connection reset by peer")),
            OrgCheck::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(true)
            }
        }
    }

    async fn get_user(&self, user_id: &str, _access_token: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert_user(&self, update: &UserUpdate, _access_token: &str) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        let record = users.entry(update.id.clone()).or_insert_with(|| UserRecord {
            id: update.id.clone(),
            ..UserRecord::default()
        });
        record.name = update.name.clone();
        record.username = update.username.clone();
        record.bio = update.bio.clone();
        if update.avatar_url.is_some() {
            record.avatar_url = update.avatar_url.clone();
        }
        Ok(())
    }

    async fn organization_for_creator(
        &self,
        user_id: &str,
        _access_token: &str,
    ) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.creator == user_id)
            .cloned())
    }

    async fn update_organization(
        &self,
        org_id: &str,
        changes: &OrganizationChanges,
        _access_token: &str,
    ) -> Result<()> {
        let mut orgs = self.organizations.lock().unwrap();
        let org = orgs
            .iter_mut()
            .find(|o| o.id == org_id)
            .ok_or_else(|| anyhow::anyhow!("no such organization"))?;
        org.name = changes.name.clone();
        org.description = changes.description.clone();
        org.handle = changes.handle.clone();
        org.meta = changes.meta.clone();
        if changes.logo_url.is_some() {
            org.logo_url = changes.logo_url.clone();
        }
        Ok(())
    }

    async fn insert_organization(
        &self,
        changes: &OrganizationChanges,
        _access_token: &str,
    ) -> Result<()> {
        let creator = changes
            .creator
            .clone()
            .ok_or_else(|| anyhow::anyhow!("creator is required"))?;
        let mut orgs = self.organizations.lock().unwrap();
        let id = format!("org-{}", orgs.len() + 1);
        orgs.push(Organization {
            id,
            name: changes.name.clone(),
            creator,
            description: changes.description.clone(),
            handle: changes.handle.clone(),
            logo_url: changes.logo_url.clone(),
            meta: changes.meta.clone(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAssets {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl AssetStore for FakeAssets {
    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
        _access_token: &str,
    ) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), bytes.len()));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

pub fn gate_settings() -> GateSettings {
    GateSettings {
        org_check_timeout_ms: 50,
        ..GateSettings::default()
    }
}

pub fn base_state() -> AppState {
    let server = ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        cookie_secure: false,
        session_inactivity_hours: 1,
    };
    let site = SiteSettings {
        public_url: "http://portal.test".to_string(),
    };
    AppState::new(&gate_settings(), &server, site)
}

/// Router wired to fakes, with handles kept for assertions.
pub struct TestApp {
    pub router: Router,
    pub auth: Arc<FakeAuth>,
    pub profiles: Arc<FakeProfiles>,
    pub assets: Arc<FakeAssets>,
}

impl TestApp {
    pub fn new(profiles: FakeProfiles) -> Self {
        let auth = Arc::new(FakeAuth::default());
        let profiles = Arc::new(profiles);
        let assets = Arc::new(FakeAssets::default());
        let state = base_state()
            .with_auth(auth.clone())
            .with_profiles(profiles.clone())
            .with_assets(assets.clone());

        Self {
            router: build_router(state),
            auth,
            profiles,
            assets,
        }
    }

    /// A user who already created an organization.
    pub fn onboarded() -> Self {
        Self::new(FakeProfiles::default().with_organization(TEST_USER_ID, "Group A"))
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, path: &str, form: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(form.to_string())).unwrap())
            .await
    }

    pub async fn post_multipart(&self, path: &str, form: Multipart, cookie: &str) -> Response {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(form.finish()))
            .unwrap();
        self.send(request).await
    }

    /// Sign in with the test credentials and return the session cookie.
    pub async fn sign_in(&self) -> String {
        let form = format!(
            "email={}&password={}",
            TEST_EMAIL.replace('@', "%40"),
            TEST_PASSWORD
        );
        let response = self.post_form("/login", &form, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        session_cookie(&response).expect("login should set a session cookie")
    }
}

/// `name=value` of the session cookie set by `response`, if any.
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("id="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

const BOUNDARY: &str = "org-portal-test-boundary";

/// Minimal multipart/form-data body builder.
#[derive(Default)]
pub struct Multipart {
    body: Vec<u8>,
}

impl Multipart {
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }
}
