//!
//! driver_rewards HTTP API
//! ------------------------
//! Axum-based transport adapter around the session/authorization core.
//!
//! Responsibilities:
//! - Read the session cookie, resolve it once per request into a `RequestContext`
//!   and hand that to handlers as an explicit extractor argument.
//! - Clear the client's cookie whenever resolution says the credential is stale.
//! - Render guard denials and other `AppError`s as JSON with a matching status.
//! - Route table for login/logout, accounts, directory, applications, sponsor and
//!   admin endpoints.
//!
//! Guard policies are composed once in `Policies::new()` when state is built; a
//! malformed policy aborts startup instead of surfacing per request.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::FutureExt; // for catch_unwind on async blocks
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    resolve_context, session_clock_now, AuthProvider, DataStore, Identity, IdentityStore, LocalAuthProvider,
    MemoryStore, PolicyConfigError, Role, RolePolicy, SessionManager, SessionToken, StoreError, SESSION_TTL_SECS,
};
use crate::password::hash_password;

pub mod admin;
pub mod applications;
pub mod auth;
pub mod directory;
pub mod sponsor;

pub const SESSION_COOKIE: &str = "SESSION_TOKEN";
const COOKIE_PATH: &str = "/api";

/// Role policies shared by the route table.
#[derive(Debug, Clone)]
pub struct Policies {
    pub any_session: RolePolicy,
    pub admin: RolePolicy,
    pub sponsor: RolePolicy,
    pub sponsor_or_admin: RolePolicy,
    pub applicant: RolePolicy,
}

impl Policies {
    pub fn new() -> Result<Self, PolicyConfigError> {
        Ok(Self {
            any_session: RolePolicy::from_config(false, &[])?,
            admin: RolePolicy::from_config(true, &[Role::Admin])?,
            sponsor: RolePolicy::from_config(true, &[Role::Sponsor])?,
            sponsor_or_admin: RolePolicy::from_config(true, &[Role::Sponsor, Role::Admin])?,
            applicant: RolePolicy::from_config(true, &[Role::User, Role::Driver])?,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub sessions: SessionManager,
    pub auth: Arc<dyn AuthProvider>,
    pub config: Config,
    pub policies: Arc<Policies>,
}

impl AppState {
    pub fn new<S: DataStore + 'static>(store: S, config: Config) -> Result<Self, PolicyConfigError> {
        let store = Arc::new(store);
        let sessions = SessionManager::new(store.clone());
        let auth = Arc::new(LocalAuthProvider::new(store.clone(), sessions.clone()));
        Ok(Self { store, sessions, auth, config, policies: Arc::new(Policies::new()?) })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.is_internal() {
            error!(code = self.code_str(), "encountered error when handling api request: {}", self.message());
        } else {
            info!(code = self.code_str(), status = status.as_u16(), "request rejected: {}", self.message());
        }
        (status, Json(self)).into_response()
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn cookie_attrs(config: &Config) -> String {
    let mut attrs = format!("Path={}; HttpOnly; SameSite=Strict", COOKIE_PATH);
    if let Some(domain) = config.hostname() {
        attrs.push_str("; Domain=");
        attrs.push_str(domain);
    }
    if config.use_https() {
        attrs.push_str("; Secure");
    }
    attrs
}

pub fn session_cookie(config: &Config, token: &SessionToken) -> Option<HeaderValue> {
    let v = format!("{}={}; {}; Max-Age={}", SESSION_COOKIE, token, cookie_attrs(config), SESSION_TTL_SECS);
    HeaderValue::from_str(&v).ok()
}

pub fn clear_session_cookie(config: &Config) -> Option<HeaderValue> {
    let v = format!("{}=; {}; Max-Age=0", SESSION_COOKIE, cookie_attrs(config));
    HeaderValue::from_str(&v).ok()
}

/// Resolve the session cookie into a `RequestContext` extension.
async fn auth_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let raw = parse_cookie(req.headers(), SESSION_COOKIE);
    let ctx = match resolve_context(state.store.as_ref(), raw.as_deref(), session_clock_now()) {
        Ok(ctx) => ctx,
        Err(denial) => return AppError::from(denial).into_response(),
    };
    let discard = ctx.discard_credential;
    req.extensions_mut().insert(ctx);
    let mut resp = next.run(req).await;
    if discard {
        if let Some(v) = clear_session_cookie(&state.config) {
            resp.headers_mut().append(header::SET_COOKIE, v);
        }
    }
    resp
}

async fn recover_panics(req: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(cause) => {
            let msg = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown cause".to_string());
            error!("panic when handling api request; recovering: {}", msg);
            AppError::internal("panic", "internal server error").into_response()
        }
    }
}

async fn not_found() -> AppError { AppError::not_found("not_found", "No such endpoint.") }

/// Run blocking work (password hashing) off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal("join_error".to_string(), e.to_string()))?
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { "driver_rewards ok" }))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/whoami", get(auth::whoami))
        .route("/account/register", post(auth::register))
        .route("/account/password", post(auth::change_password))
        .route("/users/{id}", get(directory::get_user))
        .route("/organizations", get(directory::list_organizations))
        .route("/organizations/{id}/drivers", get(directory::organization_drivers))
        .route("/sponsor/organization", get(sponsor::get_own_organization).post(sponsor::update_own_organization))
        .route("/sponsor/drivers", get(sponsor::own_drivers))
        .route("/sponsor/applications", get(sponsor::own_applications))
        .route("/applications/submit", post(applications::submit))
        .route("/applications/mine", get(applications::mine))
        .route("/applications/id/{id}", get(applications::get_by_id))
        .route("/applications/person/{id}", get(applications::for_person))
        .route("/applications/organization/{id}", get(applications::for_organization))
        .route("/applications/approve/{id}", post(applications::decide))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}/name", post(admin::set_name))
        .route("/admin/users/{id}/email", post(admin::set_email))
        .route("/admin/users/{id}/password", post(admin::set_password))
        .route("/admin/users/{id}/activate", post(admin::activate))
        .route("/admin/users/{id}/deactivate", post(admin::deactivate))
        .route("/admin/users/{id}/role", post(admin::set_role))
        .route("/admin/users/{id}/affiliations", post(admin::add_affiliation))
        .route("/admin/organizations", post(admin::create_organization))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_context))
        .layer(middleware::from_fn(recover_panics))
        .with_state(state);
    Router::new().nest("/api", api)
}

/// Seed an administrator account when none with this email exists yet.
pub fn ensure_default_admin<S: IdentityStore + ?Sized>(store: &S, email: &str, password: &str) -> anyhow::Result<()> {
    match store.get_identity_by_email(email) {
        Ok(_) => return Ok(()),
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e).context("while looking up default admin"),
    }
    let mut admin = Identity::new(0, email, Role::Admin);
    admin.first_name = "Default".into();
    admin.last_name = "Administrator".into();
    admin.password_hash = hash_password(password)?;
    let id = store.create_identity(admin).context("while creating default admin")?;
    info!(identity_id = id, email, "seeded default admin");
    Ok(())
}

pub async fn run(config: Config, admin_seed: Option<(String, String)>) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    match admin_seed {
        Some((email, password)) => ensure_default_admin(&store, &email, &password)?,
        None => warn!("ADMIN_EMAIL/ADMIN_PASSWORD not set; starting without an administrator"),
    }
    let state = AppState::new(store, config.clone()).context("invalid route policy configuration")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting API server for tier {:?} on {}", config.tier, addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;

    fn cfg(tier: Tier) -> Config { Config { port: 8080, tier } }

    #[test]
    fn parse_cookie_finds_named_value() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("theme=dark; SESSION_TOKEN=abc; other=1"));
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("abc"));
        assert_eq!(parse_cookie(&h, "missing"), None);
    }

    #[test]
    fn parse_cookie_without_header_is_none() {
        assert_eq!(parse_cookie(&HeaderMap::new(), SESSION_COOKIE), None);
    }

    #[test]
    fn production_cookie_is_scoped_and_secure() {
        let token = SessionToken::generate().unwrap();
        let v = session_cookie(&cfg(Tier::Production), &token).unwrap();
        let s = v.to_str().unwrap();
        assert!(s.starts_with(&format!("SESSION_TOKEN={};", token)));
        assert!(s.contains("Domain=app.teamxiv.space"));
        assert!(s.contains("Secure"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Max-Age=21600"));
    }

    #[test]
    fn local_cookie_omits_domain_and_secure() {
        let v = clear_session_cookie(&cfg(Tier::Local)).unwrap();
        let s = v.to_str().unwrap();
        assert!(s.starts_with("SESSION_TOKEN=;"));
        assert!(s.contains("Max-Age=0"));
        assert!(!s.contains("Domain="));
        assert!(!s.contains("Secure"));
    }

    #[test]
    fn policies_compose() {
        let p = Policies::new().unwrap();
        assert_eq!(p.any_session, RolePolicy::Unrestricted);
        assert!(matches!(p.sponsor_or_admin, RolePolicy::Restricted(ref r) if r.len() == 2));
        assert!(matches!(p.applicant, RolePolicy::Restricted(ref r) if r.contains(&Role::Driver) && !r.contains(&Role::Sponsor)));
    }

    #[test]
    fn default_admin_is_seeded_once() {
        let store = MemoryStore::new();
        ensure_default_admin(&store, "admin@example.com", "changeme1").unwrap();
        ensure_default_admin(&store, "admin@example.com", "different1").unwrap();
        let admins = store.list_identities().unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].role, Role::Admin);
        assert!(crate::password::verify_password(&admins[0].password_hash, "changeme1"));
    }
}
