//! HTTP router, authentication middleware and login/callback handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, warn};

use crate::auth::{AuthError, AuthenticatedIdentity, Authenticator, CallbackParams};
use crate::registry::{CONTENT_VERSION, Repository, handlers};

/// Shared application state
pub struct AppState {
    /// Configured authentication strategy
    pub authenticator: Authenticator,
    /// Package storage
    pub repository: Arc<dyn Repository>,
    /// External base URL, without trailing slash
    pub base_url: String,
    /// Whether the server terminates TLS itself
    pub tls: bool,
}

impl AppState {
    /// Whether cookies for this request should be `Secure`
    fn secure_request(&self, headers: &HeaderMap) -> bool {
        self.tls
            || headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("https"))
    }
}

/// Router limits
#[derive(Debug, Clone, Copy)]
pub struct RouterLimits {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 100 * 1024 * 1024,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>, limits: RouterLimits) -> Router {
    let protected = Router::new()
        .route("/{scope}/{name}", get(handlers::list_releases))
        .route(
            "/{scope}/{name}/{version}",
            get(handlers::get_release).put(handlers::publish_release),
        )
        .route(
            "/{scope}/{name}/{version}/Package.swift",
            get(handlers::get_manifest),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", get(login_handler).post(login_submit_handler))
        .route("/callback", get(callback_handler))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    limits.request_timeout,
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("content-version"),
                    HeaderValue::from_static(CONTENT_VERSION),
                ))
                .layer(DefaultBodyLimit::max(limits.max_body_size)),
        )
        .with_state(state)
}

/// Authenticate every protected request.
///
/// On success the identity is stored in the request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let result = state.authenticator.authenticate(request.headers()).await;
    match result {
        Ok(token) => {
            debug!(path = %request.uri().path(), "Authenticated request");
            request
                .extensions_mut()
                .insert(AuthenticatedIdentity { token });
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "Authentication failed");
            authentication_failed(&e)
        }
    }
}

fn authentication_failed(err: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        format!("Authentication failed: {err}"),
    )
        .into_response()
}

/// `GET /login`
async fn login_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match &state.authenticator {
        Authenticator::OidcCode(a) => a.login(&headers, state.secure_request(&headers)),
        Authenticator::OidcPassword(a) => a.login(&headers),
        Authenticator::NoOp(_) | Authenticator::Basic(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `POST /login`: authenticate and return the token
async fn login_submit_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match state.authenticator.authenticate(&headers).await {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => {
            debug!(error = %e, "Login rejected");
            authentication_failed(&e)
        }
    }
}

/// `GET /callback`
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    match &state.authenticator {
        Authenticator::OidcCode(a) => a.callback(&jar, params).await,
        Authenticator::OidcPassword(a) => a.callback(),
        Authenticator::NoOp(a) => a.callback(),
        Authenticator::Basic(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /health`
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "auth": state.authenticator.kind(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoOpAuthenticator;
    use crate::registry::FsRepository;

    fn state(tls: bool) -> AppState {
        AppState {
            authenticator: Authenticator::NoOp(NoOpAuthenticator),
            repository: Arc::new(FsRepository::new("/nonexistent")),
            base_url: "http://localhost:8080".to_string(),
            tls,
        }
    }

    #[test]
    fn test_secure_request() {
        let mut headers = HeaderMap::new();
        assert!(!state(false).secure_request(&headers));
        assert!(state(true).secure_request(&headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS"));
        assert!(state(false).secure_request(&headers));
    }

    #[test]
    fn test_authentication_failed_message() {
        let response = authentication_failed(&AuthError::HeaderNotFound);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
