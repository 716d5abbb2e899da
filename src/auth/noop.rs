//! Pass-through authenticator used when authentication is disabled

use axum::http::HeaderMap;
use axum::response::Response;

use super::{AuthError, unauthorized};

/// Accepts every request with an empty identity
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuthenticator;

impl NoOpAuthenticator {
    /// Always succeeds with an empty token
    pub fn authenticate(&self, _headers: &HeaderMap) -> Result<String, AuthError> {
        Ok(String::new())
    }

    /// There is no login flow to return from
    pub fn callback(&self) -> Response {
        unauthorized(&AuthError::CallbackNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn test_noop() {
        assert_eq!(NoOpAuthenticator.authenticate(&HeaderMap::new()).unwrap(), "");
        assert_eq!(NoOpAuthenticator.callback().status(), StatusCode::UNAUTHORIZED);
    }
}
