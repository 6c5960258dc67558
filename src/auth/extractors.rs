use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;

use super::{cookies::ACCESS_TOKEN_COOKIE, tokens::TokenKeys};
use crate::{error::ApiError, state::AppState, users::repo::User};

/// The authenticated principal, resolved to a live user row. Protected
/// handlers take this as an argument, so unauthenticated requests never
/// reach them.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            bearer_token(parts).ok_or_else(|| ApiError::unauthorized("unauthorized request"))?;

        let keys = TokenKeys::new(&state.config.jwt);
        let claims = keys
            .verify_access(&token)
            .map_err(|_| ApiError::unauthorized("invalid access token"))?;

        // Deleted accounts fail the gate even while their tokens are
        // cryptographically live.
        let user = match User::find_by_id(&state.db, claims.sub).await {
            Ok(found) => found.ok_or_else(|| ApiError::unauthorized("invalid access token"))?,
            Err(e) => {
                error!(error = ?e, "auth gate could not load user");
                return Err(ApiError::unauthorized("invalid access token"));
            }
        };

        Ok(CurrentUser(user))
    }
}

/// Cookie first, then the `Authorization: Bearer` header.
fn bearer_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            h.strip_prefix("Bearer ")
                .or_else(|| h.strip_prefix("bearer "))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/api/v1/users/profile");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).expect("request build").into_parts();
        parts
    }

    #[test]
    fn token_is_read_from_cookie_before_header() {
        let parts = parts_with(&[
            ("cookie", "access_token=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(bearer_token(&parts).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn token_falls_back_to_bearer_header() {
        let parts = parts_with(&[("authorization", "Bearer from-header")]);
        assert_eq!(bearer_token(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn unrelated_schemes_and_cookies_yield_nothing() {
        let parts = parts_with(&[
            ("cookie", "session=abc"),
            ("authorization", "Basic dXNlcjpwdw=="),
        ]);
        assert_eq!(bearer_token(&parts), None);
    }

    #[tokio::test]
    async fn gate_rejects_missing_credential() {
        let state = AppState::fake();
        let mut parts = parts_with(&[]);
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.to_string(), "unauthorized request");
    }

    #[tokio::test]
    async fn gate_rejects_garbage_token() {
        let state = AppState::fake();
        let mut parts = parts_with(&[("authorization", "Bearer not.a.jwt")]);
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid access token");
    }
}
