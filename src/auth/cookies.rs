use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use super::tokens::TokenPair;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

fn secured(name: &'static str, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie
}

/// Attaches both halves of a pair as httpOnly cookies. The same values
/// also travel in the response body for non-browser clients.
pub fn with_token_pair(jar: CookieJar, pair: &TokenPair) -> CookieJar {
    jar.add(secured(ACCESS_TOKEN_COOKIE, pair.access_token.clone()))
        .add(secured(REFRESH_TOKEN_COOKIE, pair.refresh_token.clone()))
}

/// Expires both token cookies. Removal must carry the same path the
/// cookies were set with or browsers keep the originals.
pub fn cleared(jar: CookieJar) -> CookieJar {
    let mut access = Cookie::new(ACCESS_TOKEN_COOKIE, "");
    access.set_path("/");
    let mut refresh = Cookie::new(REFRESH_TOKEN_COOKIE, "");
    refresh.set_path("/");
    jar.remove(access).remove(refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "header.payload.sig-a".into(),
            refresh_token: "header.payload.sig-r".into(),
        }
    }

    fn empty_jar() -> CookieJar {
        CookieJar::from_headers(&HeaderMap::new())
    }

    #[test]
    fn pair_is_set_as_secured_cookies() {
        let jar = with_token_pair(empty_jar(), &pair());

        let access = jar.get(ACCESS_TOKEN_COOKIE).expect("access cookie set");
        assert_eq!(access.value(), "header.payload.sig-a");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(access.path(), Some("/"));

        let refresh = jar.get(REFRESH_TOKEN_COOKIE).expect("refresh cookie set");
        assert_eq!(refresh.value(), "header.payload.sig-r");
        assert_eq!(refresh.http_only(), Some(true));
    }

    #[test]
    fn cleared_drops_both_cookies() {
        let jar = with_token_pair(empty_jar(), &pair());
        let jar = cleared(jar);
        assert!(jar.get(ACCESS_TOKEN_COOKIE).is_none());
        assert!(jar.get(REFRESH_TOKEN_COOKIE).is_none());
    }
}
