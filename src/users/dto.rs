use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::User;
use crate::auth::tokens::TokenPair;

/// Request body for login. Either identity field is enough.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
}

/// Request body for token refresh. The cookie wins when both transports
/// carry a token.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Request body for password change.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Request body for profile updates.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub fullname: String,
    pub username: String,
}

/// Public part of a user returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            fullname: user.fullname,
            avatar: user.avatar_url,
            cover_image: user.cover_image_url,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Login response payload: the user plus both tokens, mirroring the
/// cookies for clients that cannot hold them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthPayload {
    pub fn new(user: User, pair: &TokenPair) -> Self {
        Self {
            user: user.into(),
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
        }
    }
}

/// Refresh response payload: the fresh pair alone.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairBody {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<&TokenPair> for TokenPairBody {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            fullname: "Alice A".into(),
            password_hash: "hash".into(),
            avatar_url: "https://cdn.local/avatars/alice.png".into(),
            cover_image_url: None,
            refresh_token: Some("stored-token".into()),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn profile_carries_no_credentials() {
        let value =
            serde_json::to_value(UserProfile::from(sample_user())).expect("serialize profile");
        let object = value.as_object().expect("object");
        assert!(object.contains_key("avatar"));
        assert!(object.contains_key("coverImage"));
        assert!(object.contains_key("createdAt"));
        assert!(!object.contains_key("passwordHash"));
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("refreshToken"));
    }

    #[test]
    fn auth_payload_echoes_the_pair() {
        let pair = TokenPair {
            access_token: "a.b.c".into(),
            refresh_token: "d.e.f".into(),
        };
        let value = serde_json::to_value(AuthPayload::new(sample_user(), &pair))
            .expect("serialize payload");
        assert_eq!(value["accessToken"], "a.b.c");
        assert_eq!(value["refreshToken"], "d.e.f");
        assert_eq!(value["user"]["username"], "alice");
    }

    #[test]
    fn refresh_request_accepts_camel_case_and_empty_body() {
        let parsed: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken":"d.e.f"}"#).expect("parse body");
        assert_eq!(parsed.refresh_token.as_deref(), Some("d.e.f"));

        let parsed: RefreshRequest = serde_json::from_str("{}").expect("parse empty body");
        assert!(parsed.refresh_token.is_none());
    }
}
