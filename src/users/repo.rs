use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database. `username` and `email` are stored
/// lowercased; the writers below normalize on the way in.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>, // single live refresh token, not exposed in JSON
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields required to create an account. Values arrive validated and the
/// password already hashed. The id is generated by the caller so media
/// keys can be scoped to it before the row exists.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub email: &'a str,
    pub fullname: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: Option<&'a str>,
}

/// Partial profile update. Absent fields keep their stored value.
#[derive(Debug, Default)]
pub struct UserPatch<'a> {
    pub fullname: Option<&'a str>,
    pub username: Option<&'a str>,
}

impl User {
    /// Find a user by email or username, whichever is supplied.
    pub async fn find_by_identity(
        db: &PgPool,
        email: Option<&str>,
        username: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let email = email.map(str::to_lowercase);
        let username = username.map(str::to_lowercase);
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash,
                   avatar_url, cover_image_url, refresh_token,
                   created_at, updated_at
            FROM users
            WHERE ($1::text IS NOT NULL AND email = $1)
               OR ($2::text IS NOT NULL AND username = $2)
            "#,
        )
        .bind(email)
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by id.
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, fullname, password_hash,
                   avatar_url, cover_image_url, refresh_token,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user. A duplicate username or email surfaces as a
    /// unique-constraint error; see [`is_unique_violation`].
    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, fullname, password_hash, avatar_url, cover_image_url)
            VALUES ($1, LOWER($2), LOWER($3), $4, $5, $6, $7)
            RETURNING id, username, email, fullname, password_hash,
                      avatar_url, cover_image_url, refresh_token,
                      created_at, updated_at
            "#,
        )
        .bind(new.id)
        .bind(new.username)
        .bind(new.email)
        .bind(new.fullname)
        .bind(new.password_hash)
        .bind(new.avatar_url)
        .bind(new.cover_image_url)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Apply a profile patch. Touches only the patched columns, so it
    /// cannot fail on fields it does not carry. Returns the updated row,
    /// or `None` if the user no longer exists.
    pub async fn update_fields(
        db: &PgPool,
        id: Uuid,
        patch: &UserPatch<'_>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET fullname = COALESCE($2, fullname),
                username = COALESCE(LOWER($3), username),
                updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, fullname, password_hash,
                      avatar_url, cover_image_url, refresh_token,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.fullname)
        .bind(patch.username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Replace the stored password hash.
    pub async fn set_password_hash(db: &PgPool, id: Uuid, hash: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hash)
        .execute(db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Replace the stored avatar URL.
    pub async fn set_avatar_url(db: &PgPool, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET avatar_url = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, fullname, password_hash,
                      avatar_url, cover_image_url, refresh_token,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(url)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Replace the stored cover-image URL.
    pub async fn set_cover_image_url(
        db: &PgPool,
        id: Uuid,
        url: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET cover_image_url = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, fullname, password_hash,
                      avatar_url, cover_image_url, refresh_token,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(url)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Overwrite the stored refresh token unconditionally (login).
    pub async fn store_refresh_token(db: &PgPool, id: Uuid, token: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Replace the stored refresh token only while it still equals
    /// `expected`. Of two rotations racing with the same stale token,
    /// exactly one sees a row affected.
    pub async fn swap_refresh_token(
        db: &PgPool,
        id: Uuid,
        expected: &str,
        new: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET refresh_token = $3, updated_at = now()
            WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop the stored refresh token (logout). A no-op for users with
    /// nothing stored.
    pub async fn clear_refresh_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET refresh_token = NULL, updated_at = now() WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }
}

/// True when the error chain bottoms out in a Postgres unique-constraint
/// violation (duplicate username or email).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| match e {
            sqlx::Error::Database(db) => db.code(),
            _ => None,
        })
        .map_or(false, |code| code == "23505")
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
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$abc$def".into(),
            avatar_url: "https://cdn.local/avatars/alice.png".into(),
            cover_image_url: Some("https://cdn.local/covers/alice.png".into()),
            refresh_token: Some("header.payload.sig".into()),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn secrets_never_serialize() {
        let value = serde_json::to_value(sample_user()).expect("serialize user");
        let object = value.as_object().expect("json object");
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("refresh_token"));
        assert_eq!(object["username"], "alice");
        assert_eq!(object["email"], "a@x.com");
    }

    #[test]
    fn unique_violation_detection_ignores_other_errors() {
        assert!(!is_unique_violation(&anyhow::anyhow!("plain error")));
        assert!(!is_unique_violation(&anyhow::Error::from(
            sqlx::Error::RowNotFound
        )));
    }
}
