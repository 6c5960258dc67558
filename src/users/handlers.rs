use axum::{
    extract::{multipart::Field, DefaultBodyLimit, FromRef, Multipart, Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        AuthPayload, ChangePasswordRequest, LoginRequest, RefreshRequest, TokenPairBody,
        UpdateProfileRequest, UserProfile,
    },
    media::{self, ImageSlot, ImageUpload},
    repo::{is_unique_violation, NewUser, User, UserPatch},
    views,
};
use crate::{
    auth::{
        cookies::{self, REFRESH_TOKEN_COOKIE},
        extractors::CurrentUser,
        password::{hash_password, verify_password},
        tokens::{self, TokenKeys},
    },
    error::{ApiError, ApiResponse, ApiResult},
    state::AppState,
};

// --- public routers ---

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", patch(change_password))
        .route("/profile", get(profile))
        .route("/update-profile", patch(update_profile))
        .route("/channel/:username", get(channel_profile))
        .route("/watch-history", get(watch_history))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

// --- handlers ---

/// POST /register (multipart): account fields plus a required `avatar`
/// file and an optional `cover_image` file.
#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> ApiResult<ApiResponse<UserProfile>> {
    let mut fullname = String::new();
    let mut email = String::new();
    let mut username = String::new();
    let mut password = String::new();
    let mut avatar: Option<ImageUpload> = None;
    let mut cover_image: Option<ImageUpload> = None;

    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("fullname") => fullname = read_text(field).await?,
            Some("email") => email = read_text(field).await?,
            Some("username") => username = read_text(field).await?,
            Some("password") => password = read_text(field).await?,
            Some("avatar") => avatar = Some(read_image(field).await?),
            Some("cover_image") | Some("coverImage") => {
                cover_image = Some(read_image(field).await?)
            }
            _ => {}
        }
    }

    if [&fullname, &email, &username, &password]
        .iter()
        .any(|v| v.trim().is_empty())
    {
        warn!("registration with missing fields");
        return Err(ApiError::validation("all fields are required"));
    }
    let email = email.trim().to_lowercase();
    let username = username.trim().to_lowercase();

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("invalid email"));
    }
    if password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::validation("password too short"));
    }

    if User::find_by_identity(&state.db, Some(email.as_str()), Some(username.as_str()))
        .await?
        .is_some()
    {
        warn!(email = %email, username = %username, "duplicate registration");
        return Err(ApiError::conflict(
            "user with email or username already exists",
        ));
    }

    let avatar = avatar.ok_or_else(|| ApiError::validation("avatar file is required"))?;

    // The id is fixed up front so uploaded objects land under the new
    // user's prefix.
    let user_id = Uuid::new_v4();
    let avatar_url = media::store_image(&state, user_id, ImageSlot::Avatar, avatar).await?;
    let cover_image_url = match cover_image {
        Some(image) => {
            Some(media::store_image(&state, user_id, ImageSlot::CoverImage, image).await?)
        }
        None => None,
    };

    let hash = hash_password(&password)?;
    let new = NewUser {
        id: user_id,
        username: &username,
        email: &email,
        fullname: fullname.trim(),
        password_hash: &hash,
        avatar_url: &avatar_url,
        cover_image_url: cover_image_url.as_deref(),
    };
    let user = match User::create(&state.db, &new).await {
        Ok(user) => user,
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %email, username = %username, "duplicate registration lost the race");
            return Err(ApiError::conflict(
                "user with email or username already exists",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(ApiResponse::ok(user.into(), "user registered successfully"))
}

/// POST /login: either identity field plus the password.
#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, ApiResponse<AuthPayload>)> {
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let username = payload
        .username
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if (email.is_none() && username.is_none()) || payload.password.trim().is_empty() {
        return Err(ApiError::validation("all fields are required"));
    }

    let user = User::find_by_identity(&state.db, email, username)
        .await?
        .ok_or_else(|| {
            warn!("login for unknown identity");
            ApiError::not_found("user not found")
        })?;

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with incorrect password");
        return Err(ApiError::unauthorized("password incorrect"));
    }

    let keys = TokenKeys::from_ref(&state);
    let pair = tokens::issue_pair(&state.db, &keys, user.id).await?;
    // Reload so the payload reflects the row the pair was written to.
    let user = User::find_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        cookies::with_token_pair(jar, &pair),
        ApiResponse::ok(AuthPayload::new(user, &pair), "user logged in successfully"),
    ))
}

/// POST /logout: clears the stored refresh token and both cookies.
#[instrument(skip(state, jar, user))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(user): CurrentUser,
) -> ApiResult<(CookieJar, ApiResponse<serde_json::Value>)> {
    tokens::invalidate(&state.db, user.id).await?;
    info!(user_id = %user.id, "user logged out");
    Ok((
        cookies::cleared(jar),
        ApiResponse::ok(serde_json::json!({}), "user logged out"),
    ))
}

/// POST /refresh-token: rotates the pair presented via cookie or body.
#[instrument(skip(state, jar, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> ApiResult<(CookieJar, ApiResponse<TokenPairBody>)> {
    let presented = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token));
    let presented = presented.ok_or_else(|| {
        warn!("refresh without a token");
        ApiError::unauthorized("unauthorized request")
    })?;

    let keys = TokenKeys::from_ref(&state);
    let pair = tokens::rotate(&state.db, &keys, &presented).await?;
    let body = TokenPairBody::from(&pair);
    Ok((
        cookies::with_token_pair(jar, &pair),
        ApiResponse::ok(body, "token refreshed successfully"),
    ))
}

/// PATCH /change-password: verifies the old password before re-hashing.
#[instrument(skip(state, user, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    if payload.old_password.trim().is_empty() || payload.new_password.trim().is_empty() {
        return Err(ApiError::validation("all fields are required"));
    }
    if payload.new_password.len() < 8 {
        warn!(user_id = %user.id, "new password too short");
        return Err(ApiError::validation("password too short"));
    }
    if !verify_password(&payload.old_password, &user.password_hash)? {
        warn!(user_id = %user.id, "password change with incorrect old password");
        return Err(ApiError::unauthorized("old password incorrect"));
    }

    let hash = hash_password(&payload.new_password)?;
    if !User::set_password_hash(&state.db, user.id, &hash).await? {
        return Err(ApiError::not_found("user not found"));
    }
    info!(user_id = %user.id, "password changed");
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "password changed successfully",
    ))
}

/// GET /profile: the principal's own record.
#[instrument(skip(state, user))]
pub async fn profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<UserProfile>> {
    let user = User::find_by_id(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(ApiResponse::ok(user.into(), "user fetched successfully"))
}

/// PATCH /update-profile: fullname and username.
#[instrument(skip(state, user, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> ApiResult<ApiResponse<UserProfile>> {
    let fullname = payload.fullname.trim();
    let username = payload.username.trim().to_lowercase();
    if fullname.is_empty() || username.is_empty() {
        return Err(ApiError::validation("all fields are required"));
    }

    let patch = UserPatch {
        fullname: Some(fullname),
        username: Some(username.as_str()),
    };
    let updated = match User::update_fields(&state.db, user.id, &patch).await {
        Ok(updated) => updated,
        Err(e) if is_unique_violation(&e) => {
            warn!(user_id = %user.id, username = %username, "username already taken");
            return Err(ApiError::conflict("username already taken"));
        }
        Err(e) => return Err(e.into()),
    };
    let updated = updated.ok_or_else(|| ApiError::not_found("user not found"))?;

    info!(user_id = %updated.id, "profile updated");
    Ok(ApiResponse::ok(
        updated.into(),
        "details changed successfully",
    ))
}

/// PATCH /avatar (multipart): single `avatar` file.
#[instrument(skip(state, user, mp))]
pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Multipart,
) -> ApiResult<ApiResponse<UserProfile>> {
    let image = single_image(mp, &["avatar"])
        .await?
        .ok_or_else(|| ApiError::validation("avatar file is required"))?;
    let url = media::store_image(&state, user.id, ImageSlot::Avatar, image).await?;
    let updated = User::set_avatar_url(&state.db, user.id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    info!(user_id = %updated.id, "avatar updated");
    Ok(ApiResponse::ok(updated.into(), "avatar updated successfully"))
}

/// PATCH /cover-image (multipart): single `cover_image` file.
#[instrument(skip(state, user, mp))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Multipart,
) -> ApiResult<ApiResponse<UserProfile>> {
    let image = single_image(mp, &["cover_image", "coverImage"])
        .await?
        .ok_or_else(|| ApiError::validation("cover image file is required"))?;
    let url = media::store_image(&state, user.id, ImageSlot::CoverImage, image).await?;
    let updated = User::set_cover_image_url(&state.db, user.id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    info!(user_id = %updated.id, "cover image updated");
    Ok(ApiResponse::ok(
        updated.into(),
        "cover image updated successfully",
    ))
}

/// GET /channel/:username: subscription aggregates as seen by the caller.
#[instrument(skip(state, user))]
pub async fn channel_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<views::ChannelProfile>> {
    if username.trim().is_empty() {
        return Err(ApiError::validation("username is missing"));
    }
    let channel = views::channel_profile(&state.db, username.trim(), user.id)
        .await?
        .ok_or_else(|| {
            warn!(username = %username, "channel lookup for unknown username");
            ApiError::not_found("channel does not exist")
        })?;
    Ok(ApiResponse::ok(channel, "user channel fetched successfully"))
}

/// GET /watch-history: the principal's watched videos, in watch order.
#[instrument(skip(state, user))]
pub async fn watch_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<views::WatchHistoryEntry>>> {
    let history = views::watch_history(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(ApiResponse::ok(
        history,
        "watch history fetched successfully",
    ))
}

// --- helpers ---

async fn read_text(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(|e| {
        warn!(error = %e, "unreadable multipart field");
        ApiError::validation("malformed multipart field")
    })
}

async fn read_image(field: Field<'_>) -> ApiResult<ImageUpload> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(|e| {
        warn!(error = %e, "unreadable multipart file");
        ApiError::validation("malformed multipart field")
    })?;
    Ok(ImageUpload { body, content_type })
}

/// Pulls the first file field matching one of `names` out of a multipart
/// request; remaining fields are drained and ignored.
async fn single_image(mut mp: Multipart, names: &[&str]) -> ApiResult<Option<ImageUpload>> {
    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        if name.as_deref().map_or(false, |n| names.contains(&n)) {
            return Ok(Some(read_image(field).await?));
        }
    }
    Ok(None)
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}
