use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Public projection of a channel: identity fields plus the subscription
/// aggregates, as seen by one viewer. Never carries credentials.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub fullname: String,
    pub username: String,
    pub subscribers_count: i64,
    pub channels_subscribed_to_count: i64,
    pub is_subscribed: bool,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub email: String,
}

/// Computes the channel profile in one statement so both counts and the
/// viewer's subscription flag come from the same snapshot.
pub async fn channel_profile(
    db: &PgPool,
    username: &str,
    viewer: Uuid,
) -> anyhow::Result<Option<ChannelProfile>> {
    let profile = sqlx::query_as::<_, ChannelProfile>(
        r#"
        SELECT u.fullname,
               u.username,
               (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id)
                   AS subscribers_count,
               (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id)
                   AS channels_subscribed_to_count,
               EXISTS (
                   SELECT 1 FROM subscriptions s
                   WHERE s.channel_id = u.id AND s.subscriber_id = $2
               ) AS is_subscribed,
               u.avatar_url AS avatar,
               u.cover_image_url AS cover_image,
               u.email
        FROM users u
        WHERE u.username = LOWER($1)
        "#,
    )
    .bind(username)
    .bind(viewer)
    .fetch_optional(db)
    .await?;
    Ok(profile)
}

/// Owner summary attached to each watch-history entry. The schema makes
/// the owner singular (`videos.owner_id` is a required reference), so
/// this is a plain struct rather than a list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOwner {
    pub username: String,
    pub fullname: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryEntry {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration_secs: i64,
    pub views: i64,
    pub owner: VideoOwner,
}

/// One row of the history join. Anchored on `users`, so a user with an
/// empty history still yields a single row of NULL join columns.
#[derive(Debug, FromRow)]
struct WatchHistoryRow {
    video_id: Option<Uuid>,
    title: Option<String>,
    description: Option<String>,
    video_url: Option<String>,
    thumbnail_url: Option<String>,
    duration_secs: Option<i64>,
    views: Option<i64>,
    owner_username: Option<String>,
    owner_fullname: Option<String>,
    owner_avatar: Option<String>,
}

impl WatchHistoryRow {
    fn into_entry(self) -> Option<WatchHistoryEntry> {
        Some(WatchHistoryEntry {
            id: self.video_id?,
            title: self.title?,
            description: self.description?,
            video_url: self.video_url?,
            thumbnail_url: self.thumbnail_url?,
            duration_secs: self.duration_secs?,
            views: self.views?,
            owner: VideoOwner {
                username: self.owner_username?,
                fullname: self.owner_fullname?,
                avatar: self.owner_avatar?,
            },
        })
    }
}

/// Resolves the user's watch history in one statement, in stored order.
/// Returns `None` when the user row itself is gone, `Some(vec![])` for a
/// user who has watched nothing.
pub async fn watch_history(
    db: &PgPool,
    user_id: Uuid,
) -> anyhow::Result<Option<Vec<WatchHistoryEntry>>> {
    let rows = sqlx::query_as::<_, WatchHistoryRow>(
        r#"
        SELECT v.id AS video_id,
               v.title,
               v.description,
               v.video_url,
               v.thumbnail_url,
               v.duration_secs,
               v.views,
               o.username AS owner_username,
               o.fullname AS owner_fullname,
               o.avatar_url AS owner_avatar
        FROM users u
        LEFT JOIN watch_history h ON h.user_id = u.id
        LEFT JOIN videos v ON v.id = h.video_id
        LEFT JOIN users o ON o.id = v.owner_id
        WHERE u.id = $1
        ORDER BY h.position
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        rows.into_iter()
            .filter_map(WatchHistoryRow::into_entry)
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_row() -> WatchHistoryRow {
        WatchHistoryRow {
            video_id: Some(Uuid::new_v4()),
            title: Some("intro to sourdough".into()),
            description: Some("starters and hydration".into()),
            video_url: Some("https://cdn.local/videos/v1.mp4".into()),
            thumbnail_url: Some("https://cdn.local/thumbs/v1.jpg".into()),
            duration_secs: Some(912),
            views: Some(4810),
            owner_username: Some("bob".into()),
            owner_fullname: Some("Bob B".into()),
            owner_avatar: Some("https://cdn.local/avatars/bob.png".into()),
        }
    }

    fn empty_history_row() -> WatchHistoryRow {
        WatchHistoryRow {
            video_id: None,
            title: None,
            description: None,
            video_url: None,
            thumbnail_url: None,
            duration_secs: None,
            views: None,
            owner_username: None,
            owner_fullname: None,
            owner_avatar: None,
        }
    }

    #[test]
    fn full_row_maps_to_entry_with_singular_owner() {
        let entry = full_row().into_entry().expect("entry");
        assert_eq!(entry.title, "intro to sourdough");
        assert_eq!(entry.owner.username, "bob");

        let owner = serde_json::to_value(&entry.owner).expect("serialize owner");
        let keys: Vec<&String> = owner.as_object().expect("object").keys().collect();
        assert_eq!(keys, ["avatar", "fullname", "username"]);
    }

    #[test]
    fn empty_history_marker_row_is_dropped() {
        assert!(empty_history_row().into_entry().is_none());
    }

    #[test]
    fn history_entry_serializes_camel_case() {
        let value = serde_json::to_value(full_row().into_entry().expect("entry"))
            .expect("serialize entry");
        let object = value.as_object().expect("object");
        assert!(object.contains_key("videoUrl"));
        assert!(object.contains_key("thumbnailUrl"));
        assert!(object.contains_key("durationSecs"));
        assert!(!object.contains_key("video_url"));
    }

    #[test]
    fn channel_profile_exposes_only_public_fields() {
        let profile = ChannelProfile {
            fullname: "Alice A".into(),
            username: "alice".into(),
            subscribers_count: 2,
            channels_subscribed_to_count: 5,
            is_subscribed: true,
            avatar: "https://cdn.local/avatars/alice.png".into(),
            cover_image: None,
            email: "a@x.com".into(),
        };
        let value = serde_json::to_value(&profile).expect("serialize profile");
        let object = value.as_object().expect("object");
        let mut keys: Vec<&String> = object.keys().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "avatar",
                "channelsSubscribedToCount",
                "coverImage",
                "email",
                "fullname",
                "isSubscribed",
                "subscribersCount",
                "username",
            ]
        );
    }
}
