use anyhow::Context;
use bytes::Bytes;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// A single image pulled out of a multipart request.
pub struct ImageUpload {
    pub body: Bytes,
    pub content_type: String,
}

/// The profile slots an image can land in; each gets its own key prefix.
#[derive(Debug, Clone, Copy)]
pub enum ImageSlot {
    Avatar,
    CoverImage,
}

impl ImageSlot {
    fn prefix(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatars",
            ImageSlot::CoverImage => "covers",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "cover image",
        }
    }
}

/// Uploads one profile image and returns its public URL. The URL must be
/// non-empty before anything gets persisted; transport failures propagate
/// as internal errors.
pub async fn store_image(
    st: &AppState,
    user_id: Uuid,
    slot: ImageSlot,
    image: ImageUpload,
) -> Result<String, ApiError> {
    let ext = ext_from_mime(&image.content_type).unwrap_or("bin");
    let key = format!("{}/{}/{}.{}", slot.prefix(), user_id, Uuid::new_v4(), ext);
    let uploaded = st
        .media
        .upload(&key, image.body, &image.content_type)
        .await
        .with_context(|| format!("upload {}", key))?;
    if uploaded.url.trim().is_empty() {
        return Err(ApiError::validation(format!(
            "error while uploading {}",
            slot.label()
        )));
    }
    Ok(uploaded.url)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn avatar_lands_under_its_own_prefix() {
        let state = AppState::fake();
        let user_id = Uuid::new_v4();
        let url = store_image(
            &state,
            user_id,
            ImageSlot::Avatar,
            ImageUpload {
                body: Bytes::from_static(b"png bytes"),
                content_type: "image/png".into(),
            },
        )
        .await
        .expect("upload avatar");
        assert!(url.contains(&format!("avatars/{}/", user_id)));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn unknown_mime_falls_back_to_bin() {
        let state = AppState::fake();
        let url = store_image(
            &state,
            Uuid::new_v4(),
            ImageSlot::CoverImage,
            ImageUpload {
                body: Bytes::from_static(b"who knows"),
                content_type: "application/octet-stream".into(),
            },
        )
        .await
        .expect("upload cover");
        assert!(url.contains("covers/"));
        assert!(url.ends_with(".bin"));
    }
}
