//! Progressive loading of server inline images into an already rendered frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::MailApi;
use crate::constants::{FRAME_READY_POLL_MILLIS, FRAME_READY_TIMEOUT_MILLIS};
use crate::frame::FrameMessage;
use crate::sanitize::InlineImage;

/// Data URLs already fetched during this session, keyed by source URL.
#[derive(Debug, Default, Clone)]
pub struct ImageCache {
    entries: HashMap<String, String>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    pub fn insert(&mut self, url: impl Into<String>, data_url: impl Into<String>) {
        self.entries.insert(url.into(), data_url.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `data:` URL for an image blob; `None` if the bytes are not an image.
pub fn to_data_url(bytes: &[u8], content_type: Option<&str>) -> Option<String> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"))
        .or_else(|| sniff_image(bytes).map(str::to_string))?;
    Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Wait for the frame document to become ready, checking `is_ready`
/// every 100ms for at most 5s. Returns whether it became ready.
pub async fn wait_until_ready<F: FnMut() -> bool>(mut is_ready: F) -> bool {
    let attempts = FRAME_READY_TIMEOUT_MILLIS / FRAME_READY_POLL_MILLIS;
    for _ in 0..attempts {
        if is_ready() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(FRAME_READY_POLL_MILLIS)).await;
    }
    is_ready()
}

/// Fetch every placeholder's image (cache first) and produce the
/// `UpdateInlineImage` messages that reveal them. Failures produce an
/// update without a data URL so the frame shows an error state.
pub async fn load_inline_images<A: MailApi + ?Sized>(
    api: &A,
    cache: &mut ImageCache,
    images: &[InlineImage],
) -> Vec<FrameMessage> {
    let mut updates = Vec::with_capacity(images.len());
    for image in images {
        let cached = cache.get(&image.url).map(str::to_string);
        let data_url = match cached {
            Some(hit) => Some(hit),
            None => fetch_data_url(api, &image.url).await.inspect(|data_url| {
                cache.insert(image.url.clone(), data_url.clone());
            }),
        };
        updates.push(FrameMessage::UpdateInlineImage {
            image_id: image.id.clone(),
            data_url,
        });
    }
    updates
}

async fn fetch_data_url<A: MailApi + ?Sized>(api: &A, url: &str) -> Option<String> {
    match api.fetch_image(url).await {
        Ok(blob) => {
            let data_url = to_data_url(&blob.bytes, blob.content_type.as_deref());
            if data_url.is_none() {
                debug!(url, "inline image is not an image");
            }
            data_url
        }
        Err(err) => {
            warn!(url, error = %err, "inline image fetch failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    #[test]
    fn builds_data_urls() {
        assert_eq!(
            to_data_url(b"abc", Some("image/png; charset=binary")).as_deref(),
            Some("data:image/png;base64,YWJj")
        );
        assert_eq!(
            to_data_url(&[0xFF, 0xD8, 0xFF, 0xE0], None).as_deref(),
            Some("data:image/jpeg;base64,/9j/4A==")
        );
        assert_eq!(to_data_url(b"<html>", Some("text/html")), None);
    }

    #[tokio::test]
    async fn loads_with_cache_and_errors() {
        let api = FakeApi::default();
        api.add_image("https://cdn.example/a.png", b"png!", "image/png");

        let images = vec![
            InlineImage { id: "img-0".into(), url: "https://cdn.example/a.png".into() },
            InlineImage { id: "img-1".into(), url: "https://cdn.example/missing.png".into() },
            InlineImage { id: "img-2".into(), url: "https://cdn.example/a.png".into() },
        ];
        let mut cache = ImageCache::new();
        let updates = load_inline_images(&api, &mut cache, &images).await;

        assert_eq!(updates.len(), 3);
        assert!(matches!(&updates[0], FrameMessage::UpdateInlineImage { data_url: Some(_), .. }));
        assert!(matches!(&updates[1], FrameMessage::UpdateInlineImage { data_url: None, .. }));
        assert_eq!(api.image_fetches("https://cdn.example/a.png"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_wait_is_bounded() {
        let mut calls = 0;
        assert!(wait_until_ready(|| {
            calls += 1;
            calls >= 3
        })
        .await);

        let start = tokio::time::Instant::now();
        assert!(!wait_until_ready(|| false).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
