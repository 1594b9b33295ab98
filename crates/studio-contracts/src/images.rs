use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::StudioError;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Self-describing image: a media type plus a base64 payload.
///
/// Values are never edited in place; every edit produces a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    media_type: String,
    payload: String,
}

impl EncodedImage {
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// `data:<media_type>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!(
            "{DATA_URL_PREFIX}{}{BASE64_MARKER},{}",
            self.media_type, self.payload
        )
    }

    pub fn from_data_url(raw: &str) -> Result<Self, StudioError> {
        let parts: Vec<&str> = raw.trim().split(',').collect();
        if parts.len() != 2 {
            return Err(StudioError::malformed(
                "expected exactly one ',' between header and payload",
            ));
        }
        let header = parts[0];
        let Some(header) = header.strip_prefix(DATA_URL_PREFIX) else {
            return Err(StudioError::malformed("missing 'data:' prefix"));
        };
        let Some(media_type) = header.strip_suffix(BASE64_MARKER) else {
            return Err(StudioError::malformed("missing ';base64' marker"));
        };
        let media_type = media_type.trim();
        if media_type.is_empty() {
            return Err(StudioError::malformed("empty media type"));
        }
        Ok(Self {
            media_type: media_type.to_string(),
            payload: parts[1].to_string(),
        })
    }

    /// Builds an image from a media type and an already base64-encoded
    /// payload, as returned by the inference service. The payload is checked.
    pub fn from_base64(
        media_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Self, StudioError> {
        let image = Self {
            media_type: media_type.into().trim().to_string(),
            payload: payload.into(),
        };
        decode(&image)?;
        Ok(image)
    }

    /// Decoded payload size in bytes (approximate for unpadded input).
    pub fn byte_len(&self) -> usize {
        let trimmed = self.payload.trim_end_matches('=');
        trimmed.len() * 3 / 4
    }

    /// Short content hash for logs; images themselves never go to logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.media_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.payload.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("media_type", &self.media_type)
            .field("bytes", &self.byte_len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// The media type is stored exactly as given so that `decode` hands back the
/// same string.
pub fn encode(raw: &[u8], media_type: &str) -> EncodedImage {
    EncodedImage {
        media_type: media_type.to_string(),
        payload: BASE64.encode(raw),
    }
}

pub fn decode(image: &EncodedImage) -> Result<(Vec<u8>, String), StudioError> {
    if image.media_type.trim().is_empty() {
        return Err(StudioError::malformed("empty media type"));
    }
    let bytes = BASE64
        .decode(image.payload.trim().as_bytes())
        .map_err(|err| StudioError::malformed(format!("invalid base64 payload: {err}")))?;
    Ok((bytes, image.media_type.clone()))
}

pub fn decode_data_url(raw: &str) -> Result<(Vec<u8>, String), StudioError> {
    decode(&EncodedImage::from_data_url(raw)?)
}

pub fn is_image_media_type(media_type: &str) -> bool {
    media_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("bmp") {
        return "bmp";
    }
    "png"
}
