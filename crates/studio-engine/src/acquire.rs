use std::fs;
use std::path::{Path, PathBuf};

use studio_contracts::images::{
    decode, encode, extension_for_media_type, is_image_media_type, media_type_for_path,
};
use studio_contracts::{EncodedImage, StudioError};

pub const INVALID_IMAGE_MESSAGE: &str = "Please upload a valid image file.";

/// Media type of a picked file: from its extension, otherwise sniffed from
/// the leading bytes.
pub fn declared_media_type(path: &Path, bytes: &[u8]) -> Option<String> {
    media_type_for_path(path)
        .map(str::to_string)
        .or_else(|| {
            image::guess_format(bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
}

pub fn read_image_file(path: &Path) -> Result<EncodedImage, StudioError> {
    let bytes = fs::read(path)
        .map_err(|err| StudioError::io(format!("failed reading {}: {err}", path.display())))?;
    match declared_media_type(path, &bytes) {
        Some(media_type) if is_image_media_type(&media_type) => Ok(encode(&bytes, &media_type)),
        _ => Err(StudioError::validation(INVALID_IMAGE_MESSAGE)),
    }
}

pub fn download_file_name(image: &EncodedImage, stamp_millis: i64) -> String {
    format!(
        "edited-image-{stamp_millis}.{}",
        extension_for_media_type(image.media_type())
    )
}

pub fn write_download(image: &EncodedImage, dir: &Path) -> Result<PathBuf, StudioError> {
    let (bytes, _) = decode(image)?;
    fs::create_dir_all(dir)
        .map_err(|err| StudioError::io(format!("failed creating {}: {err}", dir.display())))?;
    let path = dir.join(download_file_name(
        image,
        chrono::Utc::now().timestamp_millis(),
    ));
    fs::write(&path, bytes)
        .map_err(|err| StudioError::io(format!("failed to write {}: {err}", path.display())))?;
    Ok(path)
}
