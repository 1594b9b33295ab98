use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use studio_contracts::images::{decode, encode};
use studio_contracts::{EncodedImage, StudioError};

use crate::{enhance_instruction, EditOutcome, InferenceClient};

/// Instruction marker that makes the dry-run client answer without an image.
pub const NO_IMAGE_MARKER: &str = "[no-image]";
/// Instruction marker that makes the dry-run client fail like the service.
pub const FAIL_MARKER: &str = "[fail]";

const FALLBACK_DIMS: (u32, u32) = (64, 64);

/// Deterministic stand-in for the hosted service: answers with a solid PNG
/// the size of the input, colored from a hash of the instruction.
#[derive(Debug, Default, Clone)]
pub struct DryrunClient;

impl DryrunClient {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, image: &EncodedImage, instruction: &str) -> Result<EditOutcome, StudioError> {
        let (bytes, _) = decode(image)?;
        if instruction.contains(FAIL_MARKER) {
            return Err(StudioError::service("dryrun service failure"));
        }
        if instruction.contains(NO_IMAGE_MARKER) {
            return Ok(EditOutcome::NoImageProduced {
                note: Some("dryrun declined".to_string()),
            });
        }

        let (width, height) = image::load_from_memory(&bytes)
            .map(|decoded| (decoded.width(), decoded.height()))
            .unwrap_or(FALLBACK_DIMS);
        let (r, g, b) = color_from_instruction(&enhance_instruction(instruction));
        let mut canvas = RgbImage::new(width.max(1), height.max(1));
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| StudioError::service(format!("dryrun encode failed: {err}")))?;
        Ok(EditOutcome::Image(encode(&out.into_inner(), "image/png")))
    }
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(instruction.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};
    use studio_contracts::images::{decode, encode};
    use studio_contracts::StudioError;

    use super::DryrunClient;
    use crate::{EditOutcome, InferenceClient};

    fn png(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height)).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[test]
    fn dryrun_returns_png_with_input_dimensions() -> anyhow::Result<()> {
        let input = encode(&png(7, 5)?, "image/png");
        let EditOutcome::Image(result) = DryrunClient::new().edit(&input, "add a hat")? else {
            panic!("expected image outcome");
        };
        assert_eq!(result.media_type(), "image/png");
        let (bytes, _) = decode(&result)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
        assert_ne!(result, input);
        Ok(())
    }

    #[test]
    fn dryrun_is_deterministic_per_instruction() -> anyhow::Result<()> {
        let input = encode(b"not really a png", "image/png");
        let client = DryrunClient::new();
        let first = client.edit(&input, "add a hat")?;
        let second = client.edit(&input, "add a hat")?;
        let other = client.edit(&input, "make it blue")?;
        assert_eq!(first, second);
        assert_ne!(first, other);
        Ok(())
    }

    #[test]
    fn dryrun_markers_cover_empty_and_failed_outcomes() -> anyhow::Result<()> {
        let input = encode(b"x", "image/png");
        let client = DryrunClient::new();
        assert!(matches!(
            client.edit(&input, "nothing [no-image]")?,
            EditOutcome::NoImageProduced { .. }
        ));
        let err = client.edit(&input, "boom [fail]").unwrap_err();
        assert!(matches!(err, StudioError::InferenceService(_)));
        Ok(())
    }
}
