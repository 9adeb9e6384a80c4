//! Thumbnail generation for image backgrounds.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// Bounding box of generated thumbnails. Aspect ratio is preserved.
pub const THUMBNAIL_WIDTH: u32 = 300;
pub const THUMBNAIL_HEIGHT: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("no encoder for extension .{0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Decode `data`, shrink it to fit the thumbnail box and re-encode it in the
/// format named by `extension`.
///
/// CPU bound; async callers run it on a blocking thread.
pub fn render_thumbnail(data: &[u8], extension: &str) -> Result<Vec<u8>, ThumbnailError> {
    let format = ImageFormat::from_extension(extension)
        .ok_or_else(|| ThumbnailError::UnsupportedFormat(extension.to_string()))?;

    let img = image::load_from_memory(data)?;
    let thumb = if img.width() > THUMBNAIL_WIDTH || img.height() > THUMBNAIL_HEIGHT {
        img.resize(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel
    let thumb = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(thumb.to_rgb8()),
        _ => thumb,
    };

    let mut out = Cursor::new(Vec::new());
    thumb.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([20, 40, 60]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_large_image_fits_box() {
        let thumb = render_thumbnail(&png_bytes(900, 300), "png").unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.width(), 300);
        assert_eq!(decoded.height(), 100);
    }

    #[test]
    fn test_small_image_kept() {
        let thumb = render_thumbnail(&png_bytes(40, 20), "png").unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
    }

    #[test]
    fn test_undecodable_input_fails() {
        assert!(render_thumbnail(b"\x89PNG not really", "png").is_err());
    }

    #[test]
    fn test_jpeg_output() {
        let thumb = render_thumbnail(&png_bytes(400, 400), "jpg").unwrap();
        assert!(thumb.starts_with(&[0xff, 0xd8]));
    }
}
