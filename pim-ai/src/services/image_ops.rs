//! Local image operations used by Segment and Enhance
//!
//! All functions are synchronous and CPU-bound; stage code runs them inside
//! `tokio::task::spawn_blocking`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, ImageError, ImageFormat, RgbImage, RgbaImage};
use std::path::Path;
use thiserror::Error;

use super::collaborators::{BoundingBox, SegmentationMask};

#[derive(Debug, Error)]
pub enum ImageOpError {
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Mask left no visible pixels")]
    EmptyCutout,
}

/// Frame with `mask` written into its alpha channel
///
/// The mask is scaled to the frame, or to `bbox` and placed there when the
/// box is usable; everything outside the box becomes transparent.
pub fn apply_mask(frame: &DynamicImage, mask: &GrayImage, bbox: Option<BoundingBox>) -> RgbaImage {
    let (width, height) = frame.dimensions();

    let full_mask = match bbox.and_then(|b| b.to_pixels(width, height)) {
        Some((x, y, w, h)) => {
            let scaled = imageops::resize(mask, w, h, FilterType::Lanczos3);
            let mut canvas = GrayImage::new(width, height);
            imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
            canvas
        }
        None => imageops::resize(mask, width, height, FilterType::Lanczos3),
    };

    let mut rgba = frame.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(full_mask.pixels()) {
        pixel[3] = alpha[0];
    }
    rgba
}

/// Crop to the bounding box of non-transparent pixels; `None` if there are none
pub fn trim_to_content(image: &RgbaImage) -> Option<RgbaImage> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    let (x0, y0, x1, y1) = bounds?;
    Some(imageops::crop_imm(image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image())
}

/// Composite onto an opaque white background
pub fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let alpha = u32::from(p[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

/// Store the raw mask and write the masked, trimmed cutout as PNG
pub fn cut_out(
    frame_path: &Path,
    mask: &SegmentationMask,
    mask_out: &Path,
    cutout_out: &Path,
) -> Result<(), ImageOpError> {
    std::fs::write(mask_out, &mask.encoded).map_err(ImageError::IoError)?;

    let frame = image::open(frame_path)?;
    let mask_image = image::load_from_memory(&mask.encoded)?.to_luma8();

    let masked = apply_mask(&frame, &mask_image, mask.bounding_box);
    let trimmed = trim_to_content(&masked).ok_or(ImageOpError::EmptyCutout)?;
    trimmed.save_with_format(cutout_out, ImageFormat::Png)?;
    Ok(())
}

/// Flatten an image file onto white and save it as PNG
pub fn flatten_file(src: &Path, dst: &Path) -> Result<(), ImageOpError> {
    let image = image::open(src)?.to_rgba8();
    flatten_onto_white(&image).save_with_format(dst, ImageFormat::Png)?;
    Ok(())
}

/// Decode generator output (any supported format) and store it as PNG
pub fn write_png(encoded: &[u8], dst: &Path) -> Result<(), ImageOpError> {
    image::load_from_memory(encoded)?.save_with_format(dst, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};
    use std::io::Cursor;

    fn solid_frame(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10])))
    }

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_full_frame_mask_sets_alpha() {
        let frame = solid_frame(4, 4);
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        let masked = apply_mask(&frame, &mask, None);
        assert!(masked.pixels().all(|p| p[3] > 250));
    }

    #[test]
    fn test_boxed_mask_clears_outside_box() {
        let frame = solid_frame(100, 100);
        let mask = GrayImage::from_pixel(10, 10, Luma([255]));
        let bbox = BoundingBox { y0: 200, x0: 300, y1: 600, x1: 700 };

        let masked = apply_mask(&frame, &mask, Some(bbox));
        assert_eq!(masked.get_pixel(0, 0)[3], 0);
        assert!(masked.get_pixel(50, 40)[3] > 250);

        let trimmed = trim_to_content(&masked).unwrap();
        assert_eq!(trimmed.dimensions(), (40, 40));
    }

    #[test]
    fn test_trim_fully_transparent_is_none() {
        let image = RgbaImage::from_pixel(5, 5, Rgba([1, 2, 3, 0]));
        assert!(trim_to_content(&image).is_none());
    }

    #[test]
    fn test_flatten_onto_white() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        let flat = flatten_onto_white(&image);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_cut_out_writes_mask_and_cutout() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("frame_0001.png");
        solid_frame(20, 10).save(&frame_path).unwrap();

        let mask = SegmentationMask {
            encoded: png_bytes(&DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 10, Luma([255])))),
            bounding_box: None,
        };
        let mask_out = dir.path().join("Mug_mask.png");
        let cutout_out = dir.path().join("Mug_segmented.png");

        cut_out(&frame_path, &mask, &mask_out, &cutout_out).unwrap();
        assert!(mask_out.exists());
        assert_eq!(image::open(&cutout_out).unwrap().dimensions(), (20, 10));
    }

    #[test]
    fn test_cut_out_with_empty_mask_fails() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("frame_0001.png");
        solid_frame(8, 8).save(&frame_path).unwrap();

        let mask = SegmentationMask {
            encoded: png_bytes(&DynamicImage::ImageLuma8(GrayImage::new(8, 8))),
            bounding_box: None,
        };
        let err = cut_out(
            &frame_path,
            &mask,
            &dir.path().join("m.png"),
            &dir.path().join("c.png"),
        )
        .unwrap_err();
        assert!(matches!(err, ImageOpError::EmptyCutout));
    }

    #[test]
    fn test_write_png_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_png(b"not an image", &dir.path().join("x.png")).is_err());
    }
}
