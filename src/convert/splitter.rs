//! Splits a dual-panel kneeboard texture into left and right pages.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::error::ConversionError;
use crate::install::output_names;
use crate::util::write_atomic;

/// Decode a DDS texture from disk.
pub fn decode_texture(path: &Path) -> Result<DynamicImage, ConversionError> {
    let file = File::open(path).map_err(|source| ConversionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    image::io::Reader::with_format(BufReader::new(file), ImageFormat::Dds)
        .decode()
        .map_err(|source| ConversionError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Crop `[0, W/2)` and `[W/2, W)` over the full height.
///
/// Odd widths truncate: the extra column ends up on the right page.
pub fn split(image: &DynamicImage) -> (DynamicImage, DynamicImage) {
    let (width, height) = image.dimensions();
    let half = width / 2;
    let left = image.crop_imm(0, 0, half, height);
    let right = image.crop_imm(half, 0, width - half, height);
    (left, right)
}

pub fn encode_png(image: &DynamicImage, name: &str) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|source| ConversionError::Encode {
            name: name.to_string(),
            source,
        })?;
    Ok(buf.into_inner())
}

/// Split `image` and write `lNN.png` / `rNN.png` into `web_root`.
///
/// Both pages are encoded before either file is touched, and each file is
/// replaced atomically.
pub fn write_pages(
    image: &DynamicImage,
    index: u8,
    web_root: &Path,
) -> Result<(), ConversionError> {
    let (left, right) = split(image);
    let (left_name, right_name) = output_names(index);
    let left_png = encode_png(&left, &left_name)?;
    let right_png = encode_png(&right, &right_name)?;

    for (name, bytes) in [(left_name, left_png), (right_name, right_png)] {
        let path = web_root.join(name);
        write_atomic(&path, &bytes).map_err(|source| ConversionError::Write { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::fixtures::{write_dds, BLUE, RED};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_split_halves_dimensions_and_pixels() {
        let mut img = RgbImage::new(8, 3);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = Rgb([u8::try_from(x).unwrap(), 0, 0]);
        }
        let (left, right) = split(&DynamicImage::ImageRgb8(img));
        assert_eq!(left.dimensions(), (4, 3));
        assert_eq!(right.dimensions(), (4, 3));
        for x in 0..4u8 {
            assert_eq!(left.to_rgb8().get_pixel(u32::from(x), 2), &Rgb([x, 0, 0]));
            assert_eq!(right.to_rgb8().get_pixel(u32::from(x), 2), &Rgb([x + 4, 0, 0]));
        }
    }

    #[test]
    fn test_split_odd_width_truncates() {
        let (left, right) = split(&DynamicImage::new_rgb8(5, 2));
        assert_eq!(left.dimensions(), (2, 2));
        assert_eq!(right.dimensions(), (3, 2));
    }

    #[test]
    fn test_decode_dxt1_texture() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("7982.dds");
        write_dds(&path, 16, 8, RED, BLUE);
        let img = decode_texture(&path).unwrap();
        assert_eq!(img.dimensions(), (16, 8));
        assert_eq!(img.to_rgb8().get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(img.to_rgb8().get_pixel(15, 7), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_decode_rejects_non_dds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("7982.dds");
        std::fs::write(&path, b"definitely not a texture").unwrap();
        assert!(matches!(
            decode_texture(&path),
            Err(ConversionError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            decode_texture(&temp.path().join("7983.dds")),
            Err(ConversionError::Read { .. })
        ));
    }

    #[test]
    fn test_write_pages() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("7991.dds");
        write_dds(&src, 16, 8, RED, BLUE);
        let img = decode_texture(&src).unwrap();

        write_pages(&img, 10, temp.path()).unwrap();

        let left = image::open(temp.path().join("l10.png")).unwrap();
        let right = image::open(temp.path().join("r10.png")).unwrap();
        assert_eq!(left.dimensions(), (8, 8));
        assert_eq!(left.to_rgb8().get_pixel(7, 0), &Rgb([255, 0, 0]));
        assert_eq!(right.to_rgb8().get_pixel(0, 0), &Rgb([0, 0, 255]));
    }
}
