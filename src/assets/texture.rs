// CPU-side texture pixels, always 8-bit RGBA

use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::Path;

pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read texture {:?}", path))?;
        let texture =
            Self::decode(&bytes).with_context(|| format!("Failed to load texture {:?}", path))?;

        log::info!("Loaded texture {:?} ({}x{})", path, texture.width, texture.height);
        Ok(texture)
    }

    /// Decode an encoded image (PNG, JPEG) held in memory
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("Failed to decode texture")?;
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        }
    }

    /// Black and white checkerboard of `size` x `size` pixels with square cells
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let value = if (x / cell + y / cell) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[value, value, value, 255]);
            }
        }

        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Load `path`, or fall back to a checkerboard when it is missing
    pub fn load_or_checkerboard(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::warn!("Texture {:?} not found, using checkerboard", path);
            Ok(Self::checkerboard(256, 32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn rgb_images_gain_opaque_alpha() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(1, 0, Rgb([10, 20, 30]));

        let texture = TextureData::from_image(DynamicImage::ImageRgb8(rgb));
        assert_eq!((texture.width, texture.height), (2, 1));
        assert_eq!(texture.pixels, vec![0, 0, 0, 255, 10, 20, 30, 255]);
    }

    #[test]
    fn decodes_png_bytes() {
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(3, 2))
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();

        let texture = TextureData::decode(&encoded).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.pixels.len(), 3 * 2 * 4);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(TextureData::decode(b"not an image").is_err());
    }

    #[test]
    fn loads_encoded_file_from_disk() {
        let path = std::env::temp_dir().join(format!("hello-vulkan-tex-{}.png", std::process::id()));
        let mut rgb = RgbImage::new(2, 2);
        rgb.put_pixel(0, 1, Rgb([1, 2, 3]));
        rgb.save_with_format(&path, ImageFormat::Png).unwrap();

        let texture = TextureData::load_or_checkerboard(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!((texture.width, texture.height), (2, 2));
        assert_eq!(&texture.pixels[8..12], &[1, 2, 3, 255]);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_fallback() {
        let path = std::env::temp_dir().join(format!("hello-vulkan-bad-{}.png", std::process::id()));
        std::fs::write(&path, b"not an image").unwrap();

        let result = TextureData::load_or_checkerboard(&path);
        std::fs::remove_file(&path).unwrap();

        let message = format!("{:#}", result.err().unwrap());
        assert!(message.contains("Failed to load texture"), "{}", message);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let texture = TextureData::checkerboard(4, 2);
        assert_eq!(texture.pixels.len(), 4 * 4 * 4);

        let pixel = |x: usize, y: usize| texture.pixels[(y * 4 + x) * 4];
        assert_eq!(pixel(0, 0), 255);
        assert_eq!(pixel(1, 1), 255);
        assert_eq!(pixel(2, 0), 0);
        assert_eq!(pixel(0, 2), 0);
        assert_eq!(pixel(2, 2), 255);
    }

    #[test]
    fn missing_texture_falls_back_to_checkerboard() {
        let texture = TextureData::load_or_checkerboard(Path::new("no/such/texture.png")).unwrap();
        assert_eq!((texture.width, texture.height), (256, 256));
    }
}
