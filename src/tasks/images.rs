use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageEncoder};
use jpeg_encoder::{ColorType, Encoder};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::ImagesConfig;
use crate::error::SelectError;
use crate::graph::{Context, Task};

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An I/O error occurred while reading or writing image files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image decoding or encoding.
    #[error("Image processing error in {0}: {1}")]
    Image(Utf8PathBuf, image::ImageError),

    /// The image couldn't be written in the target format.
    #[error("Couldn't encode {0}: {1}")]
    Encode(Utf8PathBuf, String),

    #[error(transparent)]
    Select(#[from] SelectError),
}

/// Recompresses raster images, passing vector images through. Used by the
/// production build.
pub struct OptimizeImages;

impl Task for OptimizeImages {
    fn name(&self) -> &str {
        "images:optimize"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = &ctx.config.images;
        let base = ctx.config.source.join(&config.base);
        let dest = ctx.config.output.join(&config.output);

        let written = crate::io::select(&base, &config.include, &config.exclude)?
            .par_iter()
            .map(|relative| -> Result<Utf8PathBuf, ImageError> {
                let target = dest.join(relative);
                optimize(&base.join(relative), &target, config)?;
                Ok(target)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(written)
    }
}

/// Copies images verbatim. Used in development, where recompressing every
/// image on startup isn't worth the wait.
pub struct CopyImages;

impl Task for CopyImages {
    fn name(&self) -> &str {
        "images:copy"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = &ctx.config.images;

        let written = crate::io::copy(
            &ctx.config.source.join(&config.base),
            &ctx.config.output.join(&config.output),
            &config.include,
            &config.exclude,
        )?;

        Ok(written)
    }
}

fn optimize(source: &Utf8Path, target: &Utf8Path, config: &ImagesConfig) -> Result<(), ImageError> {
    let data = fs::read(source)?;

    let out = match source.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg" | "jpeg") => {
            let img = decode(source, &data)?;
            encode_jpeg(&img, config.jpeg_quality).map_err(|e| ImageError::Encode(source.into(), e))?
        }
        Some("png") => {
            let img = decode(source, &data)?;
            let png = encode_png(&img, compression_for(config.png_level))
                .map_err(|e| ImageError::Image(source.into(), e))?;

            // lossless either way, keep whichever is smaller
            if png.len() < data.len() { png } else { data }
        }
        _ => data,
    };

    crate::io::write(target, out)?;
    Ok(())
}

fn decode(path: &Utf8Path, data: &[u8]) -> Result<DynamicImage, ImageError> {
    image::load_from_memory(data).map_err(|e| ImageError::Image(path.into(), e))
}

/// Maps an optimisation level (0-7) onto the encoder's compression presets.
pub(crate) fn compression_for(level: u8) -> CompressionType {
    match level {
        0..=1 => CompressionType::Fast,
        2..=4 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Encodes a progressive JPEG.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let rgb = img.to_rgb8();
    let width = u16::try_from(rgb.width()).map_err(|_| "image is too wide for JPEG")?;
    let height = u16::try_from(rgb.height()).map_err(|_| "image is too tall for JPEG")?;

    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, quality.clamp(1, 100));
    encoder.set_progressive(true);
    encoder
        .encode(&rgb, width, height, ColorType::Rgb)
        .map_err(|e| e.to_string())?;

    Ok(buffer)
}

fn encode_png(img: &DynamicImage, compression: CompressionType) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();

    PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive).write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        img.color().into(),
    )?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::{Rgb, RgbImage};

    fn gradient() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    fn setup() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_compression_levels() {
        assert!(matches!(compression_for(0), CompressionType::Fast));
        assert!(matches!(compression_for(3), CompressionType::Default));
        assert!(matches!(compression_for(5), CompressionType::Best));
        assert!(matches!(compression_for(7), CompressionType::Best));
    }

    #[test]
    fn test_png_is_never_larger() {
        let (_dir, root) = setup();
        let source = root.join("a.png");
        let target = root.join("out/a.png");
        gradient().save(&source).unwrap();

        optimize(&source, &target, &ImagesConfig::default()).unwrap();

        let before = fs::metadata(&source).unwrap().len();
        let after = fs::metadata(&target).unwrap().len();
        assert!(after <= before);

        let decoded = image::open(&target).unwrap().to_rgb8();
        assert_eq!(decoded, gradient());
    }

    #[test]
    fn test_jpeg_is_reencoded() {
        let (_dir, root) = setup();
        let source = root.join("a.jpg");
        let target = root.join("out/a.jpg");
        gradient().save(&source).unwrap();

        optimize(&source, &target, &ImagesConfig::default()).unwrap();

        let decoded = image::open(&target).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));

        // SOF2 is the start-of-frame marker of a progressive scan
        let data = fs::read(&target).unwrap();
        assert!(data.windows(2).any(|w| w == [0xFF, 0xC2]));
        assert!(!data.windows(2).any(|w| w == [0xFF, 0xC0]));
    }

    #[test]
    fn test_svg_passes_through() {
        let (_dir, root) = setup();
        let source = root.join("logo.svg");
        let target = root.join("out/logo.svg");
        fs::write(&source, "<svg/>").unwrap();

        optimize(&source, &target, &ImagesConfig::default()).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "<svg/>");
    }

    #[test]
    fn test_corrupt_raster_names_the_file() {
        let (_dir, root) = setup();
        let source = root.join("broken.png");
        fs::write(&source, b"not a png").unwrap();

        let err = optimize(&source, &root.join("out.png"), &ImagesConfig::default()).unwrap_err();

        assert!(err.to_string().contains("broken.png"));
    }
}
