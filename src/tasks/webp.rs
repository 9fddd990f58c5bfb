use camino::{Utf8Path, Utf8PathBuf};
use image::ImageReader;
use rayon::prelude::*;

use crate::graph::{Context, Task};
use crate::tasks::ImageError;

/// Writes a `.webp` sibling next to every raster image. Originals are left as
/// they are.
pub struct Webp;

impl Task for Webp {
    fn name(&self) -> &str {
        "webp"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let config = &ctx.config.webp;
        let base = ctx.config.source.join(&config.base);
        let dest = ctx.config.output.join(&config.output);

        let written = crate::io::select(&base, &config.include, &config.exclude)?
            .par_iter()
            .map(|relative| -> Result<Utf8PathBuf, ImageError> {
                let target = dest.join(relative).with_extension("webp");
                convert(&base.join(relative), &target, config.quality)?;
                Ok(target)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(written)
    }
}

/// Lossy WebP at a fixed quality. Images without an alpha channel are encoded
/// from RGB so the output carries no alpha chunk.
fn convert(source: &Utf8Path, target: &Utf8Path, quality: f32) -> Result<(), ImageError> {
    let img = ImageReader::open(source)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ImageError::Image(source.into(), e))?;

    let (rgb, rgba);
    let encoder = if img.color().has_alpha() {
        rgba = img.to_rgba8();
        webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height())
    } else {
        rgb = img.to_rgb8();
        webp::Encoder::from_rgb(&rgb, rgb.width(), rgb.height())
    };

    let data = encoder
        .encode_simple(false, quality.clamp(0.0, 100.0))
        .map_err(|e| ImageError::Encode(source.into(), format!("{e:?}")))?;

    crate::io::write(target, &*data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Config;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_sibling_per_raster() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let config = Config::default().rooted(&root);

        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 0]));
        let base = config.source.join("img");
        std::fs::create_dir_all(base.join("photos")).unwrap();
        img.save(base.join("hero.png")).unwrap();
        img.save(base.join("photos/cat.jpg")).unwrap();
        std::fs::write(base.join("logo.svg"), "<svg/>").unwrap();

        let mut written = Webp.run(&Context::new(&config)).unwrap();
        written.sort();

        let out = config.output.join("img");
        assert_eq!(written, vec![out.join("hero.webp"), out.join("photos/cat.webp")]);

        let decoded = image::open(out.join("hero.webp")).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        assert!(!out.join("hero.png").exists());
    }

    fn chunk(path: &Utf8Path) -> [u8; 4] {
        let data = std::fs::read(path).unwrap();
        assert_eq!(&data[..4], b"RIFF");
        assert_eq!(&data[8..12], b"WEBP");
        data[12..16].try_into().unwrap()
    }

    #[test]
    fn test_opaque_image_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        img.save(root.join("photo.jpg")).unwrap();

        convert(&root.join("photo.jpg"), &root.join("out/photo.webp"), 90.0).unwrap();

        assert_eq!(&chunk(&root.join("out/photo.webp")), b"VP8 ");
    }

    #[test]
    fn test_transparent_image_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let img = RgbaImage::from_fn(16, 16, |x, _| Rgba([255, 0, 0, (x * 16) as u8]));
        img.save(root.join("badge.png")).unwrap();

        convert(&root.join("badge.png"), &root.join("badge.webp"), 90.0).unwrap();

        // extended format, alpha plus a lossy VP8 bitstream
        assert_eq!(&chunk(&root.join("badge.webp")), b"VP8X");
        let decoded = image::open(root.join("badge.webp")).unwrap();
        assert!(decoded.color().has_alpha());
    }
}
