use std::path::Path;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;

use crate::raster::{ImageError, ImageResult, RasterImage};

static RAW_EXTS: &[&str] = &["raf", "dng", "nef", "cr2", "arw"];
static SUPPORTED_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "raf", "dng", "nef", "cr2", "arw",
];

pub(crate) fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

pub fn is_raw_image(path: &Path) -> bool {
    has_extension(path, RAW_EXTS)
}

/// Returns `true` if the path has an extension the codec can decode.
pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_EXTS)
}

/// Decode an image, falling back to RAW development for RAW extensions.
pub fn open_image(path: &Path) -> ImageResult<DynamicImage> {
    open_image_with_fallback(path, |p| Ok(image::open(p)?), develop_raw)
}

fn open_image_with_fallback<FStd, FRaw>(
    path: &Path,
    open_standard: FStd,
    open_raw: FRaw,
) -> ImageResult<DynamicImage>
where
    FStd: Fn(&Path) -> ImageResult<DynamicImage>,
    FRaw: Fn(&Path) -> ImageResult<DynamicImage>,
{
    match open_standard(path) {
        Ok(img) => Ok(img),
        Err(_) if is_raw_image(path) => open_raw(path),
        Err(err) => Err(err),
    }
}

fn develop_raw(path: &Path) -> ImageResult<DynamicImage> {
    let raw = rawler::decode_file(path).map_err(|e| ImageError::Raw(e.to_string()))?;
    let develop = rawler::imgop::develop::RawDevelop::default();
    let intermediate = develop
        .develop_intermediate(&raw)
        .map_err(|e| ImageError::Raw(e.to_string()))?;
    intermediate
        .to_dynamic_image()
        .ok_or_else(|| ImageError::Raw("raw develop produced invalid image".to_string()))
}

/// Decode an encoded image held in memory, guessing the container format.
pub fn decode_memory(bytes: &[u8]) -> ImageResult<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Encode `image` to `path`, choosing the encoder from the extension.
pub fn save_image(image: &RasterImage, path: &Path, jpeg_quality: u8) -> ImageResult<()> {
    let img = image.as_dynamic();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => {
            let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
            let encoder = JpegEncoder::new_with_quality(writer, jpeg_quality.clamp(1, 100));
            match img {
                DynamicImage::ImageLuma8(_) => img.write_with_encoder(encoder)?,
                _ => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?,
            }
        }
        "png" => {
            let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
            let encoder =
                PngEncoder::new_with_quality(writer, CompressionType::Default, PngFilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        "webp" => {
            let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
            let encoder = WebPEncoder::new_lossless(writer);
            match img {
                DynamicImage::ImageRgba8(_) => img.write_with_encoder(encoder)?,
                _ => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?,
            }
        }
        _ => img.save(path)?,
    }
    Ok(())
}
