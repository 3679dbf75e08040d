use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use thiserror::Error;

/// Largest width or height a WebP bitstream can describe.
const WEBP_MAX_DIMENSION: u32 = 16383;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode WebP: {0}")]
    Encode(String),

    #[error("{0} is not a supported source format")]
    Unsupported(ImageKind),
}

/// Container format detected from the leading bytes of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Other,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => ImageKind::Jpeg,
            ImageFormat::Png => ImageKind::Png,
            ImageFormat::Gif => ImageKind::Gif,
            ImageFormat::Bmp => ImageKind::Bmp,
            ImageFormat::Tiff => ImageKind::Tiff,
            ImageFormat::WebP => ImageKind::Webp,
            _ => ImageKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tiff",
            ImageKind::Webp => "webp",
            ImageKind::Other => "other",
        }
    }

    /// Raster formats accepted as conversion sources.
    pub fn is_convertible(&self) -> bool {
        matches!(
            self,
            ImageKind::Jpeg | ImageKind::Png | ImageKind::Gif | ImageKind::Bmp | ImageKind::Tiff
        )
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub format: ImageKind,
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
}

/// Output of a combined inspect-and-encode pass.
#[derive(Debug, Clone)]
pub struct Transcoded {
    /// Describes the source image, not the WebP output.
    pub source: ImageInfo,
    pub data: Vec<u8>,
}

/// Codec boundary. Implementations are synchronous and CPU bound; callers
/// are expected to run them off the async executor.
pub trait ImageTranscoder: Send + Sync {
    fn inspect(&self, data: &[u8]) -> Result<ImageInfo, TranscodeError>;
    fn to_webp(&self, data: &[u8], quality: u8) -> Result<Vec<u8>, TranscodeError>;

    /// Classifies the source and encodes it, rejecting formats that are not
    /// conversion sources. The default decodes twice; codecs that can reuse
    /// the decoded image override it.
    fn transcode(&self, data: &[u8], quality: u8) -> Result<Transcoded, TranscodeError> {
        let source = self.inspect(data)?;
        if !source.format.is_convertible() {
            return Err(TranscodeError::Unsupported(source.format));
        }
        let data = self.to_webp(data, quality)?;
        Ok(Transcoded { source, data })
    }
}

/// True when the image has an alpha channel and at least one pixel is not
/// fully opaque. Decoders hand out RGBA for formats like GIF even when
/// nothing is transparent.
fn has_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    match img {
        DynamicImage::ImageLumaA8(buf) => buf.pixels().any(|p| p[1] < u8::MAX),
        DynamicImage::ImageRgba8(buf) => buf.pixels().any(|p| p[3] < u8::MAX),
        DynamicImage::ImageLumaA16(buf) => buf.pixels().any(|p| p[1] < u16::MAX),
        DynamicImage::ImageRgba16(buf) => buf.pixels().any(|p| p[3] < u16::MAX),
        other => other.to_rgba8().pixels().any(|p| p[3] < u8::MAX),
    }
}

fn describe(format: ImageFormat, img: &DynamicImage) -> ImageInfo {
    ImageInfo {
        format: ImageKind::from_format(format),
        width: img.width(),
        height: img.height(),
        has_alpha: has_transparency(img),
    }
}

/// Decodes with the `image` crate and encodes with libwebp.
///
/// Images with transparent pixels are encoded lossless so transparency
/// survives exactly; opaque images, including RGBA ones whose alpha is all
/// 255, are encoded lossy at the given quality.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpTranscoder;

impl WebpTranscoder {
    pub fn new() -> Self {
        Self
    }

    fn decode(data: &[u8]) -> Result<(ImageFormat, DynamicImage), TranscodeError> {
        let format =
            image::guess_format(data).map_err(|e| TranscodeError::Decode(e.to_string()))?;
        let img = image::load_from_memory_with_format(data, format)
            .map_err(|e| TranscodeError::Decode(e.to_string()))?;
        Ok((format, img))
    }

    fn inspect_webp(data: &[u8]) -> Result<ImageInfo, TranscodeError> {
        let decoded = webp::Decoder::new(data)
            .decode()
            .ok_or_else(|| TranscodeError::Decode("invalid WebP bitstream".to_string()))?;
        Ok(ImageInfo {
            format: ImageKind::Webp,
            width: decoded.width(),
            height: decoded.height(),
            has_alpha: decoded.is_alpha(),
        })
    }

    fn encode(img: &DynamicImage, has_alpha: bool, quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(TranscodeError::Encode("image has zero area".to_string()));
        }
        if width > WEBP_MAX_DIMENSION || height > WEBP_MAX_DIMENSION {
            return Err(TranscodeError::Encode(format!(
                "{}x{} exceeds the WebP limit of {} pixels per side",
                width, height, WEBP_MAX_DIMENSION
            )));
        }

        // 16-bit and float color types are narrowed to 8 bits; WebP has no deeper mode.
        let encoded = if has_alpha {
            let rgba = img.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), width, height)
                .encode_simple(true, 100.0)
                .map_err(|e| TranscodeError::Encode(format!("{:?}", e)))?
        } else {
            let rgb = img.to_rgb8();
            webp::Encoder::from_rgb(rgb.as_raw(), width, height)
                .encode_simple(false, f32::from(quality.min(100)))
                .map_err(|e| TranscodeError::Encode(format!("{:?}", e)))?
        };
        Ok(encoded.to_vec())
    }
}

impl ImageTranscoder for WebpTranscoder {
    fn inspect(&self, data: &[u8]) -> Result<ImageInfo, TranscodeError> {
        let format =
            image::guess_format(data).map_err(|e| TranscodeError::Decode(e.to_string()))?;
        if format == ImageFormat::WebP {
            return Self::inspect_webp(data);
        }

        let img = image::load_from_memory_with_format(data, format)
            .map_err(|e| TranscodeError::Decode(e.to_string()))?;
        Ok(describe(format, &img))
    }

    fn to_webp(&self, data: &[u8], quality: u8) -> Result<Vec<u8>, TranscodeError> {
        let (format, img) = Self::decode(data)?;
        tracing::debug!(
            "Encoding {}x{} {:?} image as WebP (quality {})",
            img.width(),
            img.height(),
            format,
            quality
        );
        Self::encode(&img, has_transparency(&img), quality)
    }

    fn transcode(&self, data: &[u8], quality: u8) -> Result<Transcoded, TranscodeError> {
        let (format, img) = Self::decode(data)?;
        let source = describe(format, &img);
        if !source.format.is_convertible() {
            return Err(TranscodeError::Unsupported(source.format));
        }
        let data = Self::encode(&img, source.has_alpha, quality)?;
        Ok(Transcoded { source, data })
    }
}
