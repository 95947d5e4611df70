//! QR render service
//!
//! Renders a QR payload into a PNG (or SVG) the student can show at the
//! scanning station. Rendering is local and deterministic: the same text and
//! size always give the same image bytes. Rendered PNGs are memoised in a
//! bounded moka cache.

use data_encoding::BASE64;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use moka::future::Cache;
use qrcodegen::{QrCode, QrCodeEcc};
use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;

use crate::config::RenderConfig;

/// Widest quiet zone, in modules, either renderer accepts
pub const MAX_QUIET_ZONE: u32 = 100;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Error types for rendering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Empty or otherwise unusable payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload does not fit in any QR version
    #[error("Payload too long for a QR code")]
    DataTooLong,

    /// Requested size cannot hold one pixel per module
    #[error("Size {size}px is too small, need at least {required}px")]
    SizeTooSmall { size: u32, required: u32 },

    /// Image encoding failed
    #[error("Image encoding failed: {0}")]
    Encode(String),

    /// A data URI could not be decoded
    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),
}

/// Encode `raw_text` as a QR symbol
fn encode_symbol(raw_text: &str) -> Result<QrCode, RenderError> {
    if raw_text.trim().is_empty() {
        return Err(RenderError::InvalidInput("empty payload".into()));
    }
    QrCode::encode_text(raw_text, QrCodeEcc::Medium).map_err(|_| RenderError::DataTooLong)
}

fn check_quiet_zone(quiet_zone: u32) -> Result<(), RenderError> {
    if quiet_zone > MAX_QUIET_ZONE {
        return Err(RenderError::InvalidInput(format!(
            "quiet zone of {} modules exceeds {}",
            quiet_zone, MAX_QUIET_ZONE
        )));
    }
    Ok(())
}

/// Rasterize a symbol into a `size` x `size` grayscale image.
///
/// Modules are drawn at an integer scale and centred; the leftover margin is light.
fn rasterize(qr: &QrCode, size: u32, quiet_zone: u32) -> Result<GrayImage, RenderError> {
    check_quiet_zone(quiet_zone)?;
    let symbol = qr.size() as u32;
    let modules = symbol + 2 * quiet_zone;
    let scale = size / modules;
    if scale == 0 {
        return Err(RenderError::SizeTooSmall {
            size,
            required: modules,
        });
    }
    let offset = (size - modules * scale) / 2 + quiet_zone * scale;
    let drawn = symbol * scale;

    Ok(GrayImage::from_fn(size, size, |x, y| {
        if x < offset || y < offset || x >= offset + drawn || y >= offset + drawn {
            return LIGHT;
        }
        let mx = ((x - offset) / scale) as i32;
        let my = ((y - offset) / scale) as i32;
        if qr.get_module(mx, my) {
            DARK
        } else {
            LIGHT
        }
    }))
}

/// Render `raw_text` to PNG bytes
pub fn render_png(raw_text: &str, size: u32, quiet_zone: u32) -> Result<Vec<u8>, RenderError> {
    let qr = encode_symbol(raw_text)?;
    let img = rasterize(&qr, size, quiet_zone)?;

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

/// Render `raw_text` to an SVG document `size` pixels wide
pub fn render_svg(raw_text: &str, size: u32, quiet_zone: u32) -> Result<String, RenderError> {
    let qr = encode_symbol(raw_text)?;
    if size == 0 {
        return Err(RenderError::SizeTooSmall { size, required: 1 });
    }
    check_quiet_zone(quiet_zone)?;
    let symbol = qr.size();
    let border = quiet_zone as i32;
    let dimension = symbol + 2 * border;

    let mut path = String::new();
    for y in 0..symbol {
        for x in 0..symbol {
            if qr.get_module(x, y) {
                let _ = write!(path, "M{},{}h1v1h-1z", x + border, y + border);
            }
        }
    }

    Ok(format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\" ",
            "width=\"{size}\" height=\"{size}\" viewBox=\"0 0 {dim} {dim}\" ",
            "shape-rendering=\"crispEdges\">",
            "<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>",
            "<path d=\"{path}\" fill=\"#000000\"/></svg>"
        ),
        size = size,
        dim = dimension,
        path = path
    ))
}

/// Decode a `data:<mime>;base64,<payload>` URI into bytes
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, RenderError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::InvalidDataUri("missing data: prefix".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| RenderError::InvalidDataUri("missing payload".into()))?;
    if !header.ends_with(";base64") {
        return Err(RenderError::InvalidDataUri("only base64 payloads are supported".into()));
    }

    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(payload.as_bytes())
        .map_err(|e| RenderError::InvalidDataUri(e.to_string()))
}

/// Memoising QR renderer
pub struct QrRenderService {
    cache: Cache<(String, u32), Arc<Vec<u8>>>,
    quiet_zone: u32,
    default_size: u32,
}

impl QrRenderService {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            cache: Cache::builder().max_capacity(config.cache_capacity).build(),
            quiet_zone: config.quiet_zone,
            default_size: config.size,
        }
    }

    pub fn default_size(&self) -> u32 {
        self.default_size
    }

    /// Render `raw_text` as a `size` x `size` PNG
    pub async fn render(&self, raw_text: &str, size: u32) -> Result<Arc<Vec<u8>>, RenderError> {
        let key = (raw_text.to_string(), size);
        if let Some(png) = self.cache.get(&key).await {
            return Ok(png);
        }

        let png = Arc::new(render_png(raw_text, size, self.quiet_zone)?);
        self.cache.insert(key, png.clone()).await;
        tracing::debug!("Rendered QR code ({} bytes, {}px)", png.len(), size);
        Ok(png)
    }

    /// Render as a `data:image/png;base64,...` URI
    pub async fn render_data_uri(&self, raw_text: &str, size: u32) -> Result<String, RenderError> {
        let png = self.render(raw_text, size).await?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(&png)))
    }

    pub fn render_svg(&self, raw_text: &str, size: u32) -> Result<String, RenderError> {
        render_svg(raw_text, size, self.quiet_zone)
    }
}

impl Default for QrRenderService {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let a = render_png("STU-42", 300, 4).unwrap();
        let b = render_png("STU-42", 300, 4).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, render_png("STU-43", 300, 4).unwrap());
    }

    #[test]
    fn test_render_produces_png_of_requested_size() {
        let png = render_png("STU-42", 256, 4).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(img.width(), 256);
        assert_eq!(img.height(), 256);
    }

    #[test]
    fn test_render_has_light_quiet_zone_and_dark_modules() {
        let png = render_png("STU-42", 300, 4).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_luma8();

        assert_eq!(img.get_pixel(0, 0), &LIGHT);
        assert!(img.pixels().any(|p| *p == DARK));
    }

    #[test]
    fn test_render_empty_is_invalid_input() {
        assert!(matches!(render_png("", 300, 4), Err(RenderError::InvalidInput(_))));
        assert!(matches!(render_png("   ", 300, 4), Err(RenderError::InvalidInput(_))));
        assert!(matches!(render_svg("", 300, 4), Err(RenderError::InvalidInput(_))));
    }

    #[test]
    fn test_render_too_small() {
        assert!(matches!(
            render_png("STU-42", 10, 4),
            Err(RenderError::SizeTooSmall { size: 10, .. })
        ));
    }

    #[test]
    fn test_oversized_quiet_zone_is_rejected() {
        for quiet_zone in [MAX_QUIET_ZONE + 1, u32::MAX / 2 + 1, u32::MAX] {
            assert!(matches!(
                render_png("STU-42", 300, quiet_zone),
                Err(RenderError::InvalidInput(_))
            ));
            assert!(matches!(
                render_svg("STU-42", 300, quiet_zone),
                Err(RenderError::InvalidInput(_))
            ));
        }

        // the widest accepted zone still renders when the image is large enough
        assert!(render_svg("STU-42", 300, MAX_QUIET_ZONE).is_ok());
        assert!(matches!(
            render_png("STU-42", 100, MAX_QUIET_ZONE),
            Err(RenderError::SizeTooSmall { size: 100, .. })
        ));
    }

    #[test]
    fn test_render_too_long() {
        let text = "X".repeat(8000);
        assert_eq!(render_png(&text, 300, 4), Err(RenderError::DataTooLong));
    }

    #[test]
    fn test_svg_contains_path() {
        let svg = render_svg("STU-42", 200, 4).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("width=\"200\""));
        assert!(svg.contains("<path d=\"M"));
    }

    #[test]
    fn test_decode_data_uri() {
        let png = render_png("STU-42", 100, 2).unwrap();
        let uri = format!("data:image/png;base64,{}", BASE64.encode(&png));
        assert_eq!(decode_data_uri(&uri).unwrap(), png);
    }

    #[test]
    fn test_decode_data_uri_errors() {
        assert!(decode_data_uri("image/png;base64,AAAA").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:text/plain,hello").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[tokio::test]
    async fn test_service_memoises_and_matches_direct_render() {
        let service = QrRenderService::default();
        let first = service.render("STU-42", 300).await.unwrap();
        let second = service.render("STU-42", 300).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, render_png("STU-42", 300, 4).unwrap());
    }

    #[tokio::test]
    async fn test_service_data_uri_roundtrips() {
        let service = QrRenderService::default();
        let uri = service.render_data_uri("STU-42", 120).await.unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        let bytes = decode_data_uri(&uri).unwrap();
        assert_eq!(bytes, *service.render("STU-42", 120).await.unwrap());
    }
}
