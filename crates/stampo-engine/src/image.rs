//! Image substitution: decodes base64 image descriptors bound to `%`-prefixed
//! tags and embeds them as inline drawings.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;

use crate::error::TemplateIssue;
use crate::module::{ModuleContext, Replacement, RenderModule};

/// EMUs per pixel at the 96 dpi Word assumes for raster images.
const EMU_PER_PIXEL: u64 = 9525;

#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Width applied when the descriptor omits one, in pixels.
    pub default_width_px: u64,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            default_width_px: 550,
        }
    }
}

/// Handles tags of the form `%name`, bound to `{ data: <base64>, width?: n }`.
///
/// Height is never taken from the descriptor: it is always derived from the
/// image's intrinsic aspect ratio so scaling from width preserves proportions.
pub struct ImageModule {
    options: ImageOptions,
}

impl ImageModule {
    pub fn new(options: ImageOptions) -> Self {
        Self { options }
    }
}

impl RenderModule for ImageModule {
    fn name(&self) -> &'static str {
        "image"
    }

    fn claims(&self, tag: &str) -> bool {
        tag.starts_with('%')
    }

    fn data_key<'t>(&self, tag: &'t str) -> &'t str {
        tag[1..].trim()
    }

    fn resolve(
        &self,
        tag: &str,
        value: Option<&Value>,
        ctx: &mut ModuleContext<'_>,
    ) -> Result<Replacement, TemplateIssue> {
        let key = self.data_key(tag);
        let issue = |explanation: String| {
            TemplateIssue::new(ctx.part_name, Some(key.to_string()), explanation)
        };

        // Unbound image placeholder follows the miss policy: substitute nothing.
        let Some(value) = value else {
            return Ok(Replacement::Text(String::new()));
        };
        if value.is_null() {
            return Ok(Replacement::Text(String::new()));
        }

        let descriptor = value.as_object().ok_or_else(|| {
            issue(format!(
                "image placeholder `{key}` expects an object with a base64 `data` field"
            ))
        })?;
        let data = descriptor
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                issue(format!(
                    "image placeholder `{key}` is missing a string `data` field"
                ))
            })?;

        // A bad payload is an error for this placeholder, never a silently
        // dropped image.
        let bytes = STANDARD.decode(data.trim()).map_err(|err| {
            issue(format!(
                "image placeholder `{key}` carries invalid base64 data: {err}"
            ))
        })?;

        let width_px = match descriptor.get("width") {
            None | Some(Value::Null) => self.options.default_width_px,
            Some(width) => width.as_u64().filter(|px| *px > 0).ok_or_else(|| {
                issue(format!(
                    "image placeholder `{key}` has a `width` that is not a positive integer"
                ))
            })?,
        };

        let intrinsic = imagesize::blob_size(&bytes).map_err(|err| {
            issue(format!(
                "image placeholder `{key}` carries an unreadable image: {err}"
            ))
        })?;
        let height_px = ((width_px as f64) * (intrinsic.height as f64)
            / (intrinsic.width as f64))
            .round()
            .max(1.0) as u64;

        let extension = sniff_extension(&bytes).ok_or_else(|| {
            issue(format!(
                "image placeholder `{key}` carries an unrecognized image format"
            ))
        })?;

        let rel_id = ctx.embed_image(bytes, extension);
        let drawing_id = ctx.next_drawing_id();
        Ok(Replacement::RunXml(drawing_run(
            &rel_id,
            drawing_id,
            width_px * EMU_PER_PIXEL,
            height_px * EMU_PER_PIXEL,
        )))
    }
}

fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

fn drawing_run(rel_id: &str, drawing_id: usize, cx: u64, cy: u64) -> String {
    format!(
        "<w:r><w:drawing>\
<wp:inline xmlns:wp=\"http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing\" distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\">\
<wp:extent cx=\"{cx}\" cy=\"{cy}\"/>\
<wp:docPr id=\"{drawing_id}\" name=\"stampo image {drawing_id}\"/>\
<a:graphic xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\">\
<a:graphicData uri=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">\
<pic:pic xmlns:pic=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">\
<pic:nvPicPr><pic:cNvPr id=\"{drawing_id}\" name=\"stampo image {drawing_id}\"/><pic:cNvPicPr/></pic:nvPicPr>\
<pic:blipFill><a:blip xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" r:embed=\"{rel_id}\"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>\
<pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>\
<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>\
</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_raster_formats() {
        assert_eq!(sniff_extension(&[0x89, b'P', b'N', b'G', 0x0D]), Some("png"));
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpeg"));
        assert_eq!(sniff_extension(b"GIF89a"), Some("gif"));
        assert_eq!(sniff_extension(b"plain text"), None);
    }

    #[test]
    fn claims_only_percent_prefixed_tags() {
        let module = ImageModule::new(ImageOptions::default());
        assert!(module.claims("%logo"));
        assert!(!module.claims("logo"));
        assert_eq!(module.data_key("%logo"), "logo");
    }
}
