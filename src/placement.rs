use crate::barcode::{collect_barcode_groups, draw_barcodes};
use crate::canvas::Canvas;
use crate::debug::DebugLogger;
use crate::error::RenderError;
use crate::geometry::Matrix;
use crate::glyphs::FontStore;
use crate::svg::{compile_svg, find_svg_root, parse_number, parse_viewbox, render_compiled};
use crate::text::render_text_elements;
use crate::types::{Color, Pt, Rect};
use serde_json::json;
use std::ops::Range;

/// Maps markup user space onto a placement box: uniform "meet" scale,
/// centered, viewBox origin at the content's top-left.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContentFrame {
    pub matrix: Matrix,
    pub scale: f32,
    pub bounds: Rect,
}

impl ContentFrame {
    /// `content` is `(min_x, min_y, width, height)` in user units.
    pub(crate) fn fit(bounds: Rect, content: (f32, f32, f32, f32)) -> Result<Self, RenderError> {
        if !bounds.is_drawable() {
            return Err(RenderError::EmptyBox);
        }
        let (min_x, min_y, cw, ch) = content;
        if !(cw > 0.0 && ch > 0.0 && cw.is_finite() && ch.is_finite()) {
            return Err(RenderError::NonFinite("content size"));
        }
        let scale = (bounds.width / cw).min(bounds.height / ch);
        let tx = bounds.x + (bounds.width - cw * scale) / 2.0 - min_x * scale;
        let ty = bounds.y + (bounds.height - ch * scale) / 2.0 - min_y * scale;
        let matrix = Matrix::new(scale, 0.0, 0.0, scale, tx, ty);
        if !scale.is_finite() || scale <= 0.0 || !matrix.is_finite() {
            return Err(RenderError::NonFinite("content scale"));
        }
        Ok(Self {
            matrix,
            scale,
            bounds,
        })
    }
}

/// The fallback level that produced a placement's drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Background, barcodes and text from the embedded markup.
    Full,
    /// Synthesized outline with a diagnostic label.
    Placeholder,
    /// Bare outline rectangle.
    Outline,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Full => "full",
            Tier::Placeholder => "placeholder",
            Tier::Outline => "outline",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Rendered(Tier),
    Skipped(String),
}

/// A validated placement in page points.
#[derive(Debug, Clone)]
pub(crate) struct PlacementJob<'a> {
    pub id: Option<&'a str>,
    pub bounds: Rect,
    pub markup: Option<&'a str>,
    pub source_size: Option<(f32, f32)>,
}

pub(crate) struct PlacementRenderer<'a> {
    pub fonts: &'a FontStore,
    pub debug: Option<&'a DebugLogger>,
    pub outline_stroke_width: f32,
}

impl PlacementRenderer<'_> {
    /// Runs the fallback chain. A failed tier leaves nothing on the canvas.
    pub(crate) fn render(&self, job: &PlacementJob<'_>, canvas: &mut Canvas) -> PlacementOutcome {
        let label = job.id.unwrap_or("-");
        if !job.bounds.is_drawable() {
            let reason = format!("invalid geometry {:?}", job.bounds);
            log::warn!("placement {label}: {reason}; skipped");
            return PlacementOutcome::Skipped(reason);
        }

        let markup = job.markup.map(str::trim).filter(|m| !m.is_empty());
        let mut tier = Tier::Outline;

        if let Some(markup) = markup {
            let mark = canvas.mark();
            match self.render_full(markup, job, canvas) {
                Ok(()) => tier = Tier::Full,
                Err(err) => {
                    canvas.rollback(mark);
                    log::warn!("placement {label}: {err}; drawing placeholder");
                    self.log_fallback(job, Tier::Placeholder, &err.to_string());
                    let mark = canvas.mark();
                    match self.render_placeholder(job, canvas) {
                        Ok(()) => tier = Tier::Placeholder,
                        Err(err) => {
                            canvas.rollback(mark);
                            log::warn!("placement {label}: placeholder failed: {err}");
                            self.log_fallback(job, Tier::Outline, &err.to_string());
                        }
                    }
                }
            }
        }

        if tier == Tier::Outline {
            self.render_outline(job.bounds, canvas);
        }
        log::debug!("placement {label}: rendered at tier {}", tier.as_str());
        PlacementOutcome::Rendered(tier)
    }

    fn render_full(
        &self,
        markup: &str,
        job: &PlacementJob<'_>,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let doc = roxmltree::Document::parse(markup)?;
        let root = find_svg_root(&doc).ok_or(RenderError::MissingRoot)?;
        let frame = ContentFrame::fit(job.bounds, content_box(root, job.source_size, job.bounds))?;

        let stripped = collect_barcode_groups(root);
        let mut ranges = root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "text")
            .map(|n| n.range())
            .chain(stripped.iter().map(|n| n.range()))
            .collect::<Vec<_>>();
        let background = remove_ranges(markup, &mut ranges);
        let paths = compile_svg(&background, frame.matrix)?;

        let barcodes = collect_barcode_groups(root);
        if barcodes != stripped {
            log::warn!(
                "barcode classification disagreed ({} vs {} groups)",
                stripped.len(),
                barcodes.len()
            );
        }

        canvas.save_state();
        render_compiled(&paths, canvas);
        canvas.restore_state();
        let quads = draw_barcodes(&barcodes, &frame, canvas);
        let texts = render_text_elements(root, &frame, self.fonts, canvas, self.debug);

        if let Some(logger) = self.debug {
            logger.increment("barcode.bars", quads as u64);
            logger.event(
                "placement.full",
                json!({
                    "id": job.id,
                    "paths": paths.len(),
                    "barcode_groups": barcodes.len(),
                    "bars": quads,
                    "texts": texts,
                    "scale": frame.scale,
                }),
            );
        }
        Ok(())
    }

    fn render_placeholder(
        &self,
        job: &PlacementJob<'_>,
        canvas: &mut Canvas,
    ) -> Result<(), RenderError> {
        let b = job.bounds;
        if b.width <= 0.0 || b.height <= 0.0 {
            return Err(RenderError::EmptyBox);
        }
        let markup = placeholder_markup(b.width, b.height, job.id.unwrap_or("Render error"));
        let doc = roxmltree::Document::parse(&markup)?;
        let root = find_svg_root(&doc).ok_or(RenderError::MissingRoot)?;
        let frame = ContentFrame::fit(b, (0.0, 0.0, b.width, b.height))?;
        let paths = compile_svg(&markup, frame.matrix)?;

        canvas.save_state();
        render_compiled(&paths, canvas);
        canvas.restore_state();
        render_text_elements(root, &frame, self.fonts, canvas, self.debug);
        Ok(())
    }

    fn render_outline(&self, b: Rect, canvas: &mut Canvas) {
        canvas.save_state();
        canvas.set_stroke_color(Color::BLACK);
        canvas.set_line_width(Pt::from_f32(self.outline_stroke_width));
        canvas.stroke_rect(
            Pt::from_f32(b.x),
            Pt::from_f32(b.y),
            Pt::from_f32(b.width),
            Pt::from_f32(b.height),
        );
        canvas.restore_state();
    }

    fn log_fallback(&self, job: &PlacementJob<'_>, next: Tier, reason: &str) {
        if let Some(logger) = self.debug {
            logger.event(
                "placement.fallback",
                json!({"id": job.id, "next": next.as_str(), "reason": reason}),
            );
        }
    }
}

/// Content rectangle of the markup: explicit source size, else the viewBox,
/// else the root's width/height, else the box itself.
fn content_box(
    root: roxmltree::Node<'_, '_>,
    source_size: Option<(f32, f32)>,
    bounds: Rect,
) -> (f32, f32, f32, f32) {
    let view_box = parse_viewbox(root.attribute("viewBox"));
    let (min_x, min_y) = view_box.map(|(x, y, _, _)| (x, y)).unwrap_or((0.0, 0.0));

    if let Some((w, h)) = source_size.filter(|(w, h)| *w > 0.0 && *h > 0.0) {
        return (min_x, min_y, w, h);
    }
    if let Some(vb) = view_box {
        return vb;
    }
    let attr = |name: &str| {
        root.attribute(name)
            .and_then(parse_number)
            .filter(|v| *v > 0.0)
    };
    if let (Some(w), Some(h)) = (attr("width"), attr("height")) {
        return (0.0, 0.0, w, h);
    }
    (0.0, 0.0, bounds.width, bounds.height)
}

/// Cuts the byte ranges out of `markup`. Nested ranges collapse into their
/// enclosing range.
fn remove_ranges(markup: &str, ranges: &mut [Range<usize>]) -> String {
    ranges.sort_by_key(|r| (r.start, std::cmp::Reverse(r.end)));
    let mut out = String::with_capacity(markup.len());
    let mut cursor = 0;
    for r in ranges.iter() {
        if r.start < cursor {
            continue;
        }
        if let Some(keep) = markup.get(cursor..r.start) {
            out.push_str(keep);
        }
        cursor = r.end;
    }
    if let Some(rest) = markup.get(cursor..) {
        out.push_str(rest);
    }
    out
}

fn placeholder_markup(width: f32, height: f32, label: &str) -> String {
    let inset = width.min(height) * 0.05;
    let font_size = width.min(height) * 0.12;
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}">"##,
            r##"<rect x="{i}" y="{i}" width="{rw}" height="{rh}" fill="none" stroke="#999999" stroke-width="1" stroke-dasharray="4 2"/>"##,
            r##"<text x="{cx}" y="{cy}" font-family="sans-serif" font-size="{fs}" text-anchor="middle" fill="#999999">{label}</text>"##,
            "</svg>"
        ),
        w = width,
        h = height,
        i = inset,
        rw = width - 2.0 * inset,
        rh = height - 2.0 * inset,
        cx = width / 2.0,
        cy = height / 2.0,
        fs = font_size,
        label = html_escape::encode_text(label),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::types::Size;

    fn renderer(fonts: &FontStore) -> PlacementRenderer<'_> {
        PlacementRenderer {
            fonts,
            debug: None,
            outline_stroke_width: 1.0,
        }
    }

    fn job(markup: Option<&str>) -> PlacementJob<'_> {
        PlacementJob {
            id: Some("p1"),
            bounds: Rect::new(10.0, 20.0, 100.0, 50.0),
            markup,
            source_size: None,
        }
    }

    #[test]
    fn frame_meets_and_centers() {
        let frame = ContentFrame::fit(Rect::new(0.0, 0.0, 100.0, 50.0), (0.0, 0.0, 10.0, 10.0))
            .expect("frame");
        assert!((frame.scale - 5.0).abs() < 1e-6);
        assert_eq!(frame.matrix.apply(0.0, 0.0), (25.0, 0.0));
        assert_eq!(frame.matrix.apply(10.0, 10.0), (75.0, 50.0));

        let frame = ContentFrame::fit(Rect::new(0.0, 0.0, 10.0, 10.0), (-5.0, -5.0, 10.0, 10.0))
            .expect("frame");
        assert_eq!(frame.matrix.apply(-5.0, -5.0), (0.0, 0.0));

        assert!(ContentFrame::fit(Rect::new(0.0, 0.0, 0.0, 10.0), (0.0, 0.0, 1.0, 1.0)).is_err());
        assert!(ContentFrame::fit(Rect::new(0.0, 0.0, 10.0, 10.0), (0.0, 0.0, 0.0, 1.0)).is_err());
    }

    #[test]
    fn content_box_prefers_source_size_then_viewbox() {
        let doc = roxmltree::Document::parse(r#"<svg viewBox="5 6 300 200" width="30" height="20"/>"#)
            .expect("xml");
        let root = doc.root_element();
        let bounds = Rect::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(content_box(root, Some((600.0, 400.0)), bounds), (5.0, 6.0, 600.0, 400.0));
        assert_eq!(content_box(root, None, bounds), (5.0, 6.0, 300.0, 200.0));

        let doc = roxmltree::Document::parse(r#"<svg width="30px" height="20"/>"#).expect("xml");
        assert_eq!(content_box(doc.root_element(), None, bounds), (0.0, 0.0, 30.0, 20.0));
        let doc = roxmltree::Document::parse("<svg/>").expect("xml");
        assert_eq!(content_box(doc.root_element(), None, bounds), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn removing_ranges_handles_nesting() {
        let markup = "0123456789";
        let mut ranges = vec![5..7, 1..3, 2..3];
        assert_eq!(remove_ranges(markup, &mut ranges), "034789");
    }

    #[test]
    fn missing_markup_draws_an_outline() {
        let fonts = FontStore::new(None);
        let mut canvas = Canvas::new(Size::a4());
        let outcome = renderer(&fonts).render(&job(None), &mut canvas);
        assert_eq!(outcome, PlacementOutcome::Rendered(Tier::Outline));
        assert!(canvas.commands().iter().any(|c| matches!(
            c,
            Command::StrokeRect { width, .. } if (width.to_f32() - 100.0).abs() < 1e-3
        )));
    }

    #[test]
    fn broken_markup_falls_back_to_placeholder() {
        let fonts = FontStore::new(None);
        let mut canvas = Canvas::new(Size::a4());
        let outcome = renderer(&fonts).render(&job(Some("<svg><rect")), &mut canvas);
        assert_eq!(outcome, PlacementOutcome::Rendered(Tier::Placeholder));
        let commands = canvas.commands();
        assert!(commands.iter().any(|c| matches!(c, Command::Stroke)));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::StrokeString { text, .. } if text == "p1"
        )));
    }

    #[test]
    fn markup_without_svg_root_is_a_tier_one_failure() {
        let fonts = FontStore::new(None);
        let mut canvas = Canvas::new(Size::a4());
        let outcome = renderer(&fonts).render(&job(Some("<g><rect width=\"1\" height=\"1\"/></g>")), &mut canvas);
        assert_eq!(outcome, PlacementOutcome::Rendered(Tier::Placeholder));
    }

    #[test]
    fn invalid_geometry_is_skipped_without_drawing() {
        let fonts = FontStore::new(None);
        let mut canvas = Canvas::new(Size::a4());
        let mut bad = job(None);
        bad.bounds = Rect::new(0.0, 0.0, -1.0, 10.0);
        let outcome = renderer(&fonts).render(&bad, &mut canvas);
        assert!(matches!(outcome, PlacementOutcome::Skipped(_)));
        assert!(canvas.is_empty());
    }

    #[test]
    fn full_render_strips_text_and_barcodes_from_background() {
        let mut markup = String::from(r##"<svg viewBox="0 0 200 100"><rect x="0" y="0" width="200" height="100" fill="#eeeeee"/><g>"##);
        for i in 0..14 {
            let w = if i % 2 == 0 { 2 } else { 6 };
            markup.push_str(&format!(r#"<rect x="{}" y="10" width="{w}" height="40" fill="black"/>"#, 20 + i * 10));
        }
        markup.push_str(r#"</g><text x="100" y="80" font-size="10">Hi</text></svg>"#);

        let fonts = FontStore::new(None);
        let mut canvas = Canvas::new(Size::a4());
        let outcome = renderer(&fonts).render(&job(Some(&markup)), &mut canvas);
        assert_eq!(outcome, PlacementOutcome::Rendered(Tier::Full));

        let commands = canvas.commands();
        // Background rect plus one combined barcode fill.
        let fills = commands.iter().filter(|c| matches!(c, Command::Fill)).count();
        assert_eq!(fills, 2);
        let strings = commands
            .iter()
            .filter(|c| matches!(c, Command::StrokeString { .. }))
            .count();
        assert_eq!(strings, 1);
    }

    #[test]
    fn placeholder_label_is_escaped() {
        let markup = placeholder_markup(100.0, 50.0, "<a&b>");
        let doc = roxmltree::Document::parse(&markup).expect("well-formed placeholder");
        let text = doc
            .descendants()
            .find(|n| n.tag_name().name() == "text")
            .and_then(|n| n.text())
            .expect("label");
        assert_eq!(text, "<a&b>");
    }
}
