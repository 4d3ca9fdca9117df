use crate::base14::builtin_metrics;
use crate::canvas::Canvas;
use crate::debug::DebugLogger;
use crate::font::{DEFAULT_FONT_ID, font_definition, resolve_font_id};
use crate::geometry::{cumulative_matrix, extract_scale};
use crate::glyphs::{FontRun, FontStore, split_into_font_runs};
use crate::placement::ContentFrame;
use crate::svg::{PathSeg, emit_path, parse_color, parse_number, presentation_value};
use crate::types::{Color, Pt};
use serde_json::json;

const DEFAULT_FONT_SIZE: f32 = 16.0;
const BASE_STROKE_WIDTH: f32 = 0.5;
const MIN_STROKE_WIDTH: f32 = 0.25;

/// Where a run's advance and outline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MeasureSource {
    /// Outlines of the run's own font file.
    RunFont,
    /// Outlines of the default font file.
    DefaultFont,
    /// Built-in metrics of a standard PDF font; drawn with the text operator.
    Builtin(&'static str),
}

impl MeasureSource {
    fn label(&self) -> &'static str {
        match self {
            MeasureSource::RunFont => "run_font",
            MeasureSource::DefaultFont => "default_font",
            MeasureSource::Builtin(_) => "builtin",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MeasuredRun {
    pub font_id: &'static str,
    pub text: String,
    pub source: MeasureSource,
    pub advance: f32,
    pub ascent: f32,
    pub line_height: f32,
    /// Baseline-relative outline, empty for built-in runs.
    pub segs: Vec<PathSeg>,
}

/// A positioned single-line text element, in page points.
#[derive(Debug, Clone)]
pub(crate) struct TextLayout {
    pub x: f32,
    pub baseline: f32,
    pub total_width: f32,
    pub line_height: f32,
    pub font_size: f32,
    pub stroke_width: f32,
    pub color: Color,
    pub recentered: bool,
    pub runs: Vec<MeasuredRun>,
}

/// Lays out and strokes every `<text>` element under `root`. Broken elements
/// are skipped with a warning. Returns the number of elements drawn.
pub(crate) fn render_text_elements(
    root: roxmltree::Node<'_, '_>,
    frame: &ContentFrame,
    fonts: &FontStore,
    canvas: &mut Canvas,
    debug: Option<&DebugLogger>,
) -> usize {
    let mut drawn = 0;
    for node in root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "text")
    {
        let Some(layout) = layout_text(node, frame, fonts) else {
            continue;
        };
        if let Some(logger) = debug {
            let sources = layout
                .runs
                .iter()
                .map(|r| json!({"font": r.font_id, "source": r.source.label(), "chars": r.text.chars().count()}))
                .collect::<Vec<_>>();
            logger.event(
                "text.layout",
                json!({
                    "font_size": layout.font_size,
                    "width": layout.total_width,
                    "recentered": layout.recentered,
                    "runs": sources,
                }),
            );
        }
        draw_text_layout(&layout, canvas);
        drawn += 1;
    }
    drawn
}

pub(crate) fn layout_text(
    node: roxmltree::Node<'_, '_>,
    frame: &ContentFrame,
    fonts: &FontStore,
) -> Option<TextLayout> {
    let content = text_content(node);
    if content.is_empty() {
        return None;
    }

    let family = inherited_value(node, "font-family").unwrap_or_default();
    let weight = inherited_value(node, "font-weight").unwrap_or_default();
    let style = inherited_value(node, "font-style").unwrap_or_default();
    let anchor = inherited_value(node, "text-anchor").unwrap_or_default();
    let size_attr = inherited_value(node, "font-size")
        .and_then(|v| parse_number(&v))
        .filter(|v| *v > 0.0)
        .unwrap_or(DEFAULT_FONT_SIZE);
    let color = inherited_value(node, "fill")
        .and_then(|v| parse_color(&v))
        .unwrap_or(Color::BLACK);

    let m = cumulative_matrix(node);
    let x = first_coordinate(node, "x");
    let y = first_coordinate(node, "y");
    let (ux, uy) = m.apply(x, y);
    let (px, py) = frame.matrix.apply(ux, uy);
    let (_, sy) = extract_scale(m);
    let factor = frame.scale * sy;
    let font_size = size_attr * factor;
    let stroke_width = (BASE_STROKE_WIDTH * factor).max(MIN_STROKE_WIDTH);

    if ![px, py, font_size, stroke_width].iter().all(|v| v.is_finite()) || font_size <= 0.0 {
        log::warn!("text element {:?} has non-finite geometry; skipped", content);
        return None;
    }

    let preferred = resolve_font_id(&family, &weight, &style);
    let runs = split_into_font_runs(&content, preferred, fonts)
        .into_iter()
        .map(|run| measure_run(run, font_size, fonts))
        .collect::<Vec<_>>();

    let total_width: f32 = runs.iter().map(|r| r.advance).sum();
    let line_height = runs.iter().map(|r| r.line_height).fold(0.0, f32::max);
    let ascent = runs.iter().map(|r| r.ascent).fold(0.0, f32::max);
    let half_line = line_height / 2.0;

    let mut draw_x = match anchor.trim().to_ascii_lowercase().as_str() {
        "end" | "right" => px - total_width,
        // middle, center and everything else.
        _ => px - total_width / 2.0,
    };
    let mut top = py - half_line;

    let b = frame.bounds;
    let slack_x = b.width * 0.25;
    let out_of_bounds = draw_x < b.x - slack_x
        || draw_x > b.right() + slack_x
        || top < b.y - b.height * 0.5
        || top > b.y + b.height * 1.5;
    if out_of_bounds {
        log::debug!("text {:?} outside its box; centering", content);
        let (cx, cy) = b.center();
        draw_x = cx - total_width / 2.0;
        top = cy - half_line;
    }

    Some(TextLayout {
        x: draw_x,
        baseline: top + ascent,
        total_width,
        line_height,
        font_size,
        stroke_width,
        color,
        recentered: out_of_bounds,
        runs,
    })
}

/// Strokes each run: outline paths where available, the text operator in
/// stroke mode otherwise. Nothing is filled.
pub(crate) fn draw_text_layout(layout: &TextLayout, canvas: &mut Canvas) {
    canvas.save_state();
    canvas.set_stroke_color(layout.color);
    canvas.set_line_width(Pt::from_f32(layout.stroke_width));

    let mut pen_x = layout.x;
    for run in &layout.runs {
        match run.source {
            MeasureSource::Builtin(name) => canvas.stroke_string(
                Pt::from_f32(pen_x),
                Pt::from_f32(layout.baseline),
                name,
                Pt::from_f32(layout.font_size),
                run.text.as_str(),
            ),
            MeasureSource::RunFont | MeasureSource::DefaultFont => {
                if !run.segs.is_empty() {
                    let placed = offset_segs(&run.segs, pen_x, layout.baseline);
                    emit_path(canvas, &placed);
                    canvas.stroke();
                }
            }
        }
        pen_x += run.advance;
    }
    canvas.restore_state();
}

fn measure_run(run: FontRun, font_size: f32, fonts: &FontStore) -> MeasuredRun {
    let outline = |font_id: &str| {
        fonts
            .load(font_id)
            .and_then(|font| font.outline_run(&run.text, font_size))
            .filter(|o| o.advance.is_finite() && o.line_height.is_finite())
    };

    let mut measured = outline(run.font_id).map(|o| (MeasureSource::RunFont, o));
    if measured.is_none() && run.font_id != DEFAULT_FONT_ID {
        measured = outline(DEFAULT_FONT_ID).map(|o| (MeasureSource::DefaultFont, o));
    }

    match measured {
        Some((source, o)) => MeasuredRun {
            font_id: run.font_id,
            text: run.text,
            source,
            advance: o.advance,
            ascent: o.ascent,
            line_height: o.line_height,
            segs: o.segs,
        },
        None => {
            let builtin = font_definition(run.font_id)
                .map(|d| d.builtin)
                .unwrap_or("Helvetica");
            let metrics = builtin_metrics(builtin);
            log::debug!(
                "no outlines for {}; measuring with {}",
                run.font_id,
                metrics.name
            );
            MeasuredRun {
                font_id: run.font_id,
                advance: metrics.text_width(&run.text, font_size),
                ascent: metrics.ascent(font_size),
                line_height: metrics.line_height(font_size),
                source: MeasureSource::Builtin(metrics.name),
                text: run.text,
                segs: Vec::new(),
            }
        }
    }
}

fn offset_segs(segs: &[PathSeg], dx: f32, dy: f32) -> Vec<PathSeg> {
    segs.iter()
        .map(|seg| match *seg {
            PathSeg::MoveTo(x, y) => PathSeg::MoveTo(x + dx, y + dy),
            PathSeg::LineTo(x, y) => PathSeg::LineTo(x + dx, y + dy),
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                PathSeg::CurveTo(x1 + dx, y1 + dy, x2 + dx, y2 + dy, x + dx, y + dy)
            }
            PathSeg::Close => PathSeg::Close,
        })
        .collect()
}

/// Concatenated character data with XML whitespace collapsed and HTML
/// entities decoded.
fn text_content(node: roxmltree::Node<'_, '_>) -> String {
    let raw = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>();
    let decoded = html_escape::decode_html_entities(&raw);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Nearest value on the element or one of its ancestors; `inherit` defers upwards.
fn inherited_value(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.ancestors()
        .filter(|n| n.is_element())
        .filter_map(|n| presentation_value(n, name))
        .find(|v| !v.trim().eq_ignore_ascii_case("inherit"))
}

fn first_coordinate(node: roxmltree::Node<'_, '_>, name: &str) -> f32 {
    node.attribute(name)
        .and_then(|v| {
            v.split(|c: char| c.is_whitespace() || c == ',')
                .find(|s| !s.is_empty())
        })
        .and_then(parse_number)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::glyphs::test_font_dir;
    use crate::types::{Rect, Size};

    fn square_frame() -> ContentFrame {
        ContentFrame::fit(Rect::new(0.0, 0.0, 100.0, 100.0), (0.0, 0.0, 20.0, 20.0))
            .expect("frame")
    }

    fn layout_of(markup: &str, frame: &ContentFrame) -> Option<TextLayout> {
        let doc = roxmltree::Document::parse(markup).expect("xml");
        let node = doc
            .descendants()
            .find(|n| n.tag_name().name() == "text")
            .expect("text element");
        layout_text(node, frame, &FontStore::new(None))
    }

    #[test]
    fn anchorless_text_is_centered_on_its_anchor() {
        let layout = layout_of(
            r#"<svg><text x="10" y="10" font-family="Arial" font-size="16">Hi</text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        assert!((layout.font_size - 80.0).abs() < 1e-3);
        // Helvetica: H + i = 944 units.
        assert!((layout.total_width - 75.52).abs() < 0.01);
        assert!((layout.x + layout.total_width / 2.0 - 50.0).abs() < 0.01);
        assert!(!layout.recentered);
        assert_eq!(layout.runs.len(), 1);
        assert_eq!(layout.runs[0].font_id, "Roboto");
        assert_eq!(layout.runs[0].source, MeasureSource::Builtin("Helvetica"));
    }

    #[test]
    fn line_box_is_centered_vertically() {
        let layout = layout_of(
            r#"<svg><text x="10" y="10" font-size="4">Hi</text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        let top = layout.baseline - layout.runs[0].ascent;
        assert!((top + layout.line_height / 2.0 - 50.0).abs() < 0.01);
    }

    #[test]
    fn end_anchor_right_aligns() {
        let layout = layout_of(
            r#"<svg><text x="10" y="10" font-size="4" text-anchor="end">Hi</text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        assert!((layout.x + layout.total_width - 50.0).abs() < 0.01);
    }

    #[test]
    fn style_values_apply_when_attributes_are_absent() {
        let layout = layout_of(
            r#"<svg><text x="10" y="10" style="font-size: 8px; text-anchor: middle; font-weight: bold">Hi</text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        assert!((layout.font_size - 40.0).abs() < 1e-3);
        assert_eq!(layout.runs[0].font_id, "NotoSans-Bold");
        assert_eq!(layout.runs[0].source, MeasureSource::Builtin("Helvetica-Bold"));
    }

    #[test]
    fn ancestor_scale_multiplies_font_size() {
        let layout = layout_of(
            r#"<svg><g transform="scale(2)"><text x="5" y="5" font-size="4">Hi</text></g></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        assert!((layout.font_size - 40.0).abs() < 1e-3);
        assert!((layout.stroke_width - 5.0).abs() < 1e-3);
        assert!((layout.x + layout.total_width / 2.0 - 50.0).abs() < 0.01);
    }

    #[test]
    fn stroke_width_has_a_visible_floor() {
        let frame = ContentFrame::fit(Rect::new(0.0, 0.0, 100.0, 100.0), (0.0, 0.0, 1000.0, 1000.0))
            .expect("frame");
        let layout = layout_of(
            r#"<svg><text x="500" y="500" font-size="40">Hi</text></svg>"#,
            &frame,
        )
        .expect("layout");
        assert!((layout.stroke_width - MIN_STROKE_WIDTH).abs() < 1e-6);
    }

    #[test]
    fn far_away_text_is_recentered_in_the_box() {
        let layout = layout_of(
            r#"<svg><text x="900" y="10" font-size="4">Hi</text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        assert!(layout.recentered);
        assert!((layout.x + layout.total_width / 2.0 - 50.0).abs() < 0.01);
    }

    #[test]
    fn blank_text_is_skipped_and_entities_are_decoded() {
        assert!(layout_of(r#"<svg><text x="1" y="1">   </text></svg>"#, &square_frame()).is_none());
        let layout = layout_of(
            r#"<svg><text x="10" y="10" font-size="2"> A&amp;copy;  <tspan>B</tspan> </text></svg>"#,
            &square_frame(),
        )
        .expect("layout");
        let text: String = layout.runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(text, "A\u{a9} B");
    }

    #[test]
    fn text_is_stroked_never_filled() {
        let doc = roxmltree::Document::parse(
            r##"<svg><text x="10" y="10" fill="#ff0000">Hi</text><text x="10" y="15"/></svg>"##,
        )
        .expect("xml");
        let mut canvas = Canvas::new(Size::a4());
        let drawn = render_text_elements(
            doc.root_element(),
            &square_frame(),
            &FontStore::new(None),
            &mut canvas,
            None,
        );
        assert_eq!(drawn, 1);
        let commands = canvas.commands();
        assert!(commands.iter().any(|c| matches!(c, Command::StrokeString { font: "Helvetica", .. })));
        assert!(commands.iter().any(|c| matches!(c, Command::SetStrokeColor(c) if c.r > 0.99)));
        assert!(!commands.iter().any(|c| matches!(c, Command::Fill | Command::FillEvenOdd)));
    }

    #[test]
    fn outline_runs_are_offset_to_the_pen_position() {
        let segs = vec![PathSeg::MoveTo(1.0, -2.0), PathSeg::Close];
        let placed = offset_segs(&segs, 10.0, 20.0);
        assert_eq!(placed, vec![PathSeg::MoveTo(11.0, 18.0), PathSeg::Close]);
    }

    fn layout_with_fonts(markup: &str, fonts: &FontStore) -> TextLayout {
        let doc = roxmltree::Document::parse(markup).expect("xml");
        let node = doc
            .descendants()
            .find(|n| n.tag_name().name() == "text")
            .expect("text element");
        layout_text(node, &square_frame(), fonts).expect("layout")
    }

    #[test]
    fn covered_runs_are_measured_with_their_own_outlines() {
        let fonts = FontStore::new(Some(test_font_dir(&["NotoSans-Regular.ttf"])));
        let layout = layout_with_fonts(
            r#"<svg><text x="10" y="10" font-size="2">Hi</text></svg>"#,
            &fonts,
        );
        assert_eq!(layout.runs.len(), 1);
        let run = &layout.runs[0];
        assert_eq!(run.font_id, DEFAULT_FONT_ID);
        assert_eq!(run.source, MeasureSource::RunFont);
        // 10pt after the 5x frame: H (600) + i (300) units at 0.01pt each.
        assert!((run.advance - 9.0).abs() < 1e-3);
        assert!((layout.line_height - 10.0).abs() < 1e-3);
        assert!(!run.segs.is_empty());
    }

    #[test]
    fn missing_run_font_measures_with_the_default_outlines() {
        let fonts = FontStore::new(Some(test_font_dir(&["NotoSans-Regular.ttf"])));
        let layout = layout_with_fonts(
            r#"<svg><text x="10" y="10" font-family="Roboto" font-size="2">HB</text></svg>"#,
            &fonts,
        );
        let sources = layout
            .runs
            .iter()
            .map(|r| (r.font_id, r.text.as_str(), r.source))
            .collect::<Vec<_>>();
        assert_eq!(
            sources,
            vec![
                ("NotoSans", "H", MeasureSource::RunFont),
                ("Roboto", "B", MeasureSource::DefaultFont),
            ]
        );
        // B has no glyph; the default face's .notdef advance still counts.
        assert!((layout.runs[1].advance - 5.0).abs() < 1e-3);
        assert!(fonts.is_unavailable("Roboto"));
    }

    #[test]
    fn outline_runs_are_only_stroked() {
        let fonts = FontStore::new(Some(test_font_dir(&["NotoSans-Regular.ttf"])));
        let layout = layout_with_fonts(
            r#"<svg><text x="10" y="10" font-size="2">Hi</text></svg>"#,
            &fonts,
        );
        let mut canvas = Canvas::new(Size::a4());
        draw_text_layout(&layout, &mut canvas);
        let commands = canvas.commands();
        assert!(commands.iter().any(|c| matches!(c, Command::CurveTo { .. })));
        assert_eq!(
            commands.iter().filter(|c| matches!(c, Command::Stroke)).count(),
            1
        );
        assert!(!commands.iter().any(|c| matches!(
            c,
            Command::Fill
                | Command::FillEvenOdd
                | Command::FillStroke
                | Command::FillStrokeEvenOdd
                | Command::StrokeString { .. }
        )));
    }

    #[test]
    fn fill_and_font_properties_inherit_from_ancestors() {
        let layout = layout_of(
            r##"<svg><g fill="#cc0000" style="font-family: Courier; font-weight: bold"><text x="10" y="10" font-size="4">Hi</text></g></svg>"##,
            &square_frame(),
        )
        .expect("layout");
        assert!((layout.color.r - 0.8).abs() < 1e-3);
        assert!(layout.color.g.abs() < 1e-3);
        assert_eq!(
            layout.runs[0].source,
            MeasureSource::Builtin("Courier-Bold")
        );

        let own = layout_of(
            r##"<svg><g fill="#cc0000"><text x="10" y="10" fill="blue">Hi</text></g></svg>"##,
            &square_frame(),
        )
        .expect("layout");
        assert!((own.color.b - 1.0).abs() < 1e-3);
        assert!(own.color.r.abs() < 1e-3);
    }
}
