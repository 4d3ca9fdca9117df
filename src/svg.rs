use crate::canvas::Canvas;
use crate::error::RenderError;
use crate::geometry::{Matrix, parse_transform};
use crate::types::{Color, Pt};
use lightningcss::printer::PrinterOptions;
use lightningcss::properties::Property;
use lightningcss::properties::svg::{SVGPaint, StrokeDasharray, StrokeLinecap, StrokeLinejoin};
use lightningcss::stylesheet::{ParserOptions, StyleAttribute};
use lightningcss::traits::ToCss;
use lightningcss::values::alpha::AlphaValue;
use lightningcss::values::color::{CssColor, SRGB};
use lightningcss::values::shape::FillRule;
use std::collections::HashMap;

// Vector subset used for placement backgrounds:
// - g, svg, use, path, rect, circle, ellipse, line, polyline, polygon
// - fill / stroke / stroke-width / caps / joins / dashes / opacity / fill-rule
// Not supported: text (drawn separately), gradients, clipPath, mask, filter, image.

fn q(value: f32) -> f32 {
    Pt::from_f32(value).to_f32()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PathSeg {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

#[derive(Debug, Clone)]
pub(crate) struct SvgStyle {
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    pub stroke_width: f32,
    pub line_cap: u8,
    pub line_join: u8,
    pub miter_limit: f32,
    pub dash_pattern: Vec<f32>,
    pub dash_offset: f32,
    pub fill_rule_evenodd: bool,
    pub fill_opacity: f32,
    pub stroke_opacity: f32,
}

impl Default for SvgStyle {
    fn default() -> Self {
        // SVG defaults: black fill, no stroke.
        Self {
            fill: Some(Color::BLACK),
            stroke: None,
            stroke_width: 1.0,
            line_cap: 0,
            line_join: 0,
            miter_limit: 4.0,
            dash_pattern: Vec::new(),
            dash_offset: 0.0,
            fill_rule_evenodd: false,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledPath {
    pub segs: Vec<PathSeg>,
    pub style: SvgStyle,
}

/// Parses `markup` and flattens every drawable element into page-space paths.
/// `frame` maps the root's user space onto the page (top-left origin).
pub(crate) fn compile_svg(markup: &str, frame: Matrix) -> Result<Vec<CompiledPath>, RenderError> {
    let doc = roxmltree::Document::parse(markup)?;
    let root = find_svg_root(&doc).ok_or(RenderError::MissingRoot)?;
    let id_map = build_id_map(&doc);
    let mut out = Vec::new();
    compile_element(&mut out, root, frame, &SvgStyle::default(), &id_map, 0);
    Ok(out)
}

pub(crate) fn find_svg_root<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
) -> Option<roxmltree::Node<'a, 'input>> {
    let root = doc.root_element();
    if root.tag_name().name().eq_ignore_ascii_case("svg") {
        return Some(root);
    }
    root.descendants()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("svg"))
}

pub(crate) fn render_compiled(paths: &[CompiledPath], canvas: &mut Canvas) {
    for path in paths {
        draw_compiled_path(canvas, path);
    }
}

// <use> may point at an ancestor; bound the recursion.
const MAX_USE_DEPTH: u8 = 8;

fn compile_element(
    out: &mut Vec<CompiledPath>,
    node: roxmltree::Node<'_, '_>,
    ctm: Matrix,
    style: &SvgStyle,
    id_map: &HashMap<String, roxmltree::Node<'_, '_>>,
    use_depth: u8,
) {
    if !node.is_element() {
        return;
    }

    let mut local_style = style.clone();
    apply_presentation_and_style(node, &mut local_style);

    let mut local_ctm = ctm;
    if let Some(transform) = node.attribute("transform") {
        local_ctm = local_ctm.mul(parse_transform(transform));
    }

    let segs = match node.tag_name().name() {
        "g" | "svg" | "a" => {
            for child in node.children().filter(|n| n.is_element()) {
                compile_element(out, child, local_ctm, &local_style, id_map, use_depth);
            }
            return;
        }
        "use" => {
            if use_depth >= MAX_USE_DEPTH {
                return;
            }
            if let Some(target) = href_id(node).and_then(|id| id_map.get(&id).copied()) {
                let x = node.attribute("x").and_then(parse_number).unwrap_or(0.0);
                let y = node.attribute("y").and_then(parse_number).unwrap_or(0.0);
                let use_ctm = local_ctm.mul(Matrix::translate(x, y));
                compile_element(out, target, use_ctm, &local_style, id_map, use_depth + 1);
            }
            return;
        }
        "path" => node.attribute("d").map(parse_path_data),
        "rect" => rect_to_path(node),
        "circle" => circle_to_path(node),
        "ellipse" => ellipse_to_path(node),
        "line" => line_to_path(node),
        "polyline" => poly_points_to_path(node, false),
        "polygon" => poly_points_to_path(node, true),
        // defs, text, title, metadata and anything else outside the subset.
        _ => None,
    };

    if let Some(segs) = segs {
        push_compiled_path(out, &segs, &local_style, local_ctm);
    }
}

fn build_id_map<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
) -> HashMap<String, roxmltree::Node<'a, 'input>> {
    let mut out = HashMap::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        if let Some(id) = node.attribute("id") {
            // First wins.
            out.entry(id.to_string()).or_insert(node);
        }
    }
    out
}

fn href_id(node: roxmltree::Node<'_, '_>) -> Option<String> {
    let raw = node
        .attribute("href")
        .or_else(|| node.attribute(("http://www.w3.org/1999/xlink", "href")))?;
    let id = raw.trim().strip_prefix('#')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

fn push_compiled_path(out: &mut Vec<CompiledPath>, segs: &[PathSeg], style: &SvgStyle, ctm: Matrix) {
    let has_fill = style.fill.is_some();
    let has_stroke = style.stroke.is_some() && style.stroke_width > 0.0;
    if (!has_fill && !has_stroke) || segs.is_empty() {
        return;
    }

    let out_segs = transform_path_segs(segs, ctm)
        .into_iter()
        .map(|seg| match seg {
            PathSeg::MoveTo(x, y) => PathSeg::MoveTo(q(x), q(y)),
            PathSeg::LineTo(x, y) => PathSeg::LineTo(q(x), q(y)),
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                PathSeg::CurveTo(q(x1), q(y1), q(x2), q(y2), q(x), q(y))
            }
            PathSeg::Close => PathSeg::Close,
        })
        .collect();

    let mut out_style = style.clone();
    if has_stroke {
        let sf = ctm.area_scale();
        out_style.stroke_width *= sf;
        for v in &mut out_style.dash_pattern {
            *v *= sf;
        }
        out_style.dash_offset *= sf;
    }
    out.push(CompiledPath {
        segs: out_segs,
        style: out_style,
    });
}

pub(crate) fn transform_path_segs(segs: &[PathSeg], ctm: Matrix) -> Vec<PathSeg> {
    segs.iter()
        .map(|seg| match *seg {
            PathSeg::MoveTo(x, y) => {
                let (x, y) = ctm.apply(x, y);
                PathSeg::MoveTo(x, y)
            }
            PathSeg::LineTo(x, y) => {
                let (x, y) = ctm.apply(x, y);
                PathSeg::LineTo(x, y)
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                let (x1, y1) = ctm.apply(x1, y1);
                let (x2, y2) = ctm.apply(x2, y2);
                let (x, y) = ctm.apply(x, y);
                PathSeg::CurveTo(x1, y1, x2, y2, x, y)
            }
            PathSeg::Close => PathSeg::Close,
        })
        .collect()
}

/// Appends `segs` to the canvas' current path. Coordinates are page points.
pub(crate) fn emit_path(canvas: &mut Canvas, segs: &[PathSeg]) {
    for seg in segs {
        match *seg {
            PathSeg::MoveTo(x, y) => canvas.move_to(Pt::from_f32(x), Pt::from_f32(y)),
            PathSeg::LineTo(x, y) => canvas.line_to(Pt::from_f32(x), Pt::from_f32(y)),
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => canvas.curve_to(
                Pt::from_f32(x1),
                Pt::from_f32(y1),
                Pt::from_f32(x2),
                Pt::from_f32(y2),
                Pt::from_f32(x),
                Pt::from_f32(y),
            ),
            PathSeg::Close => canvas.close_path(),
        }
    }
}

fn draw_compiled_path(canvas: &mut Canvas, path: &CompiledPath) {
    let style = &path.style;
    let has_fill = style.fill.is_some();
    let has_stroke = style.stroke.is_some() && style.stroke_width > 0.0;
    if !has_fill && !has_stroke {
        return;
    }

    if has_stroke {
        canvas.set_miter_limit(Pt::from_f32(style.miter_limit));
        let pattern = style
            .dash_pattern
            .iter()
            .map(|v| Pt::from_f32(*v))
            .collect::<Vec<_>>();
        canvas.set_dash(pattern, Pt::from_f32(style.dash_offset));
    }
    canvas.set_opacity(style.fill_opacity, style.stroke_opacity);

    if let Some(fill) = style.fill {
        canvas.set_fill_color(fill);
    }
    if let Some(stroke) = style.stroke {
        canvas.set_stroke_color(stroke);
        canvas.set_line_width(Pt::from_f32(style.stroke_width));
        canvas.set_line_cap(style.line_cap);
        canvas.set_line_join(style.line_join);
    }

    emit_path(canvas, &path.segs);

    match (has_fill, has_stroke, style.fill_rule_evenodd) {
        (true, true, true) => canvas.fill_stroke_evenodd(),
        (true, true, false) => canvas.fill_stroke(),
        (true, false, true) => canvas.fill_evenodd(),
        (true, false, false) => canvas.fill(),
        (false, true, _) => canvas.stroke(),
        (false, false, _) => {}
    }
}

pub(crate) fn parse_viewbox(view_box: Option<&str>) -> Option<(f32, f32, f32, f32)> {
    let vb = view_box?;
    let mut it = vb
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty());
    let min_x = it.next()?.parse::<f32>().ok()?;
    let min_y = it.next()?.parse::<f32>().ok()?;
    let w = it.next()?.parse::<f32>().ok()?;
    let h = it.next()?.parse::<f32>().ok()?;
    if !(w > 0.0 && h > 0.0 && min_x.is_finite() && min_y.is_finite() && w.is_finite() && h.is_finite())
    {
        return None;
    }
    Some((min_x, min_y, w, h))
}

/// Looks a property up on an element: the presentation attribute wins, then
/// the inline `style` declaration.
pub(crate) fn presentation_value(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    if let Some(value) = node.attribute(name) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    style_property(node.attribute("style")?, name)
}

/// Value of one declaration in an inline style string. `!important` beats
/// normal declarations and later declarations beat earlier ones.
pub(crate) fn style_property(style: &str, name: &str) -> Option<String> {
    if let Ok(attr) = StyleAttribute::parse(style, ParserOptions::default()) {
        let decls = &attr.declarations;
        let typed = decls
            .important_declarations
            .iter()
            .rev()
            .chain(decls.declarations.iter().rev())
            .find(|prop| prop.property_id().name().eq_ignore_ascii_case(name))
            .and_then(|prop| prop.value_to_css_string(PrinterOptions::default()).ok());
        if let Some(value) = typed {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    style_property_legacy(style, name)
}

fn style_property_legacy(style: &str, name: &str) -> Option<String> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .filter(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim().trim_end_matches("!important").trim().to_string())
        .filter(|v| !v.is_empty())
        .last()
}

fn apply_presentation_and_style(node: roxmltree::Node<'_, '_>, style: &mut SvgStyle) {
    // Presentation attributes are the baseline.
    if let Some(fill) = node.attribute("fill") {
        parse_paint_into(fill, &mut style.fill);
    }
    if let Some(stroke) = node.attribute("stroke") {
        parse_paint_into(stroke, &mut style.stroke);
    }
    if let Some(v) = node.attribute("stroke-width").and_then(parse_number) {
        style.stroke_width = v.max(0.0);
    }
    if let Some(v) = node.attribute("stroke-miterlimit").and_then(parse_number) {
        style.miter_limit = v.max(0.0);
    }
    if let Some(cap) = node.attribute("stroke-linecap") {
        style.line_cap = line_cap_code(cap.trim());
    }
    if let Some(join) = node.attribute("stroke-linejoin") {
        style.line_join = line_join_code(join.trim());
    }
    if let Some(fr) = node.attribute("fill-rule") {
        style.fill_rule_evenodd = fr.trim().eq_ignore_ascii_case("evenodd");
    }
    if let Some(da) = node.attribute("stroke-dasharray") {
        apply_dasharray(da, style);
    }
    if let Some(v) = node.attribute("stroke-dashoffset").and_then(parse_number) {
        style.dash_offset = v;
    }
    if let Some(v) = node.attribute("opacity").and_then(parse_number) {
        let o = v.clamp(0.0, 1.0);
        style.fill_opacity *= o;
        style.stroke_opacity *= o;
    }
    if let Some(v) = node.attribute("fill-opacity").and_then(parse_number) {
        style.fill_opacity *= v.clamp(0.0, 1.0);
    }
    if let Some(v) = node.attribute("stroke-opacity").and_then(parse_number) {
        style.stroke_opacity *= v.clamp(0.0, 1.0);
    }

    // Inline style="" wins over presentation attributes.
    if let Some(s) = node.attribute("style") {
        apply_style_string(s, style);
    }
}

fn line_cap_code(value: &str) -> u8 {
    match value {
        "round" => 1,
        "square" => 2,
        _ => 0,
    }
}

fn line_join_code(value: &str) -> u8 {
    match value {
        "round" => 1,
        "bevel" => 2,
        _ => 0,
    }
}

fn apply_dasharray(value: &str, style: &mut SvgStyle) {
    if value.trim().eq_ignore_ascii_case("none") {
        style.dash_pattern.clear();
        return;
    }
    style.dash_pattern = parse_length_list(value);
    if style.dash_pattern.len() % 2 == 1 {
        let dup = style.dash_pattern.clone();
        style.dash_pattern.extend_from_slice(&dup);
    }
}

fn apply_style_string(input: &str, style: &mut SvgStyle) {
    if let Ok(style_attr) = StyleAttribute::parse(input, ParserOptions::default()) {
        for prop in style_attr
            .declarations
            .declarations
            .iter()
            .chain(style_attr.declarations.important_declarations.iter())
        {
            apply_svg_property(prop, style);
        }
        return;
    }
    apply_style_string_legacy(input, style);
}

fn apply_svg_property(prop: &Property<'_>, style: &mut SvgStyle) {
    match prop {
        Property::Fill(paint) => {
            if let Some(alpha) = apply_svg_paint(paint, &mut style.fill) {
                style.fill_opacity *= alpha;
            }
        }
        Property::Stroke(paint) => {
            if let Some(alpha) = apply_svg_paint(paint, &mut style.stroke) {
                style.stroke_opacity *= alpha;
            }
        }
        Property::StrokeWidth(value) => {
            if let Some(v) = value
                .to_css_string(PrinterOptions::default())
                .ok()
                .and_then(|raw| parse_number(&raw))
            {
                style.stroke_width = v.max(0.0);
            }
        }
        Property::StrokeMiterlimit(value) => {
            style.miter_limit = value.max(0.0);
        }
        Property::StrokeLinecap(value) => {
            style.line_cap = match value {
                StrokeLinecap::Round => 1,
                StrokeLinecap::Square => 2,
                StrokeLinecap::Butt => 0,
            };
        }
        Property::StrokeLinejoin(value) => {
            style.line_join = match value {
                StrokeLinejoin::Round => 1,
                StrokeLinejoin::Bevel => 2,
                StrokeLinejoin::Miter | StrokeLinejoin::MiterClip | StrokeLinejoin::Arcs => 0,
            };
        }
        Property::FillRule(value) => {
            style.fill_rule_evenodd = matches!(value, FillRule::Evenodd);
        }
        Property::StrokeDasharray(value) => match value {
            StrokeDasharray::None => style.dash_pattern.clear(),
            StrokeDasharray::Values(values) => {
                let raw = values
                    .iter()
                    .filter_map(|v| v.to_css_string(PrinterOptions::default()).ok())
                    .collect::<Vec<_>>()
                    .join(" ");
                apply_dasharray(&raw, style);
            }
        },
        Property::StrokeDashoffset(value) => {
            if let Some(v) = value
                .to_css_string(PrinterOptions::default())
                .ok()
                .and_then(|raw| parse_number(&raw))
            {
                style.dash_offset = v;
            }
        }
        Property::Opacity(value) => {
            let o = alpha_value(value);
            style.fill_opacity *= o;
            style.stroke_opacity *= o;
        }
        Property::FillOpacity(value) => {
            style.fill_opacity *= alpha_value(value);
        }
        Property::StrokeOpacity(value) => {
            style.stroke_opacity *= alpha_value(value);
        }
        _ => {}
    }
}

fn apply_svg_paint(paint: &SVGPaint<'_>, out: &mut Option<Color>) -> Option<f32> {
    match paint {
        SVGPaint::None => {
            *out = None;
            Some(1.0)
        }
        SVGPaint::Color(color) => {
            let (mapped, alpha) = css_color_to_color(color)?;
            *out = Some(mapped);
            Some(alpha)
        }
        // Gradients and context paints keep the inherited paint.
        _ => None,
    }
}

fn css_color_to_color(color: &CssColor) -> Option<(Color, f32)> {
    if let CssColor::RGBA(rgba) = color {
        let alpha = (rgba.alpha as f32 / 255.0).clamp(0.0, 1.0);
        return Some((
            Color::rgb(
                rgba.red as f32 / 255.0,
                rgba.green as f32 / 255.0,
                rgba.blue as f32 / 255.0,
            ),
            alpha,
        ));
    }
    if let Ok(srgb) = SRGB::try_from(color) {
        return Some((Color::rgb(srgb.r, srgb.g, srgb.b), 1.0));
    }
    None
}

fn alpha_value(value: &AlphaValue) -> f32 {
    value.0.clamp(0.0, 1.0)
}

fn apply_style_string_legacy(input: &str, style: &mut SvgStyle) {
    for decl in input.split(';') {
        let Some((k, v)) = decl.split_once(':') else {
            continue;
        };
        let key = k.trim().to_ascii_lowercase();
        let val = v.trim();
        match key.as_str() {
            "fill" => parse_paint_into(val, &mut style.fill),
            "stroke" => parse_paint_into(val, &mut style.stroke),
            "stroke-width" => {
                if let Some(v) = parse_number(val) {
                    style.stroke_width = v.max(0.0);
                }
            }
            "stroke-miterlimit" => {
                if let Some(v) = parse_number(val) {
                    style.miter_limit = v.max(0.0);
                }
            }
            "stroke-linecap" => style.line_cap = line_cap_code(val),
            "stroke-linejoin" => style.line_join = line_join_code(val),
            "fill-rule" => style.fill_rule_evenodd = val.eq_ignore_ascii_case("evenodd"),
            "stroke-dasharray" => apply_dasharray(val, style),
            "stroke-dashoffset" => {
                if let Some(v) = parse_number(val) {
                    style.dash_offset = v;
                }
            }
            "opacity" => {
                if let Some(v) = parse_number(val) {
                    let o = v.clamp(0.0, 1.0);
                    style.fill_opacity *= o;
                    style.stroke_opacity *= o;
                }
            }
            "fill-opacity" => {
                if let Some(v) = parse_number(val) {
                    style.fill_opacity *= v.clamp(0.0, 1.0);
                }
            }
            "stroke-opacity" => {
                if let Some(v) = parse_number(val) {
                    style.stroke_opacity *= v.clamp(0.0, 1.0);
                }
            }
            _ => {}
        }
    }
}

fn parse_length_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(parse_number)
        .collect()
}

fn parse_paint_into(input: &str, out: &mut Option<Color>) {
    let v = input.trim();
    if v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("transparent") {
        *out = None;
        return;
    }
    // Unknown paint (currentColor, url(#...)): keep inherited.
    if let Some(c) = parse_color(v) {
        *out = Some(c);
    }
}

pub(crate) fn parse_color(input: &str) -> Option<Color> {
    let v = input.trim();
    if let Some(hex) = v.strip_prefix('#') {
        let digits = hex
            .chars()
            .map(|c| c.to_digit(16))
            .collect::<Option<Vec<u32>>>()?;
        let channel = |hi: u32, lo: u32| (hi * 16 + lo) as f32 / 255.0;
        return match digits.as_slice() {
            [r, g, b] | [r, g, b, _] => Some(Color::rgb(
                channel(*r, *r),
                channel(*g, *g),
                channel(*b, *b),
            )),
            [r1, r2, g1, g2, b1, b2] | [r1, r2, g1, g2, b1, b2, _, _] => Some(Color::rgb(
                channel(*r1, *r2),
                channel(*g1, *g2),
                channel(*b1, *b2),
            )),
            _ => None,
        };
    }

    let lower = v.to_ascii_lowercase();
    if let Some(inner) = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))
        .and_then(|s| s.strip_suffix(')'))
    {
        let parts = inner
            .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .take(3)
            .map(|s| match s.strip_suffix('%') {
                Some(pct) => pct.parse::<f32>().ok().map(|p| p / 100.0),
                None => s.parse::<f32>().ok().map(|c| c / 255.0),
            })
            .collect::<Option<Vec<_>>>()?;
        if let [r, g, b] = parts.as_slice() {
            return Some(Color::rgb(
                r.clamp(0.0, 1.0),
                g.clamp(0.0, 1.0),
                b.clamp(0.0, 1.0),
            ));
        }
        return None;
    }

    // Named colors common in editor exports.
    let (r, g, b) = match lower.as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "navy" => (0, 0, 128),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "maroon" => (128, 0, 0),
        "olive" => (128, 128, 0),
        "teal" => (0, 128, 128),
        "aqua" | "cyan" => (0, 255, 255),
        "fuchsia" | "magenta" => (255, 0, 255),
        _ => return None,
    };
    Some(Color::rgb(
        r as f32 / 255.0,
        g as f32 / 255.0,
        b as f32 / 255.0,
    ))
}

/// Number with an optional unit suffix. Units are treated as user units.
pub(crate) fn parse_number(input: &str) -> Option<f32> {
    let s = input
        .trim()
        .trim_end_matches("px")
        .trim_end_matches("pt")
        .trim_end_matches("mm")
        .trim_end_matches("cm")
        .trim_end_matches("in")
        .trim();
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn rect_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let x = node.attribute("x").and_then(parse_number).unwrap_or(0.0);
    let y = node.attribute("y").and_then(parse_number).unwrap_or(0.0);
    let w = parse_number(node.attribute("width")?)?;
    let h = parse_number(node.attribute("height")?)?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(vec![
        PathSeg::MoveTo(x, y),
        PathSeg::LineTo(x + w, y),
        PathSeg::LineTo(x + w, y + h),
        PathSeg::LineTo(x, y + h),
        PathSeg::Close,
    ])
}

fn circle_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let cx = node.attribute("cx").and_then(parse_number).unwrap_or(0.0);
    let cy = node.attribute("cy").and_then(parse_number).unwrap_or(0.0);
    let r = parse_number(node.attribute("r")?)?;
    if r <= 0.0 {
        return None;
    }
    Some(ellipse_segs(cx, cy, r, r))
}

fn ellipse_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let cx = node.attribute("cx").and_then(parse_number).unwrap_or(0.0);
    let cy = node.attribute("cy").and_then(parse_number).unwrap_or(0.0);
    let rx = parse_number(node.attribute("rx")?)?;
    let ry = parse_number(node.attribute("ry")?)?;
    if rx <= 0.0 || ry <= 0.0 {
        return None;
    }
    Some(ellipse_segs(cx, cy, rx, ry))
}

fn ellipse_segs(cx: f32, cy: f32, rx: f32, ry: f32) -> Vec<PathSeg> {
    // Four cubic Beziers.
    let k = 0.552_284_8_f32;
    let ox = rx * k;
    let oy = ry * k;
    vec![
        PathSeg::MoveTo(cx + rx, cy),
        PathSeg::CurveTo(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry),
        PathSeg::CurveTo(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy),
        PathSeg::CurveTo(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry),
        PathSeg::CurveTo(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy),
        PathSeg::Close,
    ]
}

fn line_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let coord = |name: &str| node.attribute(name).and_then(parse_number).unwrap_or(0.0);
    Some(vec![
        PathSeg::MoveTo(coord("x1"), coord("y1")),
        PathSeg::LineTo(coord("x2"), coord("y2")),
    ])
}

fn poly_points_to_path(node: roxmltree::Node<'_, '_>, close: bool) -> Option<Vec<PathSeg>> {
    let points = parse_points(node.attribute("points")?);
    let (first, rest) = points.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut segs = vec![PathSeg::MoveTo(first.0, first.1)];
    segs.extend(rest.iter().map(|&(x, y)| PathSeg::LineTo(x, y)));
    if close {
        segs.push(PathSeg::Close);
    }
    Some(segs)
}

fn parse_points(input: &str) -> Vec<(f32, f32)> {
    let nums: Vec<f32> = input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect();
    nums.chunks_exact(2).map(|p| (p[0], p[1])).collect()
}

pub(crate) fn parse_path_data(d: &str) -> Vec<PathSeg> {
    // Quadratics and arcs are normalized to cubics.
    let mut segs = Vec::new();
    let mut p = PathParser::new(d);
    let mut cmd = ' ';
    let mut cur_x = 0.0;
    let mut cur_y = 0.0;
    let mut start_x = 0.0;
    let mut start_y = 0.0;
    let mut last_cubic_ctrl2: Option<(f32, f32)> = None;
    let mut last_quad_ctrl: Option<(f32, f32)> = None;

    loop {
        let before = p.i;
        let Some(c) = p.next_command_or_number(&mut cmd) else {
            break;
        };
        match c {
            'M' | 'm' => {
                let rel = c == 'm';
                if let Some((x, y)) = p.next_pair() {
                    let (x, y) = if rel { (cur_x + x, cur_y + y) } else { (x, y) };
                    segs.push(PathSeg::MoveTo(x, y));
                    cur_x = x;
                    cur_y = y;
                    start_x = x;
                    start_y = y;
                    last_cubic_ctrl2 = None;
                    last_quad_ctrl = None;

                    // Implicit subsequent pairs are LineTo.
                    while let Some((x2, y2)) = p.next_pair() {
                        let (x2, y2) = if rel {
                            (cur_x + x2, cur_y + y2)
                        } else {
                            (x2, y2)
                        };
                        segs.push(PathSeg::LineTo(x2, y2));
                        cur_x = x2;
                        cur_y = y2;
                    }
                }
            }
            'L' | 'l' => {
                let rel = c == 'l';
                while let Some((x, y)) = p.next_pair() {
                    let (x, y) = if rel { (cur_x + x, cur_y + y) } else { (x, y) };
                    segs.push(PathSeg::LineTo(x, y));
                    cur_x = x;
                    cur_y = y;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'H' | 'h' => {
                let rel = c == 'h';
                while let Some(x) = p.next_number() {
                    let x = if rel { cur_x + x } else { x };
                    segs.push(PathSeg::LineTo(x, cur_y));
                    cur_x = x;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'V' | 'v' => {
                let rel = c == 'v';
                while let Some(y) = p.next_number() {
                    let y = if rel { cur_y + y } else { y };
                    segs.push(PathSeg::LineTo(cur_x, y));
                    cur_y = y;
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'C' | 'c' => {
                let rel = c == 'c';
                while let Some([x1, y1, x2, y2, x, y]) = p.next_numbers::<6>() {
                    let (x1, y1, x2, y2, x, y) = if rel {
                        (
                            cur_x + x1,
                            cur_y + y1,
                            cur_x + x2,
                            cur_y + y2,
                            cur_x + x,
                            cur_y + y,
                        )
                    } else {
                        (x1, y1, x2, y2, x, y)
                    };
                    segs.push(PathSeg::CurveTo(x1, y1, x2, y2, x, y));
                    cur_x = x;
                    cur_y = y;
                    last_cubic_ctrl2 = Some((x2, y2));
                    last_quad_ctrl = None;
                }
            }
            'S' | 's' => {
                let rel = c == 's';
                while let Some([x2, y2, x, y]) = p.next_numbers::<4>() {
                    let (x2, y2, x, y) = if rel {
                        (cur_x + x2, cur_y + y2, cur_x + x, cur_y + y)
                    } else {
                        (x2, y2, x, y)
                    };
                    let (x1, y1) = match last_cubic_ctrl2 {
                        Some((px2, py2)) => (2.0 * cur_x - px2, 2.0 * cur_y - py2),
                        None => (cur_x, cur_y),
                    };
                    segs.push(PathSeg::CurveTo(x1, y1, x2, y2, x, y));
                    cur_x = x;
                    cur_y = y;
                    last_cubic_ctrl2 = Some((x2, y2));
                    last_quad_ctrl = None;
                }
            }
            'Q' | 'q' => {
                let rel = c == 'q';
                while let Some([x1, y1, x, y]) = p.next_numbers::<4>() {
                    let (x1, y1, x, y) = if rel {
                        (cur_x + x1, cur_y + y1, cur_x + x, cur_y + y)
                    } else {
                        (x1, y1, x, y)
                    };
                    let (c1x, c1y, c2x, c2y) = quad_to_cubic(cur_x, cur_y, x1, y1, x, y);
                    segs.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, x, y));
                    cur_x = x;
                    cur_y = y;
                    last_quad_ctrl = Some((x1, y1));
                    last_cubic_ctrl2 = Some((c2x, c2y));
                }
            }
            'T' | 't' => {
                let rel = c == 't';
                while let Some((x, y)) = p.next_pair() {
                    let (x, y) = if rel { (cur_x + x, cur_y + y) } else { (x, y) };
                    let (qx, qy) = match last_quad_ctrl {
                        Some((px1, py1)) => (2.0 * cur_x - px1, 2.0 * cur_y - py1),
                        None => (cur_x, cur_y),
                    };
                    let (c1x, c1y, c2x, c2y) = quad_to_cubic(cur_x, cur_y, qx, qy, x, y);
                    segs.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, x, y));
                    cur_x = x;
                    cur_y = y;
                    last_quad_ctrl = Some((qx, qy));
                    last_cubic_ctrl2 = Some((c2x, c2y));
                }
            }
            'A' | 'a' => {
                let rel = c == 'a';
                while let Some((rx, ry, rot, large, sweep, x, y)) = p.next_arc() {
                    let (x, y) = if rel { (cur_x + x, cur_y + y) } else { (x, y) };
                    let curves = arc_to_cubics(cur_x, cur_y, rx, ry, rot, large, sweep, x, y);
                    last_cubic_ctrl2 = curves.iter().rev().find_map(|seg| match *seg {
                        PathSeg::CurveTo(_, _, x2, y2, _, _) => Some((x2, y2)),
                        _ => None,
                    });
                    segs.extend(curves);
                    cur_x = x;
                    cur_y = y;
                    last_quad_ctrl = None;
                }
            }
            'Z' | 'z' => {
                segs.push(PathSeg::Close);
                cur_x = start_x;
                cur_y = start_y;
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            _ => {}
        }
        // Malformed data: nothing consumed means nothing more can be.
        if p.i == before {
            break;
        }
    }

    segs
}

fn quad_to_cubic(x0: f32, y0: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> (f32, f32, f32, f32) {
    let c1x = x0 + (2.0 / 3.0) * (x1 - x0);
    let c1y = y0 + (2.0 / 3.0) * (y1 - y0);
    let c2x = x2 + (2.0 / 3.0) * (x1 - x2);
    let c2y = y2 + (2.0 / 3.0) * (y1 - y2);
    (c1x, c1y, c2x, c2y)
}

#[allow(clippy::too_many_arguments)]
fn arc_to_cubics(
    x0: f32,
    y0: f32,
    rx_in: f32,
    ry_in: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    x1: f32,
    y1: f32,
) -> Vec<PathSeg> {
    // Center parameterization from the SVG 1.1 implementation notes.
    use std::f32::consts::PI;

    let mut rx = rx_in.abs();
    let mut ry = ry_in.abs();
    if rx == 0.0 || ry == 0.0 || (x0 == x1 && y0 == y1) {
        return vec![PathSeg::LineTo(x1, y1)];
    }

    let phi = x_axis_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (x0 - x1) / 2.0;
    let dy2 = (y0 - y1) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    let x1p2 = x1p * x1p;
    let y1p2 = y1p * y1p;
    let lambda = x1p2 / (rx * rx) + y1p2 / (ry * ry);
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
    let den = rx2 * y1p2 + ry2 * x1p2;
    let coef = if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        sign * libm::sqrtf((num / den).max(0.0))
    } else {
        0.0
    };
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (x0 + x1) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y0 + y1) / 2.0;

    let angle = |ux: f32, uy: f32, vx: f32, vy: f32| -> f32 {
        libm::atan2f(ux * vy - uy * vx, ux * vx + uy * vy)
    };

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let mut theta = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    // At most 90 degrees per cubic.
    let count = libm::ceilf(dtheta.abs() / (PI / 2.0)).max(1.0) as i32;
    let delta = dtheta / count as f32;
    let k = (4.0 / 3.0) * libm::tanf(delta / 4.0);
    let map = |x: f32, y: f32| -> (f32, f32) {
        let x = rx * x;
        let y = ry * y;
        (cx + cos_phi * x - sin_phi * y, cy + sin_phi * x + cos_phi * y)
    };

    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (s1, c1) = (libm::sinf(theta), libm::cosf(theta));
        let (s2, c2) = (libm::sinf(theta + delta), libm::cosf(theta + delta));
        let (c1x, c1y) = map(c1 - k * s1, s1 + k * c1);
        let (c2x, c2y) = map(c2 + k * s2, s2 - k * c2);
        let (ex, ey) = map(c2, s2);
        out.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, ex, ey));
        theta += delta;
    }
    out
}

struct PathParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.i < self.bytes.len()
            && matches!(self.bytes[self.i], b' ' | b'\n' | b'\r' | b'\t' | b',')
        {
            self.i += 1;
        }
    }

    fn next_command_or_number(&mut self, current: &mut char) -> Option<char> {
        self.skip_ws();
        let b = *self.bytes.get(self.i)?;
        let c = b as char;
        if c.is_ascii_alphabetic() {
            *current = c;
            self.i += 1;
            return Some(c);
        }
        // No new command; reuse the previous one. Z takes no arguments.
        match *current {
            'Z' | 'z' | ' ' => None,
            c => Some(c),
        }
    }

    fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        let start = self.i;
        let mut has = false;

        if self.i < self.bytes.len() && matches!(self.bytes[self.i], b'+' | b'-') {
            self.i += 1;
        }
        while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
            self.i += 1;
            has = true;
        }
        if self.i < self.bytes.len() && self.bytes[self.i] == b'.' {
            self.i += 1;
            while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
                has = true;
            }
        }
        if has && self.i < self.bytes.len() && matches!(self.bytes[self.i], b'e' | b'E') {
            self.i += 1;
            if self.i < self.bytes.len() && matches!(self.bytes[self.i], b'+' | b'-') {
                self.i += 1;
            }
            while self.i < self.bytes.len() && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
            }
        }

        if !has {
            self.i = start;
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.i])
            .ok()?
            .parse::<f32>()
            .ok()
    }

    fn next_numbers<const N: usize>(&mut self) -> Option<[f32; N]> {
        let start = self.i;
        let mut out = [0.0f32; N];
        for slot in &mut out {
            let Some(v) = self.next_number() else {
                self.i = start;
                return None;
            };
            *slot = v;
        }
        Some(out)
    }

    fn next_pair(&mut self) -> Option<(f32, f32)> {
        self.next_numbers::<2>().map(|[x, y]| (x, y))
    }

    fn next_arc_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.bytes.get(self.i)? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    #[allow(clippy::type_complexity)]
    fn next_arc(&mut self) -> Option<(f32, f32, f32, bool, bool, f32, f32)> {
        let start = self.i;
        let parsed = (|| {
            let [rx, ry, rot] = self.next_numbers::<3>()?;
            let large = self.next_arc_flag()?;
            let sweep = self.next_arc_flag()?;
            let (x, y) = self.next_pair()?;
            Some((rx, ry, rot, large, sweep, x, y))
        })();
        if parsed.is_none() {
            self.i = start;
        }
        parsed
    }
}
