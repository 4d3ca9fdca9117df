// 1D-barcode detection in embedded markup.
//
// Editors export barcodes as a group of thin, equally tall rectangles. Such a
// group is pulled out of the background and redrawn as plain filled quads so
// the bars stay crisp regardless of how the background is rendered.

use crate::canvas::Canvas;
use crate::geometry::{Matrix, cumulative_matrix};
use crate::placement::ContentFrame;
use crate::svg::{PathSeg, emit_path, parse_color, parse_number, presentation_value};
use crate::types::Color;

const MIN_BARS: usize = 12;
const HEIGHT_TOLERANCE: f32 = 0.95;
const MIN_ASPECT: f32 = 2.0;
const MAX_WIDTH_FACTOR: f32 = 4.0;

pub(crate) type Quad = [(f32, f32); 4];

#[derive(Debug, Clone, Copy)]
struct RectBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

fn rect_box(node: roxmltree::Node<'_, '_>) -> Option<RectBox> {
    let width = node.attribute("width").and_then(parse_number)?;
    let height = node.attribute("height").and_then(parse_number)?;
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    Some(RectBox {
        x: node.attribute("x").and_then(parse_number).unwrap_or(0.0),
        y: node.attribute("y").and_then(parse_number).unwrap_or(0.0),
        width,
        height,
    })
}

fn descendant_rects<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .filter(|n| n.is_element() && n.tag_name().name() == "rect")
}

fn is_group_like(node: roxmltree::Node<'_, '_>) -> bool {
    if !node.is_element() {
        return false;
    }
    match node.tag_name().name() {
        "g" => true,
        // Nested viewports only; the document root is never a barcode.
        "svg" => node.parent_element().is_some(),
        _ => false,
    }
}

pub(crate) fn is_likely_barcode_group(node: roxmltree::Node<'_, '_>) -> bool {
    if !is_group_like(node) {
        return false;
    }

    let mut boxes = Vec::new();
    for rect in descendant_rects(node) {
        let Some(b) = rect_box(rect) else {
            return false;
        };
        boxes.push(b);
    }
    if boxes.len() < MIN_BARS {
        return false;
    }

    let max_height = boxes.iter().map(|b| b.height).fold(0.0, f32::max);
    if boxes.iter().any(|b| b.height < max_height * HEIGHT_TOLERANCE) {
        return false;
    }
    let avg_width = boxes.iter().map(|b| b.width).sum::<f32>() / boxes.len() as f32;
    avg_width > 0.0 && max_height / avg_width >= MIN_ASPECT
}

/// Outermost barcode-like groups under `root`, in document order.
pub(crate) fn collect_barcode_groups<'a, 'input>(
    root: roxmltree::Node<'a, 'input>,
) -> Vec<roxmltree::Node<'a, 'input>> {
    let mut out = Vec::new();
    collect_into(root, &mut out);
    out
}

fn collect_into<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    out: &mut Vec<roxmltree::Node<'a, 'input>>,
) {
    for child in node.children().filter(|n| n.is_element()) {
        if is_likely_barcode_group(child) {
            out.push(child);
        } else {
            collect_into(child, out);
        }
    }
}

fn is_white_filled(node: roxmltree::Node<'_, '_>) -> bool {
    presentation_value(node, "fill")
        .and_then(|v| parse_color(&v))
        .is_some_and(|c| c.is_white())
}

/// Bars of one group as page-space quads, after dropping white rects and rects
/// much wider than the narrowest bar.
pub(crate) fn reconstruct_bars(group: roxmltree::Node<'_, '_>, frame: Matrix) -> Vec<Quad> {
    let bars = descendant_rects(group)
        .filter(|n| !is_white_filled(*n))
        .filter_map(|n| rect_box(n).map(|b| (n, b)))
        .collect::<Vec<_>>();
    let Some(min_width) = bars.iter().map(|(_, b)| b.width).reduce(f32::min) else {
        return Vec::new();
    };

    bars.into_iter()
        .filter(|(_, b)| b.width <= min_width * MAX_WIDTH_FACTOR)
        .map(|(node, b)| {
            let m = frame.mul(cumulative_matrix(node));
            [
                m.apply(b.x, b.y),
                m.apply(b.x + b.width, b.y),
                m.apply(b.x + b.width, b.y + b.height),
                m.apply(b.x, b.y + b.height),
            ]
        })
        .filter(|q| q.iter().all(|(x, y)| x.is_finite() && y.is_finite()))
        .collect()
}

/// Fills the bars of every group in one operation. Returns the quad count.
pub(crate) fn draw_barcodes(
    groups: &[roxmltree::Node<'_, '_>],
    frame: &ContentFrame,
    canvas: &mut Canvas,
) -> usize {
    let quads = groups
        .iter()
        .flat_map(|g| reconstruct_bars(*g, frame.matrix))
        .collect::<Vec<_>>();
    if quads.is_empty() {
        return 0;
    }

    let mut segs = Vec::with_capacity(quads.len() * 5);
    for q in &quads {
        segs.push(PathSeg::MoveTo(q[0].0, q[0].1));
        segs.extend(q[1..].iter().map(|&(x, y)| PathSeg::LineTo(x, y)));
        segs.push(PathSeg::Close);
    }
    canvas.save_state();
    canvas.set_fill_color(Color::BLACK);
    emit_path(canvas, &segs);
    canvas.fill();
    canvas.restore_state();
    quads.len()
}
