use crate::canvas::Canvas;
use crate::debug::DebugLogger;
use crate::error::SheetPressError;
use crate::glyphs::FontStore;
use crate::pdf::{PdfOptions, PdfStreamWriter};
use crate::placement::{PlacementJob, PlacementOutcome, PlacementRenderer, Tier};
use crate::types::{Pt, Rect, Size};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One export request: ordered sheets plus naming hints for the output file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(default)]
    pub sheets: Vec<SheetSpec>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub timestamp: Option<String>,
}

/// A physical page. Dimensions in millimetres.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSpec {
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<f32>,
    #[serde(default)]
    pub placements: Vec<PlacementSpec>,
}

/// A positioned box on a sheet. Position and size in millimetres, source
/// dimensions in markup user units.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    #[serde(default, deserialize_with = "lenient_number")]
    pub x: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub y: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<f32>,
    #[serde(default)]
    pub svg_markup: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub source_width: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub source_height: Option<f32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
}

impl ExportRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, SheetPressError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn file_name(&self) -> String {
        sanitize_file_name(self.label.as_deref(), self.timestamp.as_deref())
    }

    /// Rejects requests that cannot produce a single page.
    pub fn validate(&self) -> Result<(), SheetPressError> {
        if self.sheets.is_empty() {
            return Err(SheetPressError::InvalidRequest(
                "request contains no sheets".to_string(),
            ));
        }
        Ok(())
    }
}

// Numbers or numeric strings; anything else is treated as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.map(|n| n as f32).filter(|n| n.is_finite()))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Attachment name for an export: `<label>-<timestamp>.pdf` with every byte
/// outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn sanitize_file_name(label: Option<&str>, timestamp: Option<&str>) -> String {
    let base = label.map(str::trim).filter(|l| !l.is_empty()).unwrap_or("export");
    let mut raw = base.to_string();
    if let Some(ts) = timestamp.map(str::trim).filter(|t| !t.is_empty()) {
        raw.push('-');
        raw.push_str(ts);
    }
    let mut name = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    name.push_str(".pdf");
    name
}

/// Per-request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    pub pages: usize,
    pub sheets_skipped: usize,
    pub placements_full: usize,
    pub placements_placeholder: usize,
    pub placements_outline: usize,
    pub placements_skipped: usize,
    pub bytes_written: usize,
}

impl RenderSummary {
    fn record(&mut self, outcome: &PlacementOutcome) {
        match outcome {
            PlacementOutcome::Rendered(Tier::Full) => self.placements_full += 1,
            PlacementOutcome::Rendered(Tier::Placeholder) => self.placements_placeholder += 1,
            PlacementOutcome::Rendered(Tier::Outline) => self.placements_outline += 1,
            PlacementOutcome::Skipped(_) => self.placements_skipped += 1,
        }
    }
}

pub(crate) struct AssemblerConfig<'a> {
    pub fonts: &'a FontStore,
    pub debug: Option<&'a Arc<DebugLogger>>,
    pub budget: Option<Duration>,
    pub compress_streams: bool,
    pub outline_stroke_width: f32,
}

/// Renders every valid sheet as one page and streams the document to `out`.
pub(crate) fn assemble<W: Write>(
    request: &ExportRequest,
    config: &AssemblerConfig<'_>,
    out: &mut W,
) -> Result<RenderSummary, SheetPressError> {
    let deadline = config.budget.map(|b| Instant::now() + b);
    assemble_until(request, config, deadline, out)
}

pub(crate) fn assemble_until<W: Write>(
    request: &ExportRequest,
    config: &AssemblerConfig<'_>,
    deadline: Option<Instant>,
    out: &mut W,
) -> Result<RenderSummary, SheetPressError> {
    request.validate()?;

    let options = PdfOptions {
        compress_streams: config.compress_streams,
    };
    let mut writer = PdfStreamWriter::new(out, options, config.debug.cloned())?;
    let renderer = PlacementRenderer {
        fonts: config.fonts,
        debug: config.debug.map(|d| d.as_ref()),
        outline_stroke_width: config.outline_stroke_width,
    };
    let mut summary = RenderSummary::default();
    let check_budget = |pages_written: usize| match deadline {
        Some(deadline) if Instant::now() >= deadline => {
            let budget_ms = config.budget.map(|b| b.as_millis()).unwrap_or(0);
            log::warn!("request budget of {budget_ms} ms exceeded after {pages_written} page(s)");
            Err(SheetPressError::BudgetExceeded {
                budget_ms,
                pages_written,
            })
        }
        _ => Ok(()),
    };

    for (index, sheet) in request.sheets.iter().enumerate() {
        check_budget(writer.page_count())?;
        let Some(size) = sheet_size(sheet) else {
            log::warn!(
                "sheet {index}: invalid size {:?} x {:?} mm; skipped",
                sheet.width,
                sheet.height
            );
            summary.sheets_skipped += 1;
            continue;
        };

        let mut canvas = Canvas::new(size);
        for placement in &sheet.placements {
            check_budget(writer.page_count())?;
            let outcome = match placement_job(placement) {
                Some(job) => renderer.render(&job, &mut canvas),
                None => {
                    let reason = "non-finite or non-positive geometry".to_string();
                    log::warn!(
                        "sheet {index}: placement {}: {reason}; skipped",
                        placement.id.as_deref().unwrap_or("-")
                    );
                    PlacementOutcome::Skipped(reason)
                }
            };
            if let Some(logger) = config.debug {
                let (status, detail) = match &outcome {
                    PlacementOutcome::Rendered(tier) => ("rendered", tier.as_str().to_string()),
                    PlacementOutcome::Skipped(reason) => ("skipped", reason.clone()),
                };
                logger.event(
                    "placement.outcome",
                    json!({
                        "sheet": index,
                        "id": placement.id,
                        "status": status,
                        "detail": detail,
                    }),
                );
            }
            summary.record(&outcome);
        }
        writer.add_page(&canvas.into_page())?;
    }

    summary.pages = writer.page_count();
    summary.bytes_written = writer.finish()?;
    log::info!(
        "rendered {} page(s): {} full, {} placeholder, {} outline, {} skipped placement(s), {} bytes",
        summary.pages,
        summary.placements_full,
        summary.placements_placeholder,
        summary.placements_outline,
        summary.placements_skipped,
        summary.bytes_written
    );
    Ok(summary)
}

fn positive_mm(value: Option<f32>) -> Option<Pt> {
    value.filter(|v| v.is_finite() && *v > 0.0).map(Pt::from_mm)
}

fn sheet_size(sheet: &SheetSpec) -> Option<Size> {
    Some(Size {
        width: positive_mm(sheet.width)?,
        height: positive_mm(sheet.height)?,
    })
}

fn placement_job(placement: &PlacementSpec) -> Option<PlacementJob<'_>> {
    let x = Pt::from_mm(placement.x.filter(|v| v.is_finite())?);
    let y = Pt::from_mm(placement.y.filter(|v| v.is_finite())?);
    let width = positive_mm(placement.width)?;
    let height = positive_mm(placement.height)?;
    let source_size = match (placement.source_width, placement.source_height) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Some((w, h)),
        _ => None,
    };
    Some(PlacementJob {
        id: placement.id.as_deref(),
        bounds: Rect::new(x.to_f32(), y.to_f32(), width.to_f32(), height.to_f32()),
        markup: placement.svg_markup.as_deref(),
        source_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Content;
    use lopdf::{Document, Object};

    const MM: f32 = 72.0 / 25.4;

    fn config(fonts: &FontStore) -> AssemblerConfig<'_> {
        AssemblerConfig {
            fonts,
            debug: None,
            budget: None,
            compress_streams: false,
            outline_stroke_width: 1.0,
        }
    }

    fn render(request: &ExportRequest) -> (RenderSummary, Document) {
        let fonts = FontStore::new(None);
        let mut out = Vec::new();
        let summary = assemble(request, &config(&fonts), &mut out).expect("render");
        let doc = Document::load_mem(&out).expect("valid pdf");
        (summary, doc)
    }

    fn request(json: &str) -> ExportRequest {
        ExportRequest::from_json(json.as_bytes()).expect("request")
    }

    fn media_box(doc: &Document, page: lopdf::ObjectId) -> Vec<f32> {
        doc.get_dictionary(page)
            .expect("page dict")
            .get(b"MediaBox")
            .and_then(Object::as_array)
            .expect("media box")
            .iter()
            .map(|o| o.as_float().expect("number"))
            .collect()
    }

    fn operations(doc: &Document, page: lopdf::ObjectId) -> Vec<lopdf::content::Operation> {
        let raw = doc.get_page_content(page).expect("content");
        Content::decode(&raw).expect("decode").operations
    }

    #[test]
    fn lenient_fields_accept_numeric_strings() {
        let req = request(
            r#"{"sheets":[{"width":"210","height":297,"placements":[{"x":"1.5","y":true,"width":10,"height":"abc","id":7}]}],"label":"Batch A"}"#,
        );
        let sheet = &req.sheets[0];
        assert_eq!(sheet.width, Some(210.0));
        let p = &sheet.placements[0];
        assert_eq!(p.x, Some(1.5));
        assert_eq!(p.y, None);
        assert_eq!(p.height, None);
        assert_eq!(p.id.as_deref(), Some("7"));
        assert_eq!(req.file_name(), "Batch_A.pdf");
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name(None, None), "export.pdf");
        assert_eq!(
            sanitize_file_name(Some("Lot/42 ä"), Some("2024-05-01T10:00")),
            "Lot_42__-2024-05-01T10_00.pdf"
        );
        assert_eq!(sanitize_file_name(Some("  "), Some("x")), "export-x.pdf");
    }

    #[test]
    fn empty_request_is_rejected_before_writing() {
        let fonts = FontStore::new(None);
        let mut out = Vec::new();
        let err = assemble(&request(r#"{"sheets":[]}"#), &config(&fonts), &mut out)
            .expect_err("no sheets");
        assert!(matches!(err, SheetPressError::InvalidRequest(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn placement_without_markup_draws_one_outline() {
        let (summary, doc) = render(&request(
            r#"{"sheets":[{"width":210,"height":297,"placements":[{"x":10,"y":10,"width":100,"height":50}]}]}"#,
        ));
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.placements_outline, 1);

        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page = pages[&1];
        let mb = media_box(&doc, page);
        assert!((mb[2] - 210.0 * MM).abs() < 0.01);
        assert!((mb[3] - 297.0 * MM).abs() < 0.01);

        let rects = operations(&doc, page)
            .into_iter()
            .filter(|op| op.operator == "re")
            .count();
        assert_eq!(rects, 1);
    }

    #[test]
    fn outline_box_matches_millimetre_conversion() {
        let (_, doc) = render(&request(
            r#"{"sheets":[{"width":100,"height":100,"placements":[{"x":0,"y":0,"width":50,"height":30}]}]}"#,
        ));
        let page = doc.get_pages()[&1];
        let ops = operations(&doc, page);
        let re = ops.iter().find(|op| op.operator == "re").expect("rect");
        let vals = re
            .operands
            .iter()
            .map(|o| o.as_float().expect("number"))
            .collect::<Vec<_>>();
        assert!(vals[0].abs() < 0.01);
        assert!((vals[1] - (100.0 - 30.0) * MM).abs() < 0.01);
        assert!((vals[2] - 50.0 * MM).abs() < 0.01);
        assert!((vals[3] - 30.0 * MM).abs() < 0.01);
    }

    #[test]
    fn invalid_sheets_and_placements_are_skipped() {
        let (summary, doc) = render(&request(
            r#"{"sheets":[
                {"width":0,"height":297,"placements":[]},
                {"width":100,"height":"x","placements":[]},
                {"width":148,"height":105,"placements":[
                    {"x":0,"y":0,"width":-5,"height":10},
                    {"x":"nan","y":0,"width":5,"height":10},
                    {"x":0,"y":0,"width":5,"height":10,"svgMarkup":"<svg"}
                ]}
            ]}"#,
        ));
        assert_eq!(summary.sheets_skipped, 2);
        assert_eq!(summary.placements_skipped, 2);
        assert_eq!(summary.placements_placeholder, 1);
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn sheets_keep_their_own_page_size() {
        let (_, doc) = render(&request(
            r#"{"sheets":[{"width":210,"height":297},{"width":100,"height":50}]}"#,
        ));
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let second = media_box(&doc, pages[&2]);
        assert!((second[2] - 100.0 * MM).abs() < 0.01);
        assert!((second[3] - 50.0 * MM).abs() < 0.01);
    }

    #[test]
    fn expired_budget_aborts_without_trailer() {
        let fonts = FontStore::new(None);
        let mut cfg = config(&fonts);
        cfg.budget = Some(Duration::from_millis(5));
        let mut out = Vec::new();
        let err = assemble_until(
            &request(r#"{"sheets":[{"width":10,"height":10}]}"#),
            &cfg,
            Some(Instant::now()),
            &mut out,
        )
        .expect_err("budget");
        assert!(matches!(
            err,
            SheetPressError::BudgetExceeded {
                budget_ms: 5,
                pages_written: 0
            }
        ));
        assert!(out.starts_with(b"%PDF-1.7"));
        assert!(!out.windows(5).any(|w| w == b"%%EOF"));
    }

    #[test]
    fn barcode_and_text_placement_renders_fully() {
        let mut markup = String::from(r#"<svg viewBox="0 0 200 100"><g>"#);
        for i in 0..14 {
            let w = if i % 2 == 0 { 2 } else { 6 };
            markup.push_str(&format!(
                r#"<rect x="{}" y="10" width="{w}" height="{}" fill="black"/>"#,
                10 + i * 10,
                40 + i % 2
            ));
        }
        markup.push_str(r#"</g><text x="10" y="10" font-family="Arial" font-size="16">Hi</text></svg>"#);
        let body = json!({
            "sheets": [{"width": 210, "height": 297, "placements": [
                {"x": 10, "y": 10, "width": 100, "height": 50, "svgMarkup": markup, "id": "tag-1"}
            ]}]
        });
        let (summary, doc) = render(&request(&body.to_string()));
        assert_eq!(summary.placements_full, 1);

        let ops = operations(&doc, doc.get_pages()[&1]);
        assert_eq!(ops.iter().filter(|op| op.operator == "f").count(), 1);
        assert!(ops.iter().any(|op| op.operator == "Tj"));
        assert!(ops.iter().any(|op| op.operator == "Tr"));
    }
}
