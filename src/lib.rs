mod barcode;
mod base14;
mod canvas;
mod debug;
mod document;
mod error;
mod font;
mod geometry;
mod glyphs;
mod pdf;
mod pdfinspect;
mod placement;
mod svg;
mod text;
mod types;

pub use canvas::{Canvas, Command, Page};
use debug::DebugLogger;
pub use document::{ExportRequest, PlacementSpec, RenderSummary, SheetSpec, sanitize_file_name};
use document::{AssemblerConfig, assemble};
pub use error::SheetPressError;
pub use font::{DEFAULT_FONT_ID, FontDefinition, catalog, resolve_font_id};
pub use geometry::{Matrix, parse_transform};
pub use glyphs::{FontRun, FontStore, GlyphCoverage, split_into_font_runs};
pub use pdfinspect::{
    PdfInspectError, PdfInspectErrorCode, PdfInspectReport, PdfInspectWarning, inspect_pdf_bytes,
    inspect_pdf_path,
};
pub use placement::{PlacementOutcome, Tier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
pub use types::{Color, Pt, Rect, Size};

const DEFAULT_OUTLINE_STROKE_WIDTH: f32 = 1.0;

/// Export engine. Cheap to share: one instance serves concurrent requests,
/// each rendered on the calling thread.
#[derive(Debug, Clone)]
pub struct SheetPress {
    fonts: Arc<FontStore>,
    debug: Option<Arc<DebugLogger>>,
    request_budget: Option<Duration>,
    compress_streams: bool,
    tier3_stroke_width: f32,
}

#[derive(Debug, Clone)]
pub struct SheetPressBuilder {
    font_dir: Option<PathBuf>,
    debug_path: Option<PathBuf>,
    request_budget: Option<Duration>,
    compress_streams: bool,
    tier3_stroke_width: f32,
}

impl SheetPress {
    pub fn builder() -> SheetPressBuilder {
        SheetPressBuilder::new()
    }

    pub fn fonts(&self) -> &FontStore {
        &self.fonts
    }

    /// Streams the PDF for `request` into `out`. Pages reach `out` as soon as
    /// their sheet is drawn; on error the stream is left without a trailer.
    pub fn render_to_writer<W: std::io::Write>(
        &self,
        request: &ExportRequest,
        out: &mut W,
    ) -> Result<RenderSummary, SheetPressError> {
        let config = AssemblerConfig {
            fonts: &self.fonts,
            debug: self.debug.as_ref(),
            budget: self.request_budget,
            compress_streams: self.compress_streams,
            outline_stroke_width: self.tier3_stroke_width,
        };
        let result = assemble(request, &config, out);
        if let Err(err) = &result {
            log::warn!("export failed: {err}");
        }
        self.emit_debug_summary("render");
        result
    }

    pub fn render_to_buffer(&self, request: &ExportRequest) -> Result<Vec<u8>, SheetPressError> {
        let mut out = Vec::new();
        self.render_to_writer(request, &mut out)?;
        Ok(out)
    }

    /// Parses a JSON request body and renders it.
    pub fn render_json_to_writer<W: std::io::Write>(
        &self,
        body: &[u8],
        out: &mut W,
    ) -> Result<RenderSummary, SheetPressError> {
        let request = ExportRequest::from_json(body)?;
        self.render_to_writer(&request, out)
    }

    pub fn render_to_file(
        &self,
        request: &ExportRequest,
        path: impl AsRef<std::path::Path>,
    ) -> Result<RenderSummary, SheetPressError> {
        request.validate()?;
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);
        let summary = self.render_to_writer(request, &mut out)?;
        std::io::Write::flush(&mut out)?;
        Ok(summary)
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
    }
}

impl Default for SheetPressBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetPressBuilder {
    pub fn new() -> Self {
        Self {
            font_dir: None,
            debug_path: None,
            request_budget: None,
            compress_streams: true,
            tier3_stroke_width: DEFAULT_OUTLINE_STROKE_WIDTH,
        }
    }

    /// Directory holding the catalog's font files. Without one every
    /// outline font is unavailable and text falls back to built-in metrics.
    pub fn font_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.font_dir = Some(dir.into());
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn request_budget(mut self, budget: Duration) -> Self {
        self.request_budget = Some(budget);
        self
    }

    pub fn compress_streams(mut self, enabled: bool) -> Self {
        self.compress_streams = enabled;
        self
    }

    /// Stroke width, in points, of the bare outline drawn when nothing else
    /// could be rendered for a placement.
    pub fn tier3_stroke_width(mut self, width: f32) -> Self {
        self.tier3_stroke_width = width;
        self
    }

    pub fn build(self) -> Result<SheetPress, SheetPressError> {
        if self.request_budget.is_some_and(|b| b.is_zero()) {
            return Err(SheetPressError::InvalidConfiguration(
                "request_budget must be greater than zero".to_string(),
            ));
        }
        if !self.tier3_stroke_width.is_finite() || self.tier3_stroke_width <= 0.0 {
            return Err(SheetPressError::InvalidConfiguration(
                "tier3_stroke_width must be > 0".to_string(),
            ));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        Ok(SheetPress {
            fonts: Arc::new(FontStore::new(self.font_dir)),
            debug,
            request_budget: self.request_budget,
            compress_streams: self.compress_streams,
            tier3_stroke_width: self.tier3_stroke_width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_ONE: &str = r#"{"sheets":[{"width":210,"height":297,"placements":[{"x":10,"y":10,"width":100,"height":50}]}],"label":"run"}"#;

    #[test]
    fn builder_rejects_invalid_configuration() {
        let err = SheetPress::builder()
            .request_budget(Duration::ZERO)
            .build()
            .expect_err("zero budget");
        assert!(matches!(err, SheetPressError::InvalidConfiguration(_)));

        let err = SheetPress::builder()
            .tier3_stroke_width(0.0)
            .build()
            .expect_err("zero stroke");
        assert!(matches!(err, SheetPressError::InvalidConfiguration(_)));
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SheetPress>();
    }

    #[test]
    fn renders_json_request_end_to_end() {
        let engine = SheetPress::builder().build().expect("engine");
        let mut out = Vec::new();
        let summary = engine
            .render_json_to_writer(SCENARIO_ONE.as_bytes(), &mut out)
            .expect("render");
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.placements_outline, 1);
        assert_eq!(summary.bytes_written, out.len());

        let report = inspect_pdf_bytes(&out).expect("inspect");
        assert!(report.page_matches(0, Size::from_mm(210.0, 297.0), 0.01));
    }

    #[test]
    fn empty_request_leaves_no_file_behind() {
        let engine = SheetPress::builder().build().expect("engine");
        let path = std::env::temp_dir().join(format!("sheetpress_empty_{}.pdf", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let request = ExportRequest::from_json(br#"{"sheets":[]}"#).expect("request");
        let err = engine.render_to_file(&request, &path).expect_err("no sheets");
        assert!(matches!(err, SheetPressError::InvalidRequest(_)));
        assert!(!path.exists());
    }

    #[test]
    fn malformed_body_is_a_json_error() {
        let engine = SheetPress::builder().build().expect("engine");
        let mut out = Vec::new();
        let err = engine
            .render_json_to_writer(b"{sheets:", &mut out)
            .expect_err("bad json");
        assert!(matches!(err, SheetPressError::Json(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn debug_log_records_outcomes_and_summary() {
        let path = std::env::temp_dir().join(format!("sheetpress_debug_{}.jsonl", std::process::id()));
        let engine = SheetPress::builder().debug_log(&path).build().expect("engine");
        engine
            .render_to_buffer(&ExportRequest::from_json(SCENARIO_ONE.as_bytes()).expect("request"))
            .expect("render");

        let log = std::fs::read_to_string(&path).expect("debug log");
        let records = log
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).expect("json line"))
            .collect::<Vec<_>>();
        assert!(records.iter().any(|r| r["type"] == "placement.outcome" && r["detail"] == "outline"));
        let summary = records.last().expect("summary");
        assert_eq!(summary["type"], "debug.summary");
        assert_eq!(summary["counts"]["pdf.page"], 1);
        let _ = std::fs::remove_file(&path);
    }
}
