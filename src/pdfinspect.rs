use crate::types::Size;
use lopdf::{Document as LoDocument, Object, ObjectId};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfInspectErrorCode {
    PdfParseFailed,
    PdfEncrypted,
    PdfNoPages,
    PdfIoError,
}

impl PdfInspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfInspectErrorCode::PdfParseFailed => "PDF_PARSE_FAILED",
            PdfInspectErrorCode::PdfEncrypted => "PDF_ENCRYPTED",
            PdfInspectErrorCode::PdfNoPages => "PDF_NO_PAGES",
            PdfInspectErrorCode::PdfIoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectError {
    pub code: PdfInspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for PdfInspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PdfInspectError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectWarning {
    pub code: String,
    pub message: String,
}

/// Summary of a rendered (or foreign) PDF, used to verify exports.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    /// MediaBox width/height of every page, in document order.
    pub page_sizes: Vec<(f32, f32)>,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub warnings: Vec<PdfInspectWarning>,
}

impl PdfInspectReport {
    /// True when page `index` measures `size` within `tolerance` points.
    pub fn page_matches(&self, index: usize, size: Size, tolerance: f32) -> bool {
        self.page_sizes.get(index).is_some_and(|(w, h)| {
            (w - size.width.to_f32()).abs() <= tolerance
                && (h - size.height.to_f32()).abs() <= tolerance
        })
    }

    /// Errors for reports that can never be a valid export.
    pub fn require_exportable(&self) -> Result<(), PdfInspectError> {
        if self.encrypted {
            return Err(PdfInspectError {
                code: PdfInspectErrorCode::PdfEncrypted,
                message: "encrypted documents are not produced by the exporter".to_string(),
            });
        }
        if self.page_count == 0 {
            return Err(PdfInspectError {
                code: PdfInspectErrorCode::PdfNoPages,
                message: "document has no pages".to_string(),
            });
        }
        Ok(())
    }
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, PdfInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfParseFailed,
        message: err.to_string(),
    })?;

    let mut warnings = Vec::new();
    let mut page_sizes = Vec::new();
    for (number, page_id) in pdf.get_pages() {
        match media_box(&pdf, page_id) {
            Some(size) => page_sizes.push(size),
            None => {
                warnings.push(PdfInspectWarning {
                    code: "PDF_PAGE_MEDIABOX_MISSING".to_string(),
                    message: format!("page {number} has no usable MediaBox"),
                });
                page_sizes.push((0.0, 0.0));
            }
        }
    }

    Ok(PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: page_sizes.len(),
        page_sizes,
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
        warnings,
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, PdfInspectError> {
    let data = std::fs::read(path).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfIoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

// MediaBox is inheritable; walk up the page tree until one is found.
fn media_box(pdf: &LoDocument, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current = Some(page_id);
    let mut hops = 0;
    while let Some(id) = current {
        let dict = pdf.get_dictionary(id).ok()?;
        if let Ok(boxed) = dict.get(b"MediaBox") {
            let boxed = match boxed {
                Object::Reference(r) => pdf.get_object(*r).ok()?,
                other => other,
            };
            let vals = boxed
                .as_array()
                .ok()?
                .iter()
                .map(|o| o.as_float().ok())
                .collect::<Option<Vec<f32>>>()?;
            if vals.len() != 4 {
                return None;
            }
            return Some(((vals[2] - vals[0]).abs(), (vals[3] - vals[1]).abs()));
        }
        hops += 1;
        if hops > 32 {
            return None;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::pdf::{PdfOptions, PdfStreamWriter};
    use crate::types::Pt;
    use std::io::Write;

    fn export(sizes: &[Size]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = PdfStreamWriter::new(&mut out, PdfOptions::default(), None).expect("writer");
        for size in sizes {
            let mut canvas = Canvas::new(*size);
            canvas.stroke_rect(Pt::from_f32(1.0), Pt::from_f32(1.0), Pt::from_f32(5.0), Pt::from_f32(5.0));
            writer.add_page(&canvas.into_page()).expect("page");
        }
        writer.finish().expect("finish");
        out
    }

    #[test]
    fn reports_each_page_size() {
        let bytes = export(&[Size::a4(), Size::from_mm(100.0, 50.0)]);
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 2);
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert_eq!(report.pdf_version, "1.7");
        assert!(report.warnings.is_empty());
        assert!(report.page_matches(0, Size::a4(), 0.01));
        assert!(report.page_matches(1, Size::from_mm(100.0, 50.0), 0.01));
        assert!(!report.page_matches(2, Size::a4(), 0.01));
        assert!(report.require_exportable().is_ok());
    }

    #[test]
    fn empty_export_is_not_exportable() {
        let report = inspect_pdf_bytes(&export(&[])).expect("inspect");
        assert_eq!(report.page_count, 0);
        let err = report.require_exportable().expect_err("no pages");
        assert_eq!(err.code, PdfInspectErrorCode::PdfNoPages);
    }

    #[test]
    fn malformed_data_is_a_parse_failure() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert_eq!(err.code, PdfInspectErrorCode::PdfParseFailed);
        assert!(err.to_string().starts_with("PDF_PARSE_FAILED"));
    }

    #[test]
    fn path_and_bytes_agree() {
        let bytes = export(&[Size::from_mm(50.0, 30.0)]);
        let dir = std::env::temp_dir().join(format!("sheetpress_inspect_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("one.pdf");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(&bytes))
            .expect("write");

        let from_path = inspect_pdf_path(&path).expect("inspect path");
        assert_eq!(from_path, inspect_pdf_bytes(&bytes).expect("inspect bytes"));

        let err = inspect_pdf_path(&dir.join("missing.pdf")).expect_err("missing");
        assert_eq!(err.code, PdfInspectErrorCode::PdfIoError);
    }
}
