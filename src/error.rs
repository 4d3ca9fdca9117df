use thiserror::Error;

/// Request-level failures. Anything below the request (sheet, placement,
/// text run) is recovered in place and never surfaces here.
#[derive(Debug, Error)]
pub enum SheetPressError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("request budget of {budget_ms} ms exceeded after {pages_written} page(s)")]
    BudgetExceeded { budget_ms: u128, pages_written: usize },
    #[error("malformed request body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures inside a single placement's full render. These select the next
/// fallback tier; they are logged but never propagated past the placement.
#[derive(Debug, Error)]
pub(crate) enum RenderError {
    #[error("markup is not well-formed: {0}")]
    MarkupParse(#[from] roxmltree::Error),
    #[error("markup has no <svg> root element")]
    MissingRoot,
    #[error("placement box is empty")]
    EmptyBox,
    #[error("content frame is degenerate ({0})")]
    NonFinite(&'static str),
}
