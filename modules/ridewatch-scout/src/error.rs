use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    /// The expected calendar container is missing; the whole page is
    /// unusable and gets skipped.
    #[error("structural error: {0}")]
    Structural(String),

    /// A single row failed extraction. The row is skipped, the page
    /// survives.
    #[error("row parse error: {0}")]
    Row(String),
}

impl ParseError {
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::Structural(_) => "structural",
            ParseError::Row(_) => "row_parse",
        }
    }
}
