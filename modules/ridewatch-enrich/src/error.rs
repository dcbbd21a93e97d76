use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeocoderError {
    /// The provider found nothing for the query. Permanent.
    #[error("no result for query")]
    NotFound,

    /// The provider returned several plausible matches. Permanent; the
    /// event is marked attempted-with-unknown-coordinates for human review.
    #[error("ambiguous result")]
    AmbiguousResult,

    #[error("geocoder timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    /// Provider rejected the request (bad key, quota policy). Permanent.
    #[error("provider error: {0}")]
    Provider(String),
}

impl GeocoderError {
    pub fn retriable(&self) -> bool {
        matches!(self, GeocoderError::Timeout | GeocoderError::Transport(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            GeocoderError::NotFound => "geocode_not_found",
            GeocoderError::AmbiguousResult => "geocode_ambiguous",
            GeocoderError::Timeout => "geocode_timeout",
            GeocoderError::Transport(_) => "geocode_transport",
            GeocoderError::Provider(_) => "geocode_provider",
        }
    }
}

#[derive(Error, Debug)]
pub enum DetailExtractorError {
    #[error("extractor timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered but the payload didn't parse. Permanent for
    /// this input.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl DetailExtractorError {
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            DetailExtractorError::Timeout | DetailExtractorError::Transport(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            DetailExtractorError::Timeout => "extract_timeout",
            DetailExtractorError::Transport(_) => "extract_transport",
            DetailExtractorError::Malformed(_) => "extract_malformed",
            DetailExtractorError::Provider(_) => "extract_provider",
        }
    }
}
