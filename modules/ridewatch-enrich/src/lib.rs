pub mod details;
pub mod error;
pub mod geocache;
pub mod geocode;
pub mod providers;
pub mod traits;

pub use details::{detail_check_due, DetailEnrichmentWorker, DetailSummary, DetailWorkerConfig};
pub use error::{DetailExtractorError, GeocoderError};
pub use geocache::GeocodeCache;
pub use geocode::{GeocodeSummary, GeocodeWorker, GeocodeWorkerConfig, LocationChanged};
pub use providers::{GeminiExtractor, GoogleGeocoder, NominatimGeocoder};
pub use traits::{DetailExtractor, ExtractHints, ExtractedDetails, Geocoder};
