mod gemini;
mod google;
mod nominatim;

pub use gemini::GeminiExtractor;
pub use google::GoogleGeocoder;
pub use nominatim::NominatimGeocoder;
