//! SKOLVERKET MERIT MAPPER
//! Reads the grade 9 statistics export, looks up every school's address,
//! geocodes it and renders the merit values onto interactive maps.

mod error;
mod macros;

pub mod config;
pub mod geocode;
pub mod load;
pub mod parse;
pub mod process;
pub mod rank;
pub mod render;
pub mod report;
pub mod request;
pub mod resolve;
pub mod store;

pub use error::{Error, Result};

/// Lookup page on the school directory, the school unit code gets appended.
const SCHOOL_PAGE_URL: &str = "https://utbildningsguiden.skolverket.se/skolenhet?schoolUnitID=";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const NOMINATIM_USER_AGENT: &str = "skolkarta/0.1 (school merit mapper)";
/// Upper bound of the grade 9 merit scale.
pub const MAX_MERIT: f64 = 340.0;

const MERIT_MAP_FILE: &str = "schools_merit_map.html";
const RANKED_MAP_FILE: &str = "schools_ranked_map.html";
const REPORT_FILE: &str = "schools_with_coordinates.csv";
