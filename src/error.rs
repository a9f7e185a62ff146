use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),
    #[error("No address found on the page of school {0}")]
    AddressNotFound(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Couldn't open input file {path}: {source}")]
    InputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Input is missing the required column: {0}")]
    MissingColumn(&'static str),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Google Maps API key not found. Put your key in {0}")]
    MissingApiKey(PathBuf),
    #[error("Geocoding backend {backend} answered {status}: {message}")]
    Geocode {
        backend: &'static str,
        status: String,
        message: String,
    },

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },
}
