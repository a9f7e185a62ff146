use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, ValueEnum};

use crate::{Error, Result};

const DEFAULT_INPUT: &str = "Grundskola - Slutbetyg årskurs 9, samtliga elever 2025 Skolenhet.csv";

/// Which geocoding service a run talks to. Both share the coordinate cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Google Maps Geocoding API, needs an API key.
    Google,
    /// OpenStreetMap Nominatim, free but limited to one request per second.
    Nominatim,
}

#[derive(Debug, Parser)]
#[command(name = "skolkarta", version, about = "Maps grade 9 merit values of Swedish schools")]
pub struct Args {
    /// Statistics export to read.
    #[arg(long, default_value = DEFAULT_INPUT)]
    pub input: PathBuf,
    /// Field delimiter of the input file, a single ASCII character.
    #[arg(long, default_value = ";", value_parser = parse_delimiter)]
    pub delimiter: u8,
    /// Lines before the header row. Detected when omitted.
    #[arg(long)]
    pub skip_rows: Option<usize>,

    #[arg(long, value_enum, default_value_t = Backend::Google)]
    pub backend: Backend,
    /// Plain-text file holding the Google Maps API key.
    #[arg(long, default_value = "google_maps_api_key.txt")]
    pub api_key_file: PathBuf,
    /// Render from the caches only, without any network requests.
    #[arg(long)]
    pub map_only: bool,
    /// Only process the N schools with the highest merit value.
    #[arg(long)]
    pub top: Option<usize>,
    /// Geocode the municipality when the address itself can't be found.
    #[arg(long)]
    pub municipality_fallback: bool,

    #[arg(long, default_value = "address_cache.json")]
    pub address_cache: PathBuf,
    #[arg(long, default_value = "coord_cache.json")]
    pub coord_cache: PathBuf,
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Write the caches to disk after every N processed schools.
    #[arg(long, default_value_t = 100)]
    pub flush_every: usize,
    /// Pause after every uncached school page request.
    #[arg(long, default_value_t = 200)]
    pub scrape_delay_ms: u64,
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub delimiter: u8,
    pub skip_rows: Option<usize>,
    pub backend: Backend,
    pub api_key: Option<String>,
    pub api_key_file: PathBuf,
    pub map_only: bool,
    pub top: Option<usize>,
    pub municipality_fallback: bool,
    pub address_cache: PathBuf,
    pub coord_cache: PathBuf,
    pub out_dir: PathBuf,
    pub flush_every: usize,
    pub scrape_delay: Duration,
}

impl Config {
    /// Reads the API key when the run is going to need it.
    pub fn from_args(args: Args) -> Result<Self> {
        let api_key = if args.backend == Backend::Google && !args.map_only {
            Some(read_api_key(&args.api_key_file)?)
        } else {
            None
        };

        Ok(Config {
            input: args.input,
            delimiter: args.delimiter,
            skip_rows: args.skip_rows,
            backend: args.backend,
            api_key,
            api_key_file: args.api_key_file,
            map_only: args.map_only,
            top: args.top,
            municipality_fallback: args.municipality_fallback,
            address_cache: args.address_cache,
            coord_cache: args.coord_cache,
            out_dir: args.out_dir,
            flush_every: args.flush_every.max(1),
            scrape_delay: Duration::from_millis(args.scrape_delay_ms),
        })
    }
}

fn read_api_key(path: &Path) -> Result<String> {
    let key = std::fs::read_to_string(path).map_err(|_| Error::MissingApiKey(path.to_path_buf()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::MissingApiKey(path.to_path_buf()));
    }
    Ok(key.to_string())
}

fn parse_delimiter(s: &str) -> std::result::Result<u8, String> {
    match s.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(format!("expected a single ASCII character, got {s:?}")),
    }
}
