use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    config::Backend,
    store::{Coordinate, CoordCache},
    Error, Result, NOMINATIM_USER_AGENT,
};

const GOOGLE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(15);

/// A geocoding service. `Ok(None)` means the service answered but found nothing.
#[async_trait]
pub trait GeocodeBackend: Send + Sync {
    fn name(&self) -> &'static str;
    /// Shortest allowed gap between two requests.
    fn min_interval(&self) -> Duration;
    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>>;
}

/// Builds the backend the run was configured with.
pub fn backend_for(
    backend: Backend,
    api_key: Option<String>,
    key_file: &Path,
) -> Result<Box<dyn GeocodeBackend>> {
    Ok(match backend {
        Backend::Google => {
            let key = api_key.ok_or_else(|| Error::MissingApiKey(key_file.to_path_buf()))?;
            Box::new(GoogleMaps::new(key)?)
        }
        Backend::Nominatim => Box::new(Nominatim::new()?),
    })
}

/// Google Maps Geocoding API, 50 requests per second.
pub struct GoogleMaps {
    client: Client,
    api_key: String,
}

impl GoogleMaps {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(GEOCODE_TIMEOUT).build()?;
        Ok(GoogleMaps { client, api_key })
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: Coordinate,
}

impl GoogleResponse {
    fn into_coordinate(self) -> Result<Option<Coordinate>> {
        match self.status.as_str() {
            "OK" => Ok(self.results.into_iter().next().map(|r| r.geometry.location)),
            "ZERO_RESULTS" => Ok(None),
            _ => Err(Error::Geocode {
                backend: "google",
                status: self.status.clone(),
                message: self.error_message.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl GeocodeBackend for GoogleMaps {
    fn name(&self) -> &'static str {
        "google"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(20)
    }

    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        let res = self
            .client
            .get(GOOGLE_URL)
            .query(&[("address", query), ("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        res.json::<GoogleResponse>().await?.into_coordinate()
    }
}

/// OpenStreetMap Nominatim. The usage policy allows one request per second.
pub struct Nominatim {
    client: Client,
    base_url: String,
}

impl Nominatim {
    pub fn new() -> Result<Self> {
        Self::with_base_url(NOMINATIM_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(NOMINATIM_USER_AGENT)
            .timeout(GEOCODE_TIMEOUT)
            .build()?;
        Ok(Nominatim {
            client,
            base_url: base_url.into(),
        })
    }
}

/// Nominatim hands coordinates back as strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimPlace {
    fn to_coordinate(&self) -> Option<Coordinate> {
        Some(Coordinate {
            lat: self.lat.parse().ok()?,
            lng: self.lon.parse().ok()?,
        })
    }
}

#[async_trait]
impl GeocodeBackend for Nominatim {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        let places = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<NominatimPlace>>()
            .await?;
        Ok(places.first().and_then(NominatimPlace::to_coordinate))
    }
}

/// Spaces requests out to at least `interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            last: None,
        }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

/// What geocoding one address came to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeocodeOutcome {
    /// Answered from the cache. `None` is a remembered miss.
    Cached(Option<Coordinate>),
    Found(Coordinate),
    /// Every query variant came back empty. Cached as a miss.
    NotFound,
    /// The backend errored (quota, denied, network), or offline with nothing cached.
    Failed,
}

impl GeocodeOutcome {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            GeocodeOutcome::Cached(c) => *c,
            GeocodeOutcome::Found(c) => Some(*c),
            GeocodeOutcome::NotFound | GeocodeOutcome::Failed => None,
        }
    }
}

/// Cache-first geocoding through one backend, rate limited to its ceiling.
/// Without a backend it only answers from the cache.
pub struct Geocoder {
    backend: Option<Box<dyn GeocodeBackend>>,
    cache: CoordCache,
    limiter: RateLimiter,
    municipality_fallback: bool,
    requests: usize,
}

impl Geocoder {
    pub fn new(backend: Box<dyn GeocodeBackend>, cache: CoordCache, municipality_fallback: bool) -> Self {
        let limiter = RateLimiter::new(backend.min_interval());
        Geocoder {
            backend: Some(backend),
            cache,
            limiter,
            municipality_fallback,
            requests: 0,
        }
    }

    pub fn offline(cache: CoordCache) -> Self {
        Geocoder {
            backend: None,
            cache,
            limiter: RateLimiter::new(Duration::ZERO),
            municipality_fallback: false,
            requests: 0,
        }
    }

    /// Looks up `address`, cached under the address itself. With the
    /// municipality fallback on, an address miss (fresh or cached) is answered
    /// with the municipality centre, which is cached under its own query.
    pub async fn geocode(&mut self, address: &str, municipality: &str) -> GeocodeOutcome {
        let street = match self.cache.get(address) {
            Some(Some(coord)) => {
                debug!(address, "coordinate cache hit");
                return GeocodeOutcome::Cached(Some(*coord));
            }
            Some(None) => {
                debug!(address, "cached coordinate miss");
                GeocodeOutcome::Cached(None)
            }
            None => self.lookup_address(address, municipality).await,
        };

        let missed = matches!(street, GeocodeOutcome::Cached(None) | GeocodeOutcome::NotFound);
        if !missed || !self.municipality_fallback || municipality.is_empty() {
            return street;
        }
        self.municipality_centre(municipality).await.unwrap_or(street)
    }

    async fn lookup_address(&mut self, address: &str, municipality: &str) -> GeocodeOutcome {
        let Some(backend) = self.backend.as_ref() else {
            return GeocodeOutcome::Failed;
        };

        let mut errored = false;
        for query in query_variants(address, municipality) {
            self.limiter.wait().await;
            self.requests += 1;
            match backend.geocode(&query).await {
                Ok(Some(coord)) => {
                    self.cache.put(address, Some(coord));
                    return GeocodeOutcome::Found(coord);
                }
                Ok(None) => debug!(query = %query, backend = backend.name(), "no geocoding result"),
                Err(e) => {
                    warn!(query = %query, backend = backend.name(), error = %e, "geocoding failed");
                    errored = true;
                }
            }
        }

        if errored {
            GeocodeOutcome::Failed
        } else {
            self.cache.put(address, None);
            GeocodeOutcome::NotFound
        }
    }

    /// `None` when the centre is unknown too, or the backend errored.
    async fn municipality_centre(&mut self, municipality: &str) -> Option<GeocodeOutcome> {
        let query = format!("{municipality}, Sweden");
        if let Some(cached) = self.cache.get(&query) {
            return (*cached).map(|c| GeocodeOutcome::Cached(Some(c)));
        }
        let backend = self.backend.as_ref()?;

        self.limiter.wait().await;
        self.requests += 1;
        match backend.geocode(&query).await {
            Ok(found) => {
                debug!(query = %query, found = found.is_some(), "municipality fallback");
                self.cache.put(query, found);
                found.map(GeocodeOutcome::Found)
            }
            Err(e) => {
                warn!(query = %query, backend = backend.name(), error = %e, "geocoding failed");
                None
            }
        }
    }

    /// Number of backend requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn cache(&self) -> &CoordCache {
        &self.cache
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.cache.flush().await
    }
}

/// Most precise first.
fn query_variants(address: &str, municipality: &str) -> Vec<String> {
    if municipality.is_empty() {
        vec![format!("{address}, Sweden")]
    } else {
        vec![
            format!("{address}, {municipality}, Sweden"),
            format!("{address}, Sweden"),
        ]
    }
}
