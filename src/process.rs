use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;

use crate::{
    config::Config,
    geocode::{backend_for, Geocoder},
    info_time,
    load::{load_schools, LoadOptions, SchoolRecord},
    rank::{rank, ColorScale, Standing, PALETTE},
    render::{write_map, MapKind},
    report::write_report,
    request::HttpFetcher,
    resolve::AddressResolver,
    secs_since,
    store::{AddressCache, CoordCache, Coordinate},
    Result, MERIT_MAP_FILE, RANKED_MAP_FILE, REPORT_FILE,
};

/// Whether a school made it onto the map, and if not, where it fell off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Resolved,
    NoAddress,
    NoCoordinate,
}

/// A school joined with its address, position, rank and colour.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSchool {
    pub record: SchoolRecord,
    pub address: Option<String>,
    pub coordinate: Option<Coordinate>,
    pub standing: Standing,
    pub color: &'static str,
    pub status: Status,
}

/// Ranks and colours every school against all the others, keeping the input order.
/// A coordinate without an address is dropped.
pub fn enrich(
    rows: Vec<(SchoolRecord, Option<String>, Option<Coordinate>)>,
) -> (Vec<EnrichedSchool>, Option<ColorScale>) {
    let merits = rows.iter().map(|(r, _, _)| r.merit).collect::<Vec<_>>();
    let scale = ColorScale::from_values(merits.iter().copied());
    let standings = rank(&merits);

    let schools = rows
        .into_iter()
        .zip(standings)
        .map(|((record, address, coordinate), standing)| {
            let coordinate = address.as_ref().and(coordinate);
            let status = match (&address, coordinate) {
                (None, _) => Status::NoAddress,
                (Some(_), None) => Status::NoCoordinate,
                (Some(_), Some(_)) => Status::Resolved,
            };
            let color = scale.map_or(PALETTE[0], |s| s.color(record.merit));
            EnrichedSchool {
                record,
                address,
                coordinate,
                standing,
                color,
                status,
            }
        })
        .collect();
    (schools, scale)
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub mapped: usize,
    pub dropped_rows: usize,
    pub address_cache_hits: usize,
    pub failed_addresses: usize,
    pub failed_geocodes: usize,
    pub page_requests: usize,
    pub geocode_requests: usize,
    pub average_merit: Option<f64>,
    pub files: Vec<PathBuf>,
}

/// Loader -> resolver -> geocoder -> ranking -> maps and table, in that order.
pub struct Pipeline {
    config: Config,
    resolver: AddressResolver,
    geocoder: Geocoder,
}

impl Pipeline {
    pub fn new(config: Config, resolver: AddressResolver, geocoder: Geocoder) -> Self {
        Pipeline {
            config,
            resolver,
            geocoder,
        }
    }

    /// Wires up the real HTTP fetcher and geocoding backend, or cache-only
    /// lookups when `map_only` is set.
    pub async fn from_config(config: Config) -> Result<Self> {
        let addresses = AddressCache::load(&config.address_cache).await?;
        let coords = CoordCache::load(&config.coord_cache).await?;

        let (resolver, geocoder) = if config.map_only {
            (AddressResolver::offline(addresses), Geocoder::offline(coords))
        } else {
            let fetcher = HttpFetcher::new()?;
            let backend = backend_for(config.backend, config.api_key.clone(), &config.api_key_file)?;
            (
                AddressResolver::new(Box::new(fetcher), addresses, config.scrape_delay),
                Geocoder::new(backend, coords, config.municipality_fallback),
            )
        };
        Ok(Pipeline::new(config, resolver, geocoder))
    }

    pub async fn run(mut self) -> Result<RunSummary> {
        let start_time = Local::now();
        let mut summary = RunSummary::default();

        info_time!("Reading school data from {}", self.config.input.display());
        let opts = LoadOptions {
            delimiter: self.config.delimiter,
            skip_rows: self.config.skip_rows,
        };
        let (mut schools, report) = load_schools(&self.config.input, opts)?;
        summary.dropped_rows = report.dropped();
        info_time!(
            "Loaded {} rows, {} schools with merit values, dropped {} (no id: {}, no merit: {}, duplicates: {})",
            report.rows,
            schools.len(),
            report.dropped(),
            report.missing_id,
            report.invalid_merit,
            report.duplicates
        );
        if let Some(top) = self.config.top {
            schools.truncate(top);
        }
        info_time!(
            "Caches: {} addresses, {} coordinates{}",
            self.resolver.cache().len(),
            self.geocoder.cache().values().filter(|c| c.is_some()).count(),
            if self.config.map_only { " (map only)" } else { "" }
        );

        let rows = self.enrich_schools(&schools, &mut summary).await?;

        info_time!(start_time, "Finished looking up {} schools", schools.len());
        let (enriched, scale) = enrich(rows);
        self.write_outputs(&enriched, scale, &mut summary).await?;

        let mapped = enriched.iter().filter(|s| s.coordinate.is_some());
        let (count, sum) = mapped.fold((0usize, 0.0f64), |(n, sum), s| (n + 1, sum + s.record.merit));
        summary.mapped = count;
        summary.average_merit = (count > 0).then(|| sum / count as f64);
        summary.page_requests = self.resolver.requests();
        summary.geocode_requests = self.geocoder.requests();

        log_summary(&summary);
        info_time!(start_time, "Full pipeline time:");
        Ok(summary)
    }

    /// Looks up every school in turn, flushing both caches every `flush_every` schools
    /// and once more at the end.
    async fn enrich_schools(
        &mut self,
        schools: &[SchoolRecord],
        summary: &mut RunSummary,
    ) -> Result<Vec<(SchoolRecord, Option<String>, Option<Coordinate>)>> {
        let start_time = Local::now();
        let total = schools.len();
        let mut rows = Vec::with_capacity(total);

        for (idx, school) in schools.iter().enumerate() {
            if idx < 10 || idx % 100 == 0 {
                let elapsed = secs_since!(start_time);
                let eta = if idx > 0 {
                    elapsed / idx as f64 * (total - idx) as f64
                } else {
                    0.0
                };
                info_time!(
                    "Progress: {}/{} ({:.1}%) - {:.1}s elapsed, ETA: {:.1}s",
                    idx + 1,
                    total,
                    100.0 * idx as f64 / total as f64,
                    elapsed,
                    eta
                );
            }

            let found = self.resolver.resolve(school).await;
            if found.was_cached() {
                summary.address_cache_hits += 1;
            }
            let address = found.address().map(str::to_string);

            let coordinate = match &address {
                Some(address) => {
                    let coord = self
                        .geocoder
                        .geocode(address, &school.municipality)
                        .await
                        .coordinate();
                    if coord.is_none() {
                        summary.failed_geocodes += 1;
                    }
                    coord
                }
                None => {
                    summary.failed_addresses += 1;
                    None
                }
            };
            tracing::debug!(
                school = %school.id,
                name = %school.name,
                address = address.as_deref().unwrap_or("-"),
                mapped = coordinate.is_some(),
                "processed school"
            );
            rows.push((school.clone(), address, coordinate));
            summary.processed += 1;

            if (idx + 1) % self.config.flush_every.max(1) == 0 {
                self.flush().await?;
            }
        }
        self.flush().await?;
        Ok(rows)
    }

    async fn flush(&mut self) -> Result<()> {
        self.resolver.flush().await?;
        self.geocoder.flush().await
    }

    async fn write_outputs(
        &self,
        schools: &[EnrichedSchool],
        scale: Option<ColorScale>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let out_dir = &self.config.out_dir;
        tokio::fs::create_dir_all(out_dir).await?;

        let local_now = Local::now();
        let merit_map = out_dir.join(MERIT_MAP_FILE);
        let mapped = write_map(&merit_map, schools, scale, MapKind::Merit).await?;
        let ranked_map = out_dir.join(RANKED_MAP_FILE);
        write_map(&ranked_map, schools, scale, MapKind::Ranked).await?;
        info_time!(local_now, "Wrote maps with {} schools", mapped);

        let table = out_dir.join(REPORT_FILE);
        write_report(&table, schools).await?;
        info_time!("Wrote {} rows to {}", schools.len(), table.display());

        summary.files = vec![merit_map, ranked_map, table];
        Ok(())
    }
}

/// Reads the caches, runs the whole pipeline and writes the outputs.
pub async fn run(config: Config) -> Result<RunSummary> {
    Pipeline::from_config(config).await?.run().await
}

fn log_summary(summary: &RunSummary) {
    let success_rate = if summary.processed > 0 {
        100.0 * summary.mapped as f64 / summary.processed as f64
    } else {
        0.0
    };
    info_time!(
        "Schools processed: {}, mapped: {} ({:.1}%)",
        summary.processed,
        summary.mapped,
        success_rate
    );
    info_time!(
        "Address cache hits: {}, failed address extractions: {}, failed geocoding: {}",
        summary.address_cache_hits,
        summary.failed_addresses,
        summary.failed_geocodes
    );
    info_time!(
        "Requests: {} school pages, {} geocoding",
        summary.page_requests,
        summary.geocode_requests
    );
    if let Some(avg) = summary.average_merit {
        info_time!("Average merit value: {:.1}", avg);
    }
    for file in &summary.files {
        info_time!("Wrote {}", file.display());
    }
}
