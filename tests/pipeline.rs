use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use skolkarta::{
    config::{Backend, Config},
    geocode::{GeocodeBackend, Geocoder},
    process::Pipeline,
    request::PageFetcher,
    resolve::AddressResolver,
    store::{AddressCache, CoordCache, Coordinate},
    Error, Result,
};

const EXPORT: &str = "\
Grundskola - Slutbetyg årskurs 9, samtliga elever
Skolenhet

Skola;Skolkommun;Skol-enhetskod;Typ av huvudman;Antal elever;Genomsnittligt meritvärde (17 ämnen)
Alfaskolan;Solna;S1;Kommunal;80;300,0
Betaskolan;Lund;S2;Enskild;60;210,5
Gammaskolan;Kiruna;S3;Kommunal;20;180,0
Deltaskolan;Umeå;S4;Kommunal;45;..
Alfaskolan kopia;Solna;S1;Kommunal;80;100,0
";

/// S1 and S2 have addresses, S3's page has none.
struct FakeFetcher {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_school_page(&self, school_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let address = match school_id {
            "S1" => "Main St 1",
            "S2" => "Okänd gränd 7",
            _ => return Ok("<html><body><h1>Skolenhet</h1></body></html>".into()),
        };
        Ok(format!(
            "<html><body><dl><dt>Adress</dt><dd>{address}</dd></dl></body></html>"
        ))
    }
}

/// Answers like `FakeFetcher`, but when asked for S3 first records what the
/// address cache on disk holds at that moment.
struct SnapshotFetcher {
    inner: FakeFetcher,
    cache_path: PathBuf,
    on_disk: Arc<Mutex<Option<serde_json::Value>>>,
}

#[async_trait]
impl PageFetcher for SnapshotFetcher {
    async fn fetch_school_page(&self, school_id: &str) -> Result<String> {
        if school_id == "S3" {
            let text = std::fs::read_to_string(&self.cache_path).unwrap_or_default();
            *self.on_disk.lock().unwrap() = serde_json::from_str(&text).ok();
        }
        self.inner.fetch_school_page(school_id).await
    }
}

/// Only knows Main St 1.
struct FakeBackend {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl GeocodeBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn min_interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.starts_with("Main St 1") {
            Ok(Some(Coordinate { lat: 59.3, lng: 18.0 }))
        } else {
            Ok(None)
        }
    }
}

struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new(export: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("skolkarta-e2e-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("export.csv"), export).unwrap();
        Workspace { dir }
    }

    fn config(&self, map_only: bool) -> Config {
        Config {
            input: self.dir.join("export.csv"),
            delimiter: b';',
            skip_rows: None,
            backend: Backend::Nominatim,
            api_key: None,
            api_key_file: self.dir.join("google_maps_api_key.txt"),
            map_only,
            top: None,
            municipality_fallback: false,
            address_cache: self.dir.join("address_cache.json"),
            coord_cache: self.dir.join("coord_cache.json"),
            out_dir: self.dir.join("out"),
            flush_every: 2,
            scrape_delay: Duration::ZERO,
        }
    }

    fn read(&self, rel: impl AsRef<Path>) -> String {
        std::fs::read_to_string(self.dir.join(rel)).unwrap()
    }
}

struct Counters {
    pages: Arc<AtomicUsize>,
    geocodes: Arc<AtomicUsize>,
}

async fn online_pipeline(ws: &Workspace) -> (Pipeline, Counters) {
    let config = ws.config(false);
    let pages = Arc::new(AtomicUsize::new(0));
    let geocodes = Arc::new(AtomicUsize::new(0));
    let resolver = AddressResolver::new(
        Box::new(FakeFetcher {
            calls: pages.clone(),
        }),
        AddressCache::load(&config.address_cache).await.unwrap(),
        config.scrape_delay,
    );
    let geocoder = Geocoder::new(
        Box::new(FakeBackend {
            calls: geocodes.clone(),
        }),
        CoordCache::load(&config.coord_cache).await.unwrap(),
        false,
    );
    (
        Pipeline::new(config, resolver, geocoder),
        Counters { pages, geocodes },
    )
}

#[tokio::test]
async fn full_run_then_cached_rerun() {
    let ws = Workspace::new(EXPORT);

    let (pipeline, counters) = online_pipeline(&ws).await;
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.mapped, 1);
    assert_eq!(summary.dropped_rows, 2);
    assert_eq!(summary.failed_addresses, 1);
    assert_eq!(summary.failed_geocodes, 1);
    assert_eq!(summary.average_merit, Some(300.0));
    assert_eq!(counters.pages.load(Ordering::SeqCst), 3);
    // Main St 1 hits on the first variant, the other address misses on both.
    assert_eq!(counters.geocodes.load(Ordering::SeqCst), 3);
    let first_table = ws.read("out/schools_with_coordinates.csv");

    let addresses: serde_json::Value = serde_json::from_str(&ws.read("address_cache.json")).unwrap();
    assert_eq!(addresses["S1"], "Main St 1");
    assert!(addresses["S3"].is_null());

    let (pipeline, counters) = online_pipeline(&ws).await;
    let summary = pipeline.run().await.unwrap();
    assert_eq!(counters.pages.load(Ordering::SeqCst), 0);
    assert_eq!(counters.geocodes.load(Ordering::SeqCst), 0);
    assert_eq!(summary.address_cache_hits, 3);
    assert_eq!(ws.read("out/schools_with_coordinates.csv"), first_table);
}

#[tokio::test]
async fn caches_reach_disk_after_each_batch() {
    let ws = Workspace::new(EXPORT);
    let config = ws.config(false);
    assert_eq!(config.flush_every, 2);

    let on_disk = Arc::new(Mutex::new(None));
    let fetcher = SnapshotFetcher {
        inner: FakeFetcher {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        cache_path: config.address_cache.clone(),
        on_disk: on_disk.clone(),
    };
    let resolver = AddressResolver::new(
        Box::new(fetcher),
        AddressCache::load(&config.address_cache).await.unwrap(),
        config.scrape_delay,
    );
    let geocoder = Geocoder::new(
        Box::new(FakeBackend {
            calls: Arc::new(AtomicUsize::new(0)),
        }),
        CoordCache::load(&config.coord_cache).await.unwrap(),
        false,
    );
    Pipeline::new(config, resolver, geocoder).run().await.unwrap();

    // S1 and S2 form the first batch, so both are on disk before S3 is looked up.
    let snapshot = on_disk.lock().unwrap().take().expect("address cache written mid-run");
    assert_eq!(snapshot["S1"], "Main St 1");
    assert_eq!(snapshot["S2"], "Okänd gränd 7");
    assert!(snapshot.get("S3").is_none());

    let coords: serde_json::Value = serde_json::from_str(&ws.read("coord_cache.json")).unwrap();
    assert_eq!(coords["Main St 1"]["lat"], 59.3);
}

#[tokio::test]
async fn unmapped_schools_stay_in_the_table() {
    let ws = Workspace::new(EXPORT);
    let (pipeline, _) = online_pipeline(&ws).await;
    pipeline.run().await.unwrap();

    let table = ws.read("out/schools_with_coordinates.csv");
    let lines = table.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1], "S1,Alfaskolan,Solna,300.0,Main St 1,59.3,18.0,1,resolved");
    assert_eq!(lines[2], "S2,Betaskolan,Lund,210.5,Okänd gränd 7,,,2,no_coordinate");
    assert_eq!(lines[3], "S3,Gammaskolan,Kiruna,180.0,,,,3,no_address");

    let map = ws.read("out/schools_merit_map.html");
    assert!(map.contains("Alfaskolan"));
    assert!(!map.contains("Betaskolan"));
    assert!(!map.contains("Gammaskolan"));
}

#[tokio::test]
async fn map_only_renders_from_seeded_caches() {
    let export = "Skol-enhetskod;Skola;Skolkommun;Genomsnittligt meritvärde (17 ämnen)\nS1;Alfaskolan;Solna;300\n";
    let ws = Workspace::new(export);
    std::fs::write(ws.dir.join("address_cache.json"), r#"{"S1": "Main St 1"}"#).unwrap();
    std::fs::write(
        ws.dir.join("coord_cache.json"),
        r#"{"Main St 1": {"lat": 59.3, "lng": 18.0}}"#,
    )
    .unwrap();

    let summary = Pipeline::from_config(ws.config(true))
        .await
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.mapped, 1);
    assert_eq!(summary.page_requests, 0);
    assert_eq!(summary.geocode_requests, 0);

    let table = ws.read("out/schools_with_coordinates.csv");
    assert!(table.contains("S1,Alfaskolan,Solna,300.0,Main St 1,59.3,18.0,1,resolved"));

    for page in ["out/schools_merit_map.html", "out/schools_ranked_map.html"] {
        let html = ws.read(page);
        assert!(html.contains(r##""lat":59.3,"lng":18.0,"color":"#0040FF""##));
    }
}

#[tokio::test]
async fn missing_input_is_fatal() {
    let ws = Workspace::new("");
    let mut config = ws.config(true);
    config.input = ws.dir.join("nope.csv");
    let res = Pipeline::from_config(config).await.unwrap().run().await;
    assert!(matches!(res, Err(Error::InputFile { .. })));
}
