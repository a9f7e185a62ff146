use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    load::SchoolRecord, parse::parse_address, request::PageFetcher, store::AddressCache, Error,
    Result,
};

/// What looking up one school's address came to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOutcome {
    /// Answered from the cache. `None` is a remembered miss.
    Cached(Option<String>),
    /// Scraped from the school page just now.
    Found(String),
    /// The page loaded but carried no address. Cached as a miss.
    NotFound,
    /// Network trouble, or offline with nothing cached. Not cached.
    Failed,
}

impl AddressOutcome {
    pub fn address(&self) -> Option<&str> {
        match self {
            AddressOutcome::Cached(a) => a.as_deref(),
            AddressOutcome::Found(a) => Some(a),
            AddressOutcome::NotFound | AddressOutcome::Failed => None,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, AddressOutcome::Cached(_))
    }
}

/// Cache-first address lookup. Without a fetcher it only answers from the cache.
pub struct AddressResolver {
    fetcher: Option<Box<dyn PageFetcher>>,
    cache: AddressCache,
    delay: Duration,
    requests: usize,
}

impl AddressResolver {
    pub fn new(fetcher: Box<dyn PageFetcher>, cache: AddressCache, delay: Duration) -> Self {
        AddressResolver {
            fetcher: Some(fetcher),
            cache,
            delay,
            requests: 0,
        }
    }

    pub fn offline(cache: AddressCache) -> Self {
        AddressResolver {
            fetcher: None,
            cache,
            delay: Duration::ZERO,
            requests: 0,
        }
    }

    /// Never fails: every per-school problem is logged and turned into an outcome.
    pub async fn resolve(&mut self, school: &SchoolRecord) -> AddressOutcome {
        if let Some(cached) = self.cache.get(&school.id) {
            debug!(school = %school.id, "address cache hit");
            return AddressOutcome::Cached(cached.clone());
        }
        let Some(fetcher) = self.fetcher.as_ref() else {
            return AddressOutcome::Failed;
        };

        self.requests += 1;
        let outcome = match scrape_address(&**fetcher, &school.id).await {
            Ok(address) => {
                self.cache.put(school.id.clone(), Some(address.clone()));
                AddressOutcome::Found(address)
            }
            Err(Error::AddressNotFound(_)) => {
                warn!(school = %school.id, name = %school.name, "no address on school page");
                self.cache.put(school.id.clone(), None);
                AddressOutcome::NotFound
            }
            Err(e) => {
                warn!(school = %school.id, name = %school.name, error = %e, "address lookup failed");
                AddressOutcome::Failed
            }
        };

        // Go easy on the directory site between uncached requests.
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }

    /// Number of page requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.cache.flush().await
    }
}

async fn scrape_address(fetcher: &dyn PageFetcher, school_id: &str) -> Result<String> {
    let html = fetcher.fetch_school_page(school_id).await?;
    parse_address(Arc::new(html))
        .await?
        .ok_or_else(|| Error::AddressNotFound(school_id.to_string()))
}
