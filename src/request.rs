use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};

use crate::{Error, Result, SCHOOL_PAGE_URL, USER_AGENT};

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the directory page of a single school.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_school_page(&self, school_id: &str) -> Result<String>;
}

/// Fetches school pages from the school directory over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_base_url(SCHOOL_PAGE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(PAGE_TIMEOUT)
            .build()?;
        Ok(HttpFetcher {
            client,
            base_url: base_url.into(),
        })
    }

    fn page_url(&self, school_id: &str) -> String {
        format!("{}{}", self.base_url, school_id)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Requests a page and returns the HTML. Any non-2xx answer is an error.
    async fn fetch_school_page(&self, school_id: &str) -> Result<String> {
        let url = self.page_url(school_id);
        let res = self
            .client
            .get(&url)
            .header(header::ACCEPT_LANGUAGE, "sv-SE,sv;q=0.9")
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Error::HttpStatus {
                url,
                status: res.status().as_u16(),
            });
        }
        let html = res.text().await?;
        Ok(html)
    }
}
