use reqwest::{Client, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use std::time::Duration;
use tracing::{debug, info};

use super::{RawStatRow, RetryPolicy};
use crate::config::IngestSettings;
use crate::error::{PipelineError, PipelineResult};

/// JSON stats feed, one request per season
pub struct StatsFeedClient {
    client: ClientWithMiddleware,
    url_template: String,
    retry: RetryPolicy,
}

impl StatsFeedClient {
    pub fn new(url_template: &str, settings: &IngestSettings) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {}", e)))?;
        let retry = RetryPolicy::from_settings(&settings.retry);

        Ok(Self {
            client: retry.client(client),
            url_template: url_template.to_string(),
            retry,
        })
    }

    /// `{year}` in the template is replaced with the season; a template
    /// without it gets `?year=` appended.
    pub fn season_url(&self, year: i32) -> String {
        if self.url_template.contains("{year}") {
            self.url_template.replace("{year}", &year.to_string())
        } else if self.url_template.contains('?') {
            format!("{}&year={}", self.url_template, year)
        } else {
            format!("{}?year={}", self.url_template, year)
        }
    }

    pub async fn fetch_season(&self, year: i32) -> PipelineResult<Vec<RawStatRow>> {
        let url = self.season_url(year);
        debug!("Fetching season {} from {}", year, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.retry.exhausted(&format!("GET {}", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&url, status, &self.retry));
        }

        let mut rows: Vec<RawStatRow> = response
            .json()
            .await
            .map_err(|e| PipelineError::Validation(format!("{} returned malformed JSON: {}", url, e)))?;

        // feeds that omit the season per row
        for row in rows.iter_mut() {
            row.year.get_or_insert(year);
        }

        info!("Fetched {} rows for {}", rows.len(), year);
        Ok(rows)
    }

    pub async fn fetch_seasons(&self, years: &[i32]) -> PipelineResult<Vec<RawStatRow>> {
        let mut rows = Vec::new();
        for year in years {
            rows.extend(self.fetch_season(*year).await?);
        }
        Ok(rows)
    }
}

/// Failure for a non-2xx response. Transient statuses have already been
/// retried by the middleware by the time they get here.
fn status_error(url: &str, status: StatusCode, retry: &RetryPolicy) -> PipelineError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        retry.exhausted(&format!("GET {}", url), status)
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        PipelineError::DataNotFound(format!("feed has no data at {} ({})", url, status))
    } else {
        PipelineError::Config(format!("feed rejected {} with {}", url, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::error::ErrorKind;

    fn settings() -> IngestSettings {
        IngestSettings {
            feed_url: None,
            request_timeout_secs: 1,
            retry: RetrySettings {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
        }
    }

    #[test]
    fn test_season_url() {
        let client = StatsFeedClient::new("https://stats.example/{year}/fantasy.json", &settings()).unwrap();
        assert_eq!(client.season_url(2023), "https://stats.example/2023/fantasy.json");

        let client = StatsFeedClient::new("https://stats.example/fantasy?fmt=json", &settings()).unwrap();
        assert_eq!(client.season_url(2021), "https://stats.example/fantasy?fmt=json&year=2021");
    }

    #[test]
    fn test_status_classification() {
        let retry = RetryPolicy::from_settings(&settings().retry);
        let url = "https://stats.example/2023";

        let err = status_error(url, StatusCode::SERVICE_UNAVAILABLE, &retry);
        assert_eq!(err.kind(), ErrorKind::RetriesExhaustedError);
        assert!(err.to_string().contains("2 attempts"));

        let err = status_error(url, StatusCode::TOO_MANY_REQUESTS, &retry);
        assert_eq!(err.kind(), ErrorKind::RetriesExhaustedError);

        let err = status_error(url, StatusCode::NOT_FOUND, &retry);
        assert_eq!(err.kind(), ErrorKind::DataNotFoundError);

        let err = status_error(url, StatusCode::UNAUTHORIZED, &retry);
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn test_unreachable_feed_exhausts_retries() {
        // nothing listens on port 9 of localhost
        let client = StatsFeedClient::new("http://127.0.0.1:9/{year}", &settings()).unwrap();
        let err = client.fetch_season(2023).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetriesExhaustedError);
    }
}
