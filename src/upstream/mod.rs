//! Client for the registrar's course APIs
//!
//! Two upstreams are covered:
//! - the authenticated course API (terms, listings, details, seats), called
//!   with a long-lived bearer token from configuration
//! - the public registrar listings API, whose token is scraped from the
//!   public course-offerings page and cached as a [`PublicToken`]
//!
//! Requests go through a `governor` rate limiter and are retried with
//! exponential backoff on 429, 5xx and timeouts.

pub mod dto;
pub mod shape;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::{PipelineConfig, UpstreamConfig};
use crate::models::Term;
use crate::utils::error::FetchError;

pub use dto::{
    ClassSeats, CourseDetails, CourseSeats, Crosslisting, DetailInstructor, ListingClass,
    ListingCourse, ListingInstructor, ListingMeeting, OneOrMany, RegListing, SeatsFetch,
    SubjectListing, TermInfo,
};
pub use shape::{build_course_record, CourseRecord};

lazy_static! {
    static ref API_TOKEN_RE: Regex =
        Regex::new(r#"apiToken":"([^"]+)""#).expect("Invalid regex pattern");
}

/// Pull the embedded public API token out of the course-offerings page
pub fn extract_api_token(html: &str) -> Option<String> {
    API_TOKEN_RE
        .captures(html)
        .map(|caps| caps[1].to_string())
}

/// Filters for a department course listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseQuery {
    pub term: Term,
    pub subject: Option<String>,
}

impl CourseQuery {
    pub fn for_term(term: Term) -> Self {
        Self {
            term,
            subject: None,
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("fmt", "json".to_string()),
            ("term", self.term.to_string()),
            ("subject", self.subject.clone().unwrap_or_else(|| "all".to_string())),
        ]
    }
}

/// Operations the reconciler needs from the registrar
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Every advertised term, most recent first
    async fn get_terms(&self) -> Result<Vec<TermInfo>, FetchError>;

    /// Department listings. A subject filter may still return other
    /// cross-listed subjects; callers pick the one they asked for by code.
    async fn get_courses(&self, query: &CourseQuery) -> Result<Vec<SubjectListing>, FetchError>;

    async fn get_course_details(
        &self,
        listing_id: &str,
        term: Term,
    ) -> Result<CourseDetails, FetchError>;

    /// Seat counts; ids are split into configured batches by the client.
    /// A batch that fails is reported in [`SeatsFetch::failed`]; only a
    /// rejected credential fails the whole call.
    async fn get_seats(&self, term: Term, listing_ids: &[String])
        -> Result<SeatsFetch, FetchError>;

    /// Public registrar listings for a term
    async fn get_reg_listings(&self, term: Term) -> Result<Vec<RegListing>, FetchError>;
}

/// Public listings token scraped from the course-offerings page
#[derive(Debug, Clone)]
pub struct PublicToken {
    pub value: String,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl PublicToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// HTTP implementation of [`UpstreamClient`]
pub struct HttpUpstreamClient {
    client: Client,

    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    base_url: String,

    api_token: String,

    listings_page_url: String,

    listings_api_url: String,

    public_token: Mutex<Option<PublicToken>>,

    public_token_ttl: Duration,

    seat_batch_size: usize,

    max_retries: u32,

    base_delay_ms: u64,
}

impl HttpUpstreamClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(
        upstream: &UpstreamConfig,
        pipeline: &PipelineConfig,
        api_token: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(upstream.request_timeout_secs))
            .user_agent(upstream.user_agent.clone())
            .gzip(true)
            .cookie_store(true)
            .build()?;

        let rate = NonZeroU32::new(upstream.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            base_url: upstream.base_url.trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            listings_page_url: upstream.reg_listings_page_url.clone(),
            listings_api_url: upstream.reg_listings_api_url.trim_end_matches('/').to_string(),
            public_token: Mutex::new(None),
            public_token_ttl: Duration::from_secs(upstream.public_token_ttl_secs),
            seat_batch_size: pipeline.seat_batch_size.max(1),
            max_retries: upstream.max_retries,
            base_delay_ms: upstream.retry_base_delay_ms,
        })
    }

    /// Retry on 429 and transient 5xx responses
    fn should_retry(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    /// GET with rate limiting and exponential backoff retry
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<String, FetchError> {
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tracing::debug!(url, attempt, delay_ms = delay, "Retrying upstream request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.rate_limiter.until_ready().await;

            let mut request = self.client.get(url).query(query);
            if let Some(token) = bearer {
                request = request
                    .bearer_auth(token)
                    .header(ACCEPT, "application/json");
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.text().await?);
                    } else if matches!(status.as_u16(), 401 | 403) {
                        return Err(FetchError::Unauthorized(status.as_u16()));
                    } else if Self::should_retry(status) {
                        last_error = Some(if status == StatusCode::TOO_MANY_REQUESTS {
                            FetchError::RateLimit
                        } else {
                            FetchError::ServerError(status.as_u16())
                        });
                        continue;
                    } else {
                        return Err(FetchError::ServerError(status.as_u16()));
                    }
                }
                Err(e) if e.is_timeout() => last_error = Some(FetchError::Timeout),
                Err(e) => last_error = Some(FetchError::Http(e)),
            }
        }

        Err(FetchError::MaxRetriesExceeded(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let body = self.get_with_retry(&url, query, Some(self.api_token.as_str())).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{path}: {e}")))
    }

    /// Current public token, scraping a new one when stale or when forced
    async fn public_token(&self, force_refresh: bool) -> Result<String, FetchError> {
        let mut slot = self.public_token.lock().await;

        if !force_refresh {
            if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.value.clone());
            }
        }

        let html = self
            .get_with_retry(&self.listings_page_url, &[], None)
            .await?;
        let value = extract_api_token(&html).ok_or(FetchError::TokenNotFound)?;

        tracing::debug!("Refreshed public listings token");
        *slot = Some(PublicToken::new(value.clone(), self.public_token_ttl));
        Ok(value)
    }

    async fn fetch_reg_listings(&self, term: Term, token: &str) -> Result<String, FetchError> {
        let url = format!("{}/classes/{term}", self.listings_api_url);
        self.get_with_retry(&url, &[("fmt", "json".to_string())], Some(token))
            .await
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn get_terms(&self) -> Result<Vec<TermInfo>, FetchError> {
        let raw: dto::RawTermsResponse = self
            .get_json("/courses/terms", &[("fmt", "json".to_string())])
            .await?;

        let mut terms = raw.into_terms();
        terms.sort_by(|a, b| b.term.cmp(&a.term));
        Ok(terms)
    }

    async fn get_courses(&self, query: &CourseQuery) -> Result<Vec<SubjectListing>, FetchError> {
        let raw: dto::RawCoursesResponse = self
            .get_json("/courses/courses", &query.to_params())
            .await?;
        Ok(raw.into_subjects())
    }

    async fn get_course_details(
        &self,
        listing_id: &str,
        term: Term,
    ) -> Result<CourseDetails, FetchError> {
        let params = [
            ("fmt", "json".to_string()),
            ("term", term.to_string()),
            ("course_id", listing_id.to_string()),
        ];
        let raw: dto::RawDetailsResponse = self.get_json("/courses/details", &params).await?;

        raw.into_details()
            .ok_or_else(|| FetchError::Decode(format!("no course details for {listing_id}")))
    }

    async fn get_seats(
        &self,
        term: Term,
        listing_ids: &[String],
    ) -> Result<SeatsFetch, FetchError> {
        let mut fetch = SeatsFetch::default();

        for batch in listing_ids.chunks(self.seat_batch_size) {
            let params = [
                ("fmt", "json".to_string()),
                ("term", term.to_string()),
                ("course_ids", batch.join(",")),
            ];
            match self.get_json::<dto::RawSeatsResponse>("/courses/seats", &params).await {
                Ok(raw) => fetch.seats.extend(raw.into_seats()),
                Err(e @ FetchError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        %term,
                        course_ids = %batch.join(","),
                        error = %e,
                        "Seat batch failed"
                    );
                    fetch.failed.extend(batch.iter().cloned());
                }
            }
        }

        Ok(fetch)
    }

    async fn get_reg_listings(&self, term: Term) -> Result<Vec<RegListing>, FetchError> {
        let token = self.public_token(false).await?;

        let body = match self.fetch_reg_listings(term, &token).await {
            Err(FetchError::Unauthorized(status)) => {
                tracing::info!(status, "Public listings token rejected, refreshing");
                let token = self.public_token(true).await?;
                self.fetch_reg_listings(term, &token).await?
            }
            other => other?,
        };

        let raw: dto::RawRegListingsResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Decode(format!("registrar listings: {e}")))?;
        Ok(raw.into_listings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_api_token() {
        let html = r#"<script>window.config = {"apiToken":"abc.DEF-123","other":1}</script>"#;
        assert_eq!(extract_api_token(html).as_deref(), Some("abc.DEF-123"));
        assert_eq!(extract_api_token("<html></html>"), None);
    }

    #[test]
    fn test_public_token_freshness() {
        let token = PublicToken::new("t", Duration::from_secs(60));
        assert!(token.is_fresh());

        let expired = PublicToken::new("t", Duration::ZERO);
        assert!(!expired.is_fresh());
    }

    #[test]
    fn test_should_retry() {
        assert!(HttpUpstreamClient::should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(HttpUpstreamClient::should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!HttpUpstreamClient::should_retry(StatusCode::NOT_FOUND));
        assert!(!HttpUpstreamClient::should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_course_query_params() {
        let term: Term = "1252".parse().unwrap();
        let params = CourseQuery::for_term(term).subject("COS").to_params();
        assert!(params.contains(&("subject", "COS".to_string())));
        assert!(params.contains(&("term", "1252".to_string())));

        let params = CourseQuery::for_term(term).to_params();
        assert!(params.contains(&("subject", "all".to_string())));
    }
}
