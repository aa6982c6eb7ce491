//! Upstream book lookup
//!
//! [`LookupClient`] is the seam the workers call through. [`HttpLookupClient`] talks to a
//! JSON item-lookup API keyed by ISBN and folds every response into a [`LookupOutcome`];
//! transport and protocol failures are outcomes, never errors.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::isbn::{self, IsbnKind};
use super::models::{AuthorCredit, BookPayload, LookupOutcome};
use super::quota::Credential;

/// Default lookup endpoint
pub const DEFAULT_BASE_URL: &str = "https://www.aladin.co.kr/ttb/api/ItemLookUp.aspx";

/// Upstream error code for "daily query limit exceeded"
pub const DEFAULT_QUOTA_ERROR_CODE: i64 = 10;

const API_VERSION: &str = "20131101";

/// Performs one lookup for one key with one credential
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn lookup(&self, external_key: &str, credential: &Credential) -> LookupOutcome;
}

/// Settings for [`HttpLookupClient`]
#[derive(Debug, Clone)]
pub struct HttpLookupConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// `errorCode` values that mean the credential's quota is spent
    pub quota_error_codes: Vec<i64>,
}

impl Default for HttpLookupConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            quota_error_codes: vec![DEFAULT_QUOTA_ERROR_CODE],
        }
    }
}

/// reqwest-backed [`LookupClient`]
#[derive(Debug, Clone)]
pub struct HttpLookupClient {
    client: reqwest::Client,
    config: HttpLookupConfig,
}

impl HttpLookupClient {
    pub fn new(config: HttpLookupConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("catalog-enrich/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    fn classify_body(&self, body: LookupResponse) -> LookupOutcome {
        if let Some(code) = body.error_code {
            if self.config.quota_error_codes.contains(&code) {
                return LookupOutcome::RateLimited;
            }
            return LookupOutcome::UnknownError(format!(
                "upstream error {code}: {}",
                body.error_message.unwrap_or_default()
            ));
        }

        match body.item.into_iter().next() {
            Some(item) => LookupOutcome::Found(item.into_payload()),
            None => LookupOutcome::NotFound,
        }
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn lookup(&self, external_key: &str, credential: &Credential) -> LookupOutcome {
        let id_type = isbn::kind(external_key).unwrap_or(IsbnKind::Isbn13).id_type();

        let response = match self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("ttbkey", credential.key()),
                ("itemIdType", id_type),
                ("ItemId", external_key),
                ("output", "js"),
                ("Version", API_VERSION),
                ("OptResult", "authors,toc"),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return transport_outcome(e),
        };

        let status = response.status();
        debug!(
            credential = credential.index(),
            key = external_key,
            status = status.as_u16(),
            "Lookup response"
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            return LookupOutcome::RateLimited;
        }
        if status == StatusCode::NOT_FOUND {
            return LookupOutcome::NotFound;
        }
        if status.is_server_error() {
            return LookupOutcome::NetworkError(format!("upstream returned {status}"));
        }
        if !status.is_success() {
            return LookupOutcome::UnknownError(format!("upstream returned {status}"));
        }

        match response.json::<LookupResponse>().await {
            Ok(body) => self.classify_body(body),
            Err(e) if e.is_timeout() => LookupOutcome::NetworkError(e.to_string()),
            Err(e) => LookupOutcome::UnknownError(format!("undecodable response: {e}")),
        }
    }
}

fn transport_outcome(err: reqwest::Error) -> LookupOutcome {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        LookupOutcome::NetworkError(err.to_string())
    } else {
        LookupOutcome::UnknownError(err.to_string())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    item: Vec<ItemDto>,
    #[serde(rename = "errorCode")]
    error_code: Option<i64>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDto {
    description: Option<String>,
    price_standard: Option<i64>,
    pub_date: Option<String>,
    category_name: Option<String>,
    cover: Option<String>,
    sub_info: Option<SubInfoDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubInfoDto {
    sub_title: Option<String>,
    item_page: Option<i32>,
    toc: Option<String>,
    #[serde(default)]
    authors: Vec<AuthorDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorDto {
    author_name: String,
    author_type_desc: Option<String>,
}

impl ItemDto {
    fn into_payload(self) -> BookPayload {
        let sub_info = self.sub_info.unwrap_or_default();

        BookPayload {
            description: self.description,
            price: self.price_standard,
            published_date: self
                .pub_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
            subtitle: sub_info.sub_title,
            page_count: sub_info.item_page,
            toc: sub_info.toc,
            authors: sub_info
                .authors
                .into_iter()
                .map(|a| AuthorCredit::new(a.author_name, a.author_type_desc.as_deref()))
                .collect(),
            tags: self
                .category_name
                .as_deref()
                .map(category_tags)
                .unwrap_or_default(),
            cover_url: self.cover,
        }
    }
}

/// "Books>Fiction>Korean" -> ["Books", "Fiction", "Korean"]
fn category_tags(category: &str) -> Vec<String> {
    category
        .split('>')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
