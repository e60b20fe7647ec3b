//! J-Quants API client.
//!
//! Implements all three provider traits over the J-Quants v1 REST API:
//! refresh-token authentication, `fins/statements`, `prices/daily_quotes` and
//! `listed/info`. Paginated responses are followed through `pagination_key`.
//!
//! There is no retry loop here. Transient failures surface to the caller,
//! which decides whether to skip a date or a trade. Only the circuit breaker
//! keeps us from hammering the API after a block.

use super::circuit_breaker::{parse_retry_after, CircuitBreaker};
use super::provider::{DataError, ListedInfoProvider, PriceProvider, StatementProvider};
use crate::domain::{parse_amount, Forecast, PriceBar, Statement, Ticker};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.jquants.com/v1";

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "idToken")]
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct StatementsPage {
    #[serde(default)]
    statements: Vec<RawStatement>,
    pagination_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatement {
    local_code: String,
    disclosed_date: String,
    #[serde(default)]
    operating_profit: String,
    #[serde(default)]
    forecast_net_sales: String,
    #[serde(default)]
    forecast_operating_profit: String,
    #[serde(default)]
    next_year_forecast_net_sales: String,
    #[serde(default)]
    next_year_forecast_operating_profit: String,
}

#[derive(Debug, Deserialize)]
struct QuotesPage {
    #[serde(default)]
    daily_quotes: Vec<RawQuote>,
    pagination_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawQuote {
    date: String,
    code: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ListedPage {
    #[serde(default)]
    info: Vec<RawListed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawListed {
    code: String,
    company_name: String,
}

/// J-Quants API client (blocking).
pub struct JQuantsClient {
    client: reqwest::blocking::Client,
    base_url: String,
    refresh_token: String,
    id_token: Mutex<Option<String>>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl JQuantsClient {
    pub fn new(
        refresh_token: impl Into<String>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        Self::with_base_url(refresh_token, DEFAULT_BASE_URL, circuit_breaker)
    }

    pub fn with_base_url(
        refresh_token: impl Into<String>,
        base_url: impl Into<String>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_token: refresh_token.into(),
            id_token: Mutex::new(None),
            circuit_breaker,
        })
    }

    fn cached_token(&self) -> Option<String> {
        self.id_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_token(&self, token: Option<String>) {
        *self.id_token.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }

    /// Exchange the refresh token for an id token.
    fn authenticate(&self) -> Result<String, DataError> {
        let url = format!("{}/token/auth_refresh", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("refreshtoken", self.refresh_token.as_str())])
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DataError::AuthenticationFailed(format!(
                "status {} body: {body}",
                status.as_u16()
            )));
        }

        let auth: AuthResponse = resp
            .json()
            .map_err(|e| DataError::ResponseFormatChanged(format!("auth response: {e}")))?;
        self.store_token(Some(auth.id_token.clone()));
        tracing::debug!("authenticated against J-Quants");
        Ok(auth.id_token)
    }

    /// GET a JSON endpoint with the id token, re-authenticating once on 401.
    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = format!("{}{path}", self.base_url);
        let mut reauthenticated = false;

        loop {
            let token = match self.cached_token() {
                Some(token) => token,
                None => self.authenticate()?,
            };

            let resp = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        self.circuit_breaker.record_failure();
                    }
                    DataError::NetworkUnreachable(e.to_string())
                })?;

            let status = resp.status();

            if status == reqwest::StatusCode::UNAUTHORIZED && !reauthenticated {
                self.store_token(None);
                reauthenticated = true;
                continue;
            }

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                self.circuit_breaker.record_rate_limited(retry_after);
                return Err(DataError::RateLimited);
            }

            if !status.is_success() {
                if status.is_server_error() {
                    self.circuit_breaker.record_failure();
                }
                let body = resp.text().unwrap_or_default();
                return Err(DataError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed = resp.json::<T>().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse {path}: {e}"))
            })?;
            self.circuit_breaker.record_success();
            return Ok(parsed);
        }
    }
}

/// Parse the dates J-Quants emits (`2025-07-10` or `20250710`).
fn parse_api_date(raw: &str) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| DataError::ResponseFormatChanged(format!("invalid date: {raw}")))
}

fn convert_statement(raw: RawStatement) -> Result<Statement, DataError> {
    Ok(Statement {
        disclosed_date: parse_api_date(&raw.disclosed_date)?,
        ticker: raw.local_code,
        operating_profit: parse_amount(&raw.operating_profit),
        current_year: Forecast {
            net_sales: parse_amount(&raw.forecast_net_sales),
            operating_profit: parse_amount(&raw.forecast_operating_profit),
        },
        next_year: Forecast {
            net_sales: parse_amount(&raw.next_year_forecast_net_sales),
            operating_profit: parse_amount(&raw.next_year_forecast_operating_profit),
        },
    })
}

/// Null prices (trading halts) become NaN. The bar is kept so the session
/// still occupies its date and alignment reports it as invalid price data.
fn convert_quote(raw: RawQuote) -> Result<PriceBar, DataError> {
    Ok(PriceBar {
        date: parse_api_date(&raw.date)?,
        ticker: raw.code,
        open: raw.open.unwrap_or(f64::NAN),
        high: raw.high.unwrap_or(f64::NAN),
        low: raw.low.unwrap_or(f64::NAN),
        close: raw.close.unwrap_or(f64::NAN),
        volume: raw.volume.unwrap_or(0.0),
    })
}

impl StatementProvider for JQuantsClient {
    fn statements(&self, date: NaiveDate) -> Result<Vec<Statement>, DataError> {
        let mut out = Vec::new();
        let mut pagination_key: Option<String> = None;

        loop {
            let mut query = vec![("date", date.format("%Y-%m-%d").to_string())];
            if let Some(key) = pagination_key.take() {
                query.push(("pagination_key", key));
            }
            let page: StatementsPage = self.get_json("/fins/statements", &query)?;
            for raw in page.statements {
                out.push(convert_statement(raw)?);
            }
            match page.pagination_key {
                Some(key) if !key.is_empty() => pagination_key = Some(key),
                _ => break,
            }
        }

        Ok(out)
    }
}

impl PriceProvider for JQuantsClient {
    fn daily_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let mut bars = Vec::new();
        let mut pagination_key: Option<String> = None;

        loop {
            let mut query = vec![
                ("code", ticker.to_string()),
                ("from", from.format("%Y-%m-%d").to_string()),
                ("to", to.format("%Y-%m-%d").to_string()),
            ];
            if let Some(key) = pagination_key.take() {
                query.push(("pagination_key", key));
            }
            let page: QuotesPage = self.get_json("/prices/daily_quotes", &query)?;
            for raw in page.daily_quotes {
                bars.push(convert_quote(raw)?);
            }
            match page.pagination_key {
                Some(key) if !key.is_empty() => pagination_key = Some(key),
                _ => break,
            }
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

impl ListedInfoProvider for JQuantsClient {
    fn listed_names(&self) -> Result<HashMap<Ticker, String>, DataError> {
        let page: ListedPage = self.get_json("/listed/info", &[])?;
        Ok(page
            .info
            .into_iter()
            .map(|item| (item.code, item.company_name))
            .collect())
    }
}
