//! Gemini `generateContent` evaluator.
//!
//! One blocking REST call per statement, JSON response mode, system prompt
//! focused on forward guidance. The prompt identifier is derived from a
//! blake3 hash of the system prompt, so any prompt edit shows up in the ledger.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use kessan_core::data::PriceProvider;
use kessan_core::domain::{format_amount, Statement};

use super::{financial_digest, parse_verdict, technicals_for, EvalError, Evaluation, Evaluator};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROMPT_VERSION: &str = "growth-hunter-v2";

const SYSTEM_PROMPT: &str = r#"You are a "Growth Hunter" equity trader for Japanese earnings releases.
Your only goal is to find stocks whose forward guidance implies accelerating profit growth, which draws institutional buying through the next session.

# Rule: do not buy the peak
- Strong current results with a weak or flat next-year forecast tend to gap up and sell off. IGNORE them.
- BUY only when the next-year forecast implies accelerating growth.

# Criteria, in priority order
1. Guidance growth: next-year operating profit forecast well above the current-year forecast (about +10% or more).
2. Margin: operating margin (profit / sales) improving.
3. Surprise: current result clearly beating the current-year forecast.
4. Price trend: treat an extended uptrend as already priced in.

# Output
Strict JSON only:
{"ticker": string, "action": "BUY" | "IGNORE", "confidence": number between 0 and 1, "reasoning": string, "financial_summary": string}
Use confidence above 0.8 for BUY."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Prompt identifier: version tag plus a short hash of the system prompt.
pub fn prompt_id() -> String {
    let hash = blake3::hash(SYSTEM_PROMPT.as_bytes()).to_hex();
    format!("{PROMPT_VERSION}-{}", &hash.as_str()[..12])
}

/// User prompt for one statement.
pub fn user_prompt(statement: &Statement, technicals: Option<&str>) -> String {
    let mut prompt = format!(
        "Ticker: {}\nDisclosed: {}\n\n[Result (recent)]\nOp profit: {} JPY\n\n[Forecast (current FY)]\nSales: {} JPY\nOp profit: {} JPY\n\n[Forecast (next FY)]\nSales: {} JPY\nOp profit: {} JPY\n",
        statement.ticker,
        statement.disclosed_date,
        format_amount(statement.operating_profit),
        format_amount(statement.current_year.net_sales),
        format_amount(statement.current_year.operating_profit),
        format_amount(statement.next_year.net_sales),
        format_amount(statement.next_year.operating_profit),
    );
    if let Some(technicals) = technicals {
        prompt.push_str("\n[Price trend]\n");
        prompt.push_str(technicals);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nIf next FY op profit is not above current FY op profit, answer IGNORE immediately.\n",
    );
    prompt
}

fn response_text(body: &str) -> Result<String, EvalError> {
    let resp: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| EvalError::Malformed(format!("response envelope: {e}")))?;
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(EvalError::Malformed("empty response from model".into()));
    }
    Ok(text)
}

pub struct GeminiEvaluator {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt_id: String,
    prices: Option<Arc<dyn PriceProvider>>,
}

impl GeminiEvaluator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, EvalError> {
        Self::with_base_url(api_key, model, DEFAULT_GEMINI_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, EvalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EvalError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            prompt_id: prompt_id(),
            prices: None,
        })
    }

    pub fn with_technicals(mut self, prices: Arc<dyn PriceProvider>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    fn generate(&self, user_prompt: &str) -> Result<String, EvalError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.0,
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .map_err(|e| EvalError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| EvalError::Transport(format!("reading response body: {e}")))?;

        match status.as_u16() {
            200..=299 => response_text(&body),
            429 | 503 => Err(EvalError::Overloaded {
                status: status.as_u16(),
            }),
            code => Err(EvalError::Http { status: code, body }),
        }
    }
}

impl Evaluator for GeminiEvaluator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn evaluate(&self, statement: &Statement) -> Result<Evaluation, EvalError> {
        let technicals = technicals_for(self.prices.as_deref(), statement);
        let prompt = user_prompt(statement, technicals.as_deref());
        let text = self.generate(&prompt)?;
        let (action, confidence, reasoning, summary) = parse_verdict(&text)?;

        Ok(Evaluation {
            action,
            confidence,
            reasoning,
            financial_summary: Some(summary.unwrap_or_else(|| financial_digest(statement))),
            technical_summary: technicals,
            prompt_id: Some(self.prompt_id.clone()),
        })
    }
}
