//! Corpus → [`ExtractedRecord`] via the inference client.
//!
//! The model's reply is parsed through an ordered chain (whole text, fenced
//! code block, outermost braces), validated against the record shape, and
//! replaced by a minimal fallback record whenever any step fails.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;
use tracing::{info, instrument, warn};

use firmscope_crawler::truncate_chars;
use firmscope_shared::{CompanyQuery, ExtractedRecord, InferenceConfig, LocationRecord, RunContext};

use crate::inference::InferenceClient;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("static regex")
});

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Step at which extraction gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    /// The inference call timed out, failed to start, or exited non-zero.
    Inference,
    /// No JSON could be recovered from the reply.
    Parse,
    /// JSON was found but does not have the record's shape.
    Validation,
    /// The company's worker task died before producing a record.
    Worker,
}

impl std::fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Inference => "inference",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Worker => "worker",
        })
    }
}

/// Which path produced the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Extracted,
    Fallback { stage: ExtractionStage, cause: String },
}

impl ExtractionOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Record plus the path taken to get it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ExtractedRecord,
    pub outcome: ExtractionOutcome,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Builds prompts, calls the model, and turns its reply into a record.
#[derive(Clone)]
pub struct ExtractionEngine {
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
    corpus_cap: usize,
    ctx: RunContext,
}

impl ExtractionEngine {
    pub fn new(client: Arc<dyn InferenceClient>, config: &InferenceConfig, ctx: RunContext) -> Self {
        Self {
            client,
            timeout: config.timeout(),
            corpus_cap: config.prompt_corpus_cap,
            ctx,
        }
    }

    /// Extract a record for `query` from `corpus`. Never fails: every error
    /// path yields the fallback record.
    #[instrument(
        skip_all,
        fields(run_id = %self.ctx.run_id, company = %query.name, stage = "extraction")
    )]
    pub async fn extract(&self, query: &CompanyQuery, corpus: &str) -> Extraction {
        let prompt = build_prompt(query, corpus, self.corpus_cap);
        let started = Instant::now();

        let reply = match self.client.infer(&prompt, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => return fallback(query, ExtractionStage::Inference, e.to_string()),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(value) = parse_response(&reply) else {
            return fallback(
                query,
                ExtractionStage::Parse,
                format!("no JSON object in {} chars of output", reply.len()),
            );
        };

        match validate_record(value, query) {
            Ok(record) => {
                info!(
                    elapsed_ms,
                    locations = record.locations.len(),
                    executives = record.executives.len(),
                    "record extracted"
                );
                Extraction {
                    record,
                    outcome: ExtractionOutcome::Extracted,
                }
            }
            Err(cause) => fallback(query, ExtractionStage::Validation, cause),
        }
    }
}

impl std::fmt::Debug for ExtractionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionEngine")
            .field("timeout", &self.timeout)
            .field("corpus_cap", &self.corpus_cap)
            .finish_non_exhaustive()
    }
}

pub(crate) fn fallback(query: &CompanyQuery, stage: ExtractionStage, cause: String) -> Extraction {
    warn!(company = %query.name, %stage, %cause, "extraction failed, using fallback record");
    Extraction {
        record: fallback_record(query),
        outcome: ExtractionOutcome::Fallback { stage, cause },
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

const SCHEMA_TEMPLATE: &str = r#"{
  "company_name": "{company_name}",
  "legal_name": "official legal name if different",
  "state": "{state}",
  "country": "primary country of operation",
  "website": "official website URL",
  "industry": "primary industry",
  "founded_year": "year founded",
  "company_type": "public/private/nonprofit/etc.",
  "revenue_range": "annual revenue estimate",
  "total_employees": "total number of employees",
  "description": "company description",
  "professional_network_url": "company page on the professional network",
  "funding_profile_url": "organization profile in the funding database",
  "executives": [
    {
      "name": "executive name",
      "title": "job title",
      "email": "email if available",
      "profile_url": "personal profile URL if available"
    }
  ],
  "locations": [
    {
      "location_id": 1,
      "location_type": "Headquarters/Branch/Subsidiary/Factory/Office/etc.",
      "is_headquarters": true,
      "address_line1": "street address",
      "address_line2": "suite or floor if applicable",
      "city": "city name",
      "state_province": "state or province",
      "zip_postal": "zip or postal code",
      "country": "country name",
      "latitude": "latitude if available",
      "longitude": "longitude if available",
      "phone": "phone number if available",
      "fax": "fax number if available",
      "location_employees": "number of employees at this location",
      "year_established": "year this location was established",
      "facility_size": "square footage if available",
      "products_services": "products or services at this location",
      "source": "which source this location came from"
    }
  ],
  "source_data_quality": {
    "website": 0,
    "professional-network": 0,
    "funding-database": 0,
    "filings-registry": 0,
    "directory": 0,
    "search": 0,
    "overall": 0
  }
}"#;

const RULES: &str = "\
IMPORTANT RULES:
1. Include EVERY location mentioned in any source.
2. Include ALL available details for each location.
3. Never omit a field; if a value is missing, use null.
4. Never invent information; only use what is in the sources.
5. Include locations that have a city but no street address.
6. If no headquarters is stated, mark the most complete address as headquarters.
7. Include all executives found in any source.
8. Score each source's data quality from 0 to 100, plus an overall score.
9. Use plain strings, numbers or booleans for scalar fields, never nested objects.";

/// Full extraction prompt for `query`, embedding at most `corpus_cap`
/// characters of `corpus`.
pub fn build_prompt(query: &CompanyQuery, corpus: &str, corpus_cap: usize) -> String {
    let jurisdiction = query.jurisdiction_or_empty();
    let schema = SCHEMA_TEMPLATE
        .replace("{company_name}", &json_escape(&query.name))
        .replace("{state}", &json_escape(jurisdiction));
    let location = if jurisdiction.is_empty() {
        String::new()
    } else {
        format!(" from {jurisdiction}")
    };

    format!(
        "Extract ALL available information about \"{name}\"{location} from the data sources below.\n\n\
         Return a JSON object with exactly this structure:\n{schema}\n\n\
         {RULES}\n\n\
         DATA TO ANALYZE:\n{data}\n\n\
         Return ONLY the JSON object without any commentary or explanation.\n",
        name = query.name,
        data = truncate_chars(corpus, corpus_cap),
    )
}

/// Escape for embedding inside a JSON string literal in the template.
fn json_escape(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

// ---------------------------------------------------------------------------
// Parse chain
// ---------------------------------------------------------------------------

/// Recover a JSON value from free-form model output.
///
/// Tries, in order: the whole text, the first fenced code block that parses,
/// the span from the first `{` to the last `}`. Each step only accepts a
/// JSON object; a whole reply that is a JSON string is unwrapped once.
pub fn parse_response(text: &str) -> Option<Value> {
    parse_whole(text)
        .or_else(|| parse_fenced(text))
        .or_else(|| parse_braces(text))
}

fn parse_whole(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()).ok()? {
        Value::String(inner) => parse_object(&inner),
        value => Some(value).filter(Value::is_object),
    }
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn parse_fenced(text: &str) -> Option<Value> {
    FENCED_BLOCK
        .captures_iter(text)
        .find_map(|caps| parse_object(&caps[1]))
}

fn parse_braces(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}

// ---------------------------------------------------------------------------
// Validation / fallback
// ---------------------------------------------------------------------------

/// Check the parsed value has the record's shape and convert it.
///
/// Missing `company_name` / `state` are filled from the query.
pub fn validate_record(value: Value, query: &CompanyQuery) -> Result<ExtractedRecord, String> {
    if !value.is_object() {
        return Err(format!("expected a JSON object, found {}", json_kind(&value)));
    }

    let mut record: ExtractedRecord =
        serde_json::from_value(value).map_err(|e| format!("shape mismatch: {e}"))?;

    if record.company_name.is_none() {
        record.company_name = Some(query.name.clone());
    }
    if record.state.is_none() {
        record.state = query.jurisdiction.clone();
    }
    Ok(record)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Minimal record used when extraction fails: the query plus one
/// placeholder location.
///
/// The jurisdiction lives in the company-level `state`; the placeholder's
/// `state_province` stays empty since no address is known.
pub fn fallback_record(query: &CompanyQuery) -> ExtractedRecord {
    ExtractedRecord {
        company_name: Some(query.name.clone()),
        state: query.jurisdiction.clone(),
        locations: vec![LocationRecord {
            location_id: Some("1".into()),
            location_type: Some("Unknown".into()),
            is_headquarters: None,
            source: Some("fallback".into()),
            ..Default::default()
        }],
        ..Default::default()
    }
}
