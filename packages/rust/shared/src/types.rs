//! Core domain types for the company aggregation pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId / RunContext
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First eight hex digits, for file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Logging context handed to every component constructor.
///
/// Components attach `run_id` to their spans instead of relying on
/// process-wide state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CompanyQuery
// ---------------------------------------------------------------------------

/// One company to look up. Identity is `name`, case-sensitive, as supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyQuery {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
}

impl CompanyQuery {
    pub fn new(name: impl Into<String>, jurisdiction: Option<String>) -> Self {
        let jurisdiction = jurisdiction
            .map(|j| j.trim().to_string())
            .filter(|j| !j.is_empty());
        Self {
            name: name.into(),
            jurisdiction,
        }
    }

    /// Jurisdiction or the empty string, for prompts and queries.
    pub fn jurisdiction_or_empty(&self) -> &str {
        self.jurisdiction.as_deref().unwrap_or("")
    }

    /// `"{name} {jurisdiction}"`, trimmed when there is no jurisdiction.
    pub fn search_terms(&self) -> String {
        format!("{} {}", self.name, self.jurisdiction_or_empty())
            .trim()
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// SourceName / SourceResult
// ---------------------------------------------------------------------------

/// External data sources, in corpus declaration order.
///
/// The derived `Ord` follows declaration order, so a `BTreeMap` keyed by
/// `SourceName` iterates in the order the corpus is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceName {
    Website,
    ProfessionalNetwork,
    FundingDatabase,
    FilingsRegistry,
    Directory,
    Search,
}

impl SourceName {
    /// Every source in declaration order.
    pub const ALL: [SourceName; 6] = [
        Self::Website,
        Self::ProfessionalNetwork,
        Self::FundingDatabase,
        Self::FilingsRegistry,
        Self::Directory,
        Self::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::ProfessionalNetwork => "professional-network",
            Self::FundingDatabase => "funding-database",
            Self::FilingsRegistry => "filings-registry",
            Self::Directory => "directory",
            Self::Search => "search",
        }
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source '{s}'"))
    }
}

/// A JSON object as produced by a fetcher.
pub type Mapping = serde_json::Map<String, serde_json::Value>;

/// What one fetcher found for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceResult {
    Text(String),
    Structured(Mapping),
    List(Vec<Mapping>),
    Absent,
}

impl SourceResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Serialize a fetcher's typed payload into a `Structured` result.
    /// Anything that is not a JSON object becomes `Absent`.
    pub fn structured<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(serde_json::Value::Object(map)) => Self::Structured(map),
            _ => Self::Absent,
        }
    }
}

// ---------------------------------------------------------------------------
// ExtractedRecord
// ---------------------------------------------------------------------------

/// Structured company description produced by the extraction step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub legal_name: Option<String>,
    /// Jurisdiction the company was queried under.
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub website: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub industry: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub founded_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub company_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub revenue_range: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub total_employees: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, alias = "linkedin_url", deserialize_with = "lenient_string")]
    pub professional_network_url: Option<String>,
    #[serde(default, alias = "crunchbase_url", deserialize_with = "lenient_string")]
    pub funding_profile_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_scores")]
    pub source_data_quality: BTreeMap<String, f64>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub locations: Vec<LocationRecord>,
    #[serde(default, alias = "key_contacts", deserialize_with = "nullable_vec")]
    pub executives: Vec<ContactRecord>,
}

/// One physical location of a company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub location_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_headquarters: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub address_line1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub address_line2: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state_province: Option<String>,
    #[serde(default, alias = "postal_code", deserialize_with = "lenient_string")]
    pub zip_postal: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub latitude: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub longitude: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fax: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location_employees: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub year_established: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub facility_size: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub products_services: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
}

/// A named person associated with the company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, alias = "position", deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, alias = "linkedin", deserialize_with = "lenient_string")]
    pub profile_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Accept strings, numbers and booleans as text; arrays of scalars are joined
/// with `"; "`. Objects and nested arrays are a shape error.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(v) => scalar_text(&v).map_err(D::Error::custom),
    }
}

fn scalar_text(value: &serde_json::Value) -> std::result::Result<Option<String>, String> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if item.is_array() || item.is_object() {
                    return Err("expected a scalar or list of scalars".into());
                }
                if let Some(text) = scalar_text(item)? {
                    parts.push(text);
                }
            }
            Ok(if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            })
        }
        Value::Object(_) => Err("expected a scalar, found an object".into()),
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Some(true)),
            "false" | "no" | "n" | "0" => Ok(Some(false)),
            _ => Ok(None),
        },
        Some(Value::Number(n)) => Ok(n.as_i64().map(|v| v != 0)),
        Some(_) => Err(D::Error::custom("expected a boolean")),
    }
}

/// Scores may arrive as numbers or numeric strings; anything else is dropped.
fn lenient_scores<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map
            .into_iter()
            .filter_map(|(k, v)| {
                let score = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                score.map(|s| (k, s))
            })
            .collect()),
        Some(_) => Err(D::Error::custom("source_data_quality must be an object")),
    }
}

fn nullable_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// OutputRow
// ---------------------------------------------------------------------------

/// Output CSV columns, in file order. Must match [`OutputRow`]'s field order.
pub const OUTPUT_FIELDS: [&str; 37] = [
    "company_name",
    "legal_name",
    "state",
    "country",
    "website",
    "industry",
    "founded_year",
    "company_type",
    "revenue_range",
    "total_employees",
    "total_locations",
    "description",
    "professional_network_url",
    "funding_profile_url",
    "location_id",
    "location_type",
    "is_headquarters",
    "address_line1",
    "address_line2",
    "city",
    "state_province",
    "zip_postal",
    "location_country",
    "latitude",
    "longitude",
    "phone",
    "fax",
    "location_employees",
    "year_established",
    "facility_size",
    "products_services",
    "executive_name",
    "executive_title",
    "executive_email",
    "source",
    "last_updated",
    "data_quality_score",
];

/// One company × one location, flattened. Missing values are `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub company_name: String,
    pub legal_name: String,
    pub state: String,
    pub country: String,
    pub website: String,
    pub industry: String,
    pub founded_year: String,
    pub company_type: String,
    pub revenue_range: String,
    pub total_employees: String,
    pub total_locations: String,
    pub description: String,
    pub professional_network_url: String,
    pub funding_profile_url: String,
    pub location_id: String,
    pub location_type: String,
    pub is_headquarters: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state_province: String,
    pub zip_postal: String,
    pub location_country: String,
    pub latitude: String,
    pub longitude: String,
    pub phone: String,
    pub fax: String,
    pub location_employees: String,
    pub year_established: String,
    pub facility_size: String,
    pub products_services: String,
    pub executive_name: String,
    pub executive_title: String,
    pub executive_email: String,
    pub source: String,
    pub last_updated: String,
    pub data_quality_score: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn query_normalizes_blank_jurisdiction() {
        let q = CompanyQuery::new("Acme Corp", Some("  ".into()));
        assert_eq!(q.jurisdiction, None);
        assert_eq!(q.search_terms(), "Acme Corp");

        let q = CompanyQuery::new("Acme Corp", Some("TX".into()));
        assert_eq!(q.search_terms(), "Acme Corp TX");
    }

    #[test]
    fn source_names_follow_declaration_order() {
        let mut names = vec![SourceName::Search, SourceName::Website, SourceName::Directory];
        names.sort();
        assert_eq!(
            names,
            vec![SourceName::Website, SourceName::Directory, SourceName::Search]
        );
        assert_eq!("filings-registry".parse::<SourceName>(), Ok(SourceName::FilingsRegistry));
        assert!("myspace".parse::<SourceName>().is_err());
    }

    #[test]
    fn source_result_serializes_tagged() {
        let json = serde_json::to_string(&SourceResult::Absent).unwrap();
        assert_eq!(json, r#"{"kind":"absent"}"#);

        let text = SourceResult::Text("hello".into());
        let back: SourceResult =
            serde_json::from_str(&serde_json::to_string(&text).unwrap()).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn extracted_record_accepts_loose_scalars() {
        let json = r#"{
            "company_name": "Acme Corp",
            "founded_year": 1998,
            "total_employees": "1,200",
            "linkedin_url": "https://www.linkedin.com/company/acme",
            "source_data_quality": {"website": 80, "sec": "65", "overall": null},
            "locations": [
                {"location_id": 1, "is_headquarters": "yes", "city": "Austin",
                 "products_services": ["widgets", "gears"]}
            ],
            "executives": null,
            "competitors": ["Globex"]
        }"#;
        let record: ExtractedRecord = serde_json::from_str(json).expect("lenient parse");
        assert_eq!(record.founded_year.as_deref(), Some("1998"));
        assert_eq!(
            record.professional_network_url.as_deref(),
            Some("https://www.linkedin.com/company/acme")
        );
        assert_eq!(record.source_data_quality.get("sec"), Some(&65.0));
        assert!(!record.source_data_quality.contains_key("overall"));
        assert_eq!(record.locations[0].location_id.as_deref(), Some("1"));
        assert_eq!(record.locations[0].is_headquarters, Some(true));
        assert_eq!(
            record.locations[0].products_services.as_deref(),
            Some("widgets; gears")
        );
        assert!(record.executives.is_empty());
    }

    #[test]
    fn extracted_record_rejects_object_scalar() {
        let json = r#"{"company_name": {"value": "Acme"}}"#;
        assert!(serde_json::from_str::<ExtractedRecord>(json).is_err());

        let json = r#"{"locations": "Austin, TX"}"#;
        assert!(serde_json::from_str::<ExtractedRecord>(json).is_err());
    }

    #[test]
    fn null_strings_become_none() {
        let json = r#"{"legal_name": "null", "website": "  "}"#;
        let record: ExtractedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.legal_name, None);
        assert_eq!(record.website, None);
    }
}
