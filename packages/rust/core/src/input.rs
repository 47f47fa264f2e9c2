//! Input loading: JSON arrays or delimited text into [`CompanyQuery`] records.

use std::path::Path;

use serde_json::Value;
use tracing::{info, instrument, warn};

use firmscope_shared::{CompanyQuery, FirmscopeError, Result};

/// Column / key names accepted for the company name, in priority order.
const NAME_KEYS: [&str; 4] = ["company", "company_name", "name", "organization"];

/// Column / key names accepted for the jurisdiction, in priority order.
const JURISDICTION_KEYS: [&str; 6] = [
    "state",
    "state_code",
    "state_country",
    "region",
    "location",
    "jurisdiction",
];

/// Bytes inspected when sniffing the delimiter.
const SNIFF_BYTES: usize = 1024;

/// Load companies from `path`, keeping at most `max` of them.
///
/// Records with an empty name are skipped with a warning. An unreadable
/// file, malformed content, or no usable records is an input error.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_companies(path: &Path, max: Option<usize>) -> Result<Vec<CompanyQuery>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FirmscopeError::Input(format!("cannot read {}: {e}", path.display())))?;
    let content = content.trim_start_matches('\u{feff}');

    let mut companies = if content.trim_start().starts_with('[') {
        parse_json(content)?
    } else {
        parse_delimited(content)?
    };

    if companies.is_empty() {
        return Err(FirmscopeError::Input(format!(
            "no companies found in {}",
            path.display()
        )));
    }
    if let Some(max) = max {
        companies.truncate(max);
    }

    info!(count = companies.len(), "companies loaded");
    Ok(companies)
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn parse_json(content: &str) -> Result<Vec<CompanyQuery>> {
    let items: Vec<Value> = serde_json::from_str(content)
        .map_err(|e| FirmscopeError::Input(format!("invalid JSON input: {e}")))?;

    let mut companies = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let (name, jurisdiction) = match item {
            Value::String(name) => (Some(name.clone()), None),
            Value::Object(map) => {
                let lookup = |keys: &[&str]| {
                    keys.iter().find_map(|key| {
                        map.iter()
                            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
                            .and_then(|(_, v)| scalar(v))
                    })
                };
                (lookup(&NAME_KEYS), lookup(&JURISDICTION_KEYS))
            }
            other => {
                warn!(index, kind = %json_kind(other), "skipping non-object input record");
                continue;
            }
        };
        push_company(&mut companies, index, name, jurisdiction);
    }
    Ok(companies)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// `|` if it appears in the first [`SNIFF_BYTES`] bytes, else `,`.
pub fn sniff_delimiter(content: &str) -> u8 {
    let head = &content.as_bytes()[..content.len().min(SNIFF_BYTES)];
    if head.contains(&b'|') { b'|' } else { b',' }
}

fn parse_delimited(content: &str) -> Result<Vec<CompanyQuery>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(content))
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FirmscopeError::Input(format!("unreadable header row: {e}")))?
        .clone();
    let name_col = find_column(&headers, &NAME_KEYS).unwrap_or(0);
    let jurisdiction_col = find_column(&headers, &JURISDICTION_KEYS);

    let mut companies = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| FirmscopeError::Input(format!("malformed row {}: {e}", index + 2)))?;
        let name = record.get(name_col).map(str::to_string);
        let jurisdiction = jurisdiction_col
            .and_then(|col| record.get(col))
            .map(str::to_string);
        push_company(&mut companies, index, name, jurisdiction);
    }
    Ok(companies)
}

fn find_column(headers: &csv::StringRecord, keys: &[&str]) -> Option<usize> {
    keys.iter().find_map(|key| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(key))
    })
}

fn push_company(
    companies: &mut Vec<CompanyQuery>,
    index: usize,
    name: Option<String>,
    jurisdiction: Option<String>,
) {
    match name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        Some(name) => companies.push(CompanyQuery::new(name, jurisdiction)),
        None => warn!(index, "skipping input record with empty company name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from("../../../fixtures/input").join(name)
    }

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_csv_fixture() {
        let companies = load_companies(&fixture("companies.csv"), None).unwrap();
        assert_eq!(companies.len(), 3);
        assert_eq!(companies[0], CompanyQuery::new("Acme Corp", Some("TX".into())));
        assert_eq!(companies[1].name, "Globex Corporation");
        assert_eq!(companies[2].jurisdiction, None);
    }

    #[test]
    fn loads_pipe_fixture() {
        let companies = load_companies(&fixture("companies.psv"), None).unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].name, "Initech, Inc.");
        assert_eq!(companies[0].jurisdiction.as_deref(), Some("CA"));
    }

    #[test]
    fn loads_json_fixture() {
        let companies = load_companies(&fixture("companies.json"), None).unwrap();
        assert_eq!(companies.len(), 3);
        assert_eq!(companies[0], CompanyQuery::new("Acme Corp", Some("TX".into())));
        assert_eq!(companies[1].name, "Umbrella Holdings");
        assert_eq!(companies[2], CompanyQuery::new("Hooli", None));
    }

    #[test]
    fn headers_match_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "in.csv", "ID,Organization,Region\n1,Acme Corp,TX\n");
        let companies = load_companies(&path, None).unwrap();
        assert_eq!(companies, vec![CompanyQuery::new("Acme Corp", Some("TX".into()))]);
    }

    #[test]
    fn first_column_when_no_name_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "in.csv", "firm,hq\nAcme Corp,Austin\n");
        let companies = load_companies(&path, None).unwrap();
        assert_eq!(companies, vec![CompanyQuery::new("Acme Corp", None)]);
    }

    #[test]
    fn empty_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "in.csv", "company,state\n  ,TX\nAcme Corp,TX\n");
        let companies = load_companies(&path, None).unwrap();
        assert_eq!(companies.len(), 1);

        let path = write(&dir, "in.json", r#"[{"name": ""}, {"Company_Name": "Acme Corp"}, 7]"#);
        let companies = load_companies(&path, None).unwrap();
        assert_eq!(companies, vec![CompanyQuery::new("Acme Corp", None)]);
    }

    #[test]
    fn max_companies_truncates() {
        let companies = load_companies(&fixture("companies.csv"), Some(2)).unwrap();
        assert_eq!(companies.len(), 2);
    }

    #[test]
    fn sniffing_only_looks_at_the_head() {
        assert_eq!(sniff_delimiter("company|state\nAcme|TX"), b'|');
        assert_eq!(sniff_delimiter("company,state\nAcme,TX"), b',');
        let late_pipe = format!("company\n{}|", "a".repeat(SNIFF_BYTES));
        assert_eq!(sniff_delimiter(&late_pipe), b',');
    }

    #[test]
    fn unusable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_companies(&dir.path().join("missing.csv"), None),
            Err(FirmscopeError::Input(_))
        ));

        let path = write(&dir, "bad.json", "[{\"name\": ");
        assert!(matches!(load_companies(&path, None), Err(FirmscopeError::Input(_))));

        let path = write(&dir, "empty.csv", "company,state\n");
        assert!(matches!(load_companies(&path, None), Err(FirmscopeError::Input(_))));
    }
}
