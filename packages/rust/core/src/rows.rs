//! Flatten an [`ExtractedRecord`] into output rows, one per location.

use chrono::{DateTime, Utc};

use firmscope_shared::{ContactRecord, ExtractedRecord, LocationRecord, OutputRow};

/// `last_updated` format.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Flatten `record`, stamping rows with the current time.
pub fn transform(record: &ExtractedRecord) -> Vec<OutputRow> {
    transform_at(record, Utc::now())
}

/// Flatten `record` with an explicit `last_updated` timestamp.
///
/// Yields `max(1, record.locations.len())` rows. The first executive, if any,
/// is attached to every row.
pub fn transform_at(record: &ExtractedRecord, now: DateTime<Utc>) -> Vec<OutputRow> {
    let company = company_row(record, now);
    if record.locations.is_empty() {
        return vec![company];
    }

    record
        .locations
        .iter()
        .map(|location| with_location(company.clone(), location))
        .collect()
}

fn company_row(record: &ExtractedRecord, now: DateTime<Utc>) -> OutputRow {
    let executive = record.executives.first().cloned().unwrap_or_default();
    let ContactRecord {
        name: executive_name,
        title: executive_title,
        email: executive_email,
        ..
    } = executive;

    OutputRow {
        company_name: text(&record.company_name),
        legal_name: text(&record.legal_name),
        state: text(&record.state),
        country: text(&record.country),
        website: text(&record.website),
        industry: text(&record.industry),
        founded_year: text(&record.founded_year),
        company_type: text(&record.company_type),
        revenue_range: text(&record.revenue_range),
        total_employees: text(&record.total_employees),
        total_locations: record.locations.len().to_string(),
        description: text(&record.description),
        professional_network_url: text(&record.professional_network_url),
        funding_profile_url: text(&record.funding_profile_url),
        executive_name: executive_name.unwrap_or_default(),
        executive_title: executive_title.unwrap_or_default(),
        executive_email: executive_email.unwrap_or_default(),
        last_updated: now.format(TIMESTAMP_FORMAT).to_string(),
        data_quality_score: quality_score(record),
        ..Default::default()
    }
}

fn with_location(mut row: OutputRow, location: &LocationRecord) -> OutputRow {
    row.location_id = text(&location.location_id);
    row.location_type = text(&location.location_type);
    row.is_headquarters = location
        .is_headquarters
        .map(|hq| hq.to_string())
        .unwrap_or_default();
    row.address_line1 = text(&location.address_line1);
    row.address_line2 = text(&location.address_line2);
    row.city = text(&location.city);
    row.state_province = text(&location.state_province);
    row.zip_postal = text(&location.zip_postal);
    row.location_country = text(&location.country);
    row.latitude = text(&location.latitude);
    row.longitude = text(&location.longitude);
    row.phone = text(&location.phone);
    row.fax = text(&location.fax);
    row.location_employees = text(&location.location_employees);
    row.year_established = text(&location.year_established);
    row.facility_size = text(&location.facility_size);
    row.products_services = text(&location.products_services);
    row.source = text(&location.source);
    row
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// `overall` if the model gave one, else the rounded mean of the other
/// scores, else empty.
fn quality_score(record: &ExtractedRecord) -> String {
    let scores = &record.source_data_quality;
    if let Some(overall) = scores.get("overall") {
        return format_score(*overall);
    }

    let (sum, count) = scores
        .values()
        .fold((0.0, 0usize), |(sum, count), score| (sum + score, count + 1));
    if count == 0 {
        return String::new();
    }
    format_score((sum / count as f64).round())
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        score.to_string()
    }
}
