//! CSV export of the active catalog.

use std::path::Path;

use adwatch_core::{format_iso_date, CatalogEntry};
use adwatch_storage::{ActiveFilter, Catalog};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

pub const DEFAULT_EXPORT_FILE: &str = "ads.csv";
pub const EXPORT_COLUMNS: [&str; 5] = ["title", "price", "location", "date_posted", "link"];

fn push_field(out: &mut String, value: &str) {
    if value.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str("\r\n");
}

/// Renders entries as CSV with a header row; absent values become empty
/// fields.
pub fn write_csv(entries: &[CatalogEntry]) -> String {
    let mut out = String::new();
    push_record(&mut out, EXPORT_COLUMNS);
    for entry in entries {
        let price = entry.price.map(|p| p.to_string()).unwrap_or_default();
        let date = entry.date_posted.map(format_iso_date).unwrap_or_default();
        push_record(
            &mut out,
            [
                entry.title.as_str(),
                price.as_str(),
                entry.location.as_deref().unwrap_or_default(),
                date.as_str(),
                entry.link.as_str(),
            ],
        );
    }
    out
}

/// Queries active entries and writes them to `path`. Returns the row count.
pub async fn export_active(
    catalog: &Catalog,
    filter: &ActiveFilter,
    today: NaiveDate,
    path: &Path,
) -> Result<usize> {
    let entries = catalog
        .query_active(filter, today)
        .await
        .context("querying active entries for export")?;
    tokio::fs::write(path, write_csv(&entries))
        .await
        .with_context(|| format!("writing export to {}", path.display()))?;
    info!(rows = entries.len(), path = %path.display(), "export written");
    Ok(entries.len())
}
