use std::path::Path;

use chrono::NaiveDate;

use crate::error::BotError;
use crate::features::{ensure_canonical, FeatureRow, FEATURE_COLUMNS, FEATURE_COUNT};
use crate::Result;

const LEADING_COLUMNS: [&str; 3] = ["date", "symbol", "close"];
const LABEL_COLUMN: &str = "label";

/// Header of the feature matrix CSV
pub fn dataset_header() -> Vec<&'static str> {
    LEADING_COLUMNS
        .iter()
        .chain(FEATURE_COLUMNS.iter())
        .chain(std::iter::once(&LABEL_COLUMN))
        .copied()
        .collect()
}

/// Write feature rows as `date,symbol,close,<features>,label`.
///
/// An unknown label (tail rows) is written as an empty field.
pub fn write_dataset(path: impl AsRef<Path>, rows: &[FeatureRow]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(dataset_header())?;

    for row in rows {
        let mut record: Vec<String> = Vec::with_capacity(FEATURE_COUNT + 4);
        record.push(row.date.to_string());
        record.push(row.symbol.clone());
        record.push(row.close.to_string());
        record.extend(row.features.iter().map(f64::to_string));
        record.push(row.label.map(|l| l.to_string()).unwrap_or_default());
        writer.write_record(&record)?;
    }
    writer.flush()?;

    tracing::info!("💾 Wrote {} feature rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read a feature matrix written by [`write_dataset`].
///
/// Fails with `SchemaMismatch` when the feature columns are not the
/// canonical list in canonical order.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<Vec<FeatureRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    check_header(&headers)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let bad_row = |what: &str| {
            BotError::SchemaMismatch(format!("{} row {}: invalid {}", path.display(), line + 1, what))
        };

        let date = NaiveDate::parse_from_str(field(0), "%Y-%m-%d").map_err(|_| bad_row("date"))?;
        let symbol = field(1).to_string();
        let close: f64 = field(2).parse().map_err(|_| bad_row("close"))?;

        let features = (0..FEATURE_COUNT)
            .map(|i| {
                field(3 + i)
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| bad_row(FEATURE_COLUMNS[i]))
            })
            .collect::<Result<Vec<f64>>>()?;

        let label = match field(3 + FEATURE_COUNT) {
            "" => None,
            raw => Some(raw.parse::<u8>().map_err(|_| bad_row(LABEL_COLUMN))?),
        };

        rows.push(FeatureRow {
            date,
            symbol,
            close,
            features,
            label,
        });
    }

    tracing::debug!("Read {} feature rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn check_header(headers: &[String]) -> Result<()> {
    if headers.len() != FEATURE_COUNT + 4 {
        return Err(BotError::SchemaMismatch(format!(
            "expected {} columns, found {}",
            FEATURE_COUNT + 4,
            headers.len()
        )));
    }
    if headers[..3] != LEADING_COLUMNS {
        return Err(BotError::SchemaMismatch(format!(
            "expected leading columns {:?}, found {:?}",
            LEADING_COLUMNS,
            &headers[..3]
        )));
    }
    if headers[3 + FEATURE_COUNT] != LABEL_COLUMN {
        return Err(BotError::SchemaMismatch(format!(
            "expected trailing '{}' column, found '{}'",
            LABEL_COLUMN,
            headers[3 + FEATURE_COUNT]
        )));
    }
    ensure_canonical(&headers[3..3 + FEATURE_COUNT])
}
