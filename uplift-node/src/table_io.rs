//! CSV loading of the unified per-bucket table.
//!
//! Required columns: `time_bucket_start`, `entity_id`. `revenue`,
//! `purchases` and `spend` read as zero when absent, blank or non-finite. Every
//! `proxy_`-prefixed column becomes a proxy signal.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use uplift_core::{BucketRow, EntityKey, UnifiedTable, UpliftError, PROXY_PREFIX};

const COL_BUCKET: &str = "time_bucket_start";
const COL_ENTITY: &str = "entity_id";

/// Load the table from a file. A missing file is an empty table.
pub fn read_table(path: &Path) -> anyhow::Result<UnifiedTable> {
    if !path.exists() {
        info!(path = %path.display(), "Unified table not found; treating as empty");
        return Ok(UnifiedTable::empty());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let table = parse_table(file).with_context(|| format!("reading {}", path.display()))?;
    info!(path = %path.display(), rows = table.len(), "Loaded unified table");
    Ok(table)
}

/// Parse CSV content into a table.
pub fn parse_table<R: Read>(reader: R) -> anyhow::Result<UnifiedTable> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv.headers()?.clone();

    let index_of = |name: &str| headers.iter().position(|h| h == name);
    let bucket_idx = index_of(COL_BUCKET)
        .ok_or_else(|| UpliftError::TableError(format!("missing column {COL_BUCKET}")))?;
    let entity_idx = index_of(COL_ENTITY)
        .ok_or_else(|| UpliftError::TableError(format!("missing column {COL_ENTITY}")))?;
    let revenue_idx = index_of("revenue");
    let purchases_idx = index_of("purchases");
    let spend_idx = index_of("spend");
    let proxy_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with(PROXY_PREFIX))
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    debug!(proxies = proxy_cols.len(), "Parsed table header");

    let mut rows = Vec::new();
    for (n, record) in csv.records().enumerate() {
        let record = record?;
        let line = n + 2;
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

        let bucket = parse_timestamp(field(Some(bucket_idx)))
            .map_err(|e| UpliftError::TableError(format!("line {line}: {e}")))?;
        let entity = EntityKey::parse(field(Some(entity_idx)))
            .map_err(|e| UpliftError::TableError(format!("line {line}: {e}")))?;

        let number = |idx: Option<usize>, name: &str| -> uplift_core::Result<f64> {
            let raw = field(idx);
            if raw.is_empty() {
                return Ok(0.0);
            }
            let value = raw
                .parse::<f64>()
                .map_err(|_| UpliftError::TableError(format!("line {line}: bad {name} {raw:?}")))?;
            // nan/inf read as missing, like blank cells
            Ok(if value.is_finite() { value } else { 0.0 })
        };

        let mut row = BucketRow::new(
            bucket,
            entity,
            number(revenue_idx, "revenue")?,
            number(purchases_idx, "purchases")?,
            number(spend_idx, "spend")?,
        );
        for (idx, name) in &proxy_cols {
            let value = record.get(*idx).and_then(|v| v.parse::<f64>().ok());
            row = row.with_proxy(name.clone(), value);
        }
        rows.push(row);
    }

    Ok(UnifiedTable::new(rows))
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` with an optional `+HH:MM` offset (UTC when absent).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("bad timestamp {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_table_with_proxies() {
        let csv = "time_bucket_start,entity_id,revenue,purchases,proxy_good,proxy_bad\n\
                   2026-02-15T00:00:00Z,ga|A|c1,1,1,1,\n\
                   2026-02-15T12:00:00Z,ga|A|c1,2,2,2,\n";
        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.proxy_names().len(), 2);
        let first = &table.rows()[0];
        assert_eq!(first.spend, 0.0);
        assert_eq!(first.proxy("proxy_good"), Some(1.0));
        assert_eq!(first.proxy("proxy_bad"), None);
        assert_eq!(first.entity, EntityKey::new("ga", "A", "c1"));
    }

    #[test]
    fn test_non_finite_cells_read_as_missing() {
        let csv = "time_bucket_start,entity_id,revenue,purchases,spend\n\
                   2026-02-15T00:00:00Z,ga|A|c1,5,1,100\n\
                   2026-02-15T12:00:00Z,ga|A|c1,nan,inf,NaN\n";
        let table = parse_table(csv.as_bytes()).unwrap();

        assert_eq!(table.revenue_total(), 5.0);
        assert_eq!(table.purchases_total(), 1.0);
        assert_eq!(table.outcome_kind(), uplift_core::OutcomeKind::Revenue);
        let second = &table.rows()[1];
        assert_eq!(second.revenue, 0.0);
        assert_eq!(second.spend, 0.0);
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "entity_id,revenue\nga|A|c1,1\n";
        let err = parse_table(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("time_bucket_start"));
    }

    #[test]
    fn test_bad_entity_id_reports_line() {
        let csv = "time_bucket_start,entity_id\n2026-02-15T00:00:00Z,nochannel\n";
        let err = parse_table(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-02-15T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-15 14:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-15 12:00:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let table = read_table(Path::new("/nonexistent/unified.csv")).unwrap();
        assert!(table.is_empty());
    }
}
