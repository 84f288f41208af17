//! Header-based CSV decoding of bulk product uploads.
//!
//! Header names are matched case-insensitively, with spaces treated as underscores.
//! A bad header fails the whole request; a bad record only fails its own row.

use std::io::Read;

use catalogerp_catalog::{CsvRow, ProductRow};

use crate::error::CatalogError;

const REQUIRED_COLUMNS: [&str; 6] = [
    "major_category",
    "manufacturer",
    "brand",
    "variant",
    "pack_size",
    "pack_type",
];

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

/// Decode every data record, in file order. Row `n` of the result is data row `n + 1`.
///
/// Reading stops with a request-level error as soon as record `max_rows + 1` is seen.
pub fn parse_rows<R: Read>(
    reader: R,
    max_rows: usize,
) -> Result<Vec<Result<ProductRow, CatalogError>>, CatalogError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: csv::StringRecord = rdr
        .headers()
        .map_err(|e| CatalogError::validation(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(normalize_header)
        .collect();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(CatalogError::validation(format!("missing CSV column '{column}'")));
        }
    }
    rdr.set_headers(headers);

    let mut rows = Vec::new();
    for record in rdr.deserialize::<CsvRow>() {
        if rows.len() == max_rows {
            return Err(CatalogError::validation(format!(
                "CSV has more than the limit of {max_rows} rows"
            )));
        }
        let row = record
            .map_err(|e| CatalogError::validation(format!("malformed record: {e}")))
            .and_then(|raw| ProductRow::try_from(raw).map_err(CatalogError::from));
        rows.push(row);
    }
    Ok(rows)
}
