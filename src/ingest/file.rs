use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

use super::RawStatRow;
use crate::error::{PipelineError, PipelineResult};

/// Read stat rows from a `.json` array or a `.csv` file with a header row
pub fn load_rows(path: &Path) -> PipelineResult<Vec<RawStatRow>> {
    let file = File::open(path).map_err(|e| {
        PipelineError::DataNotFound(format!("cannot open {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);

    let rows = match extension.as_deref() {
        Some("json") => rows_from_json(reader)?,
        Some("csv") => rows_from_csv(reader),
        _ => {
            return Err(PipelineError::Validation(format!(
                "{}: expected a .json or .csv file",
                path.display()
            )))
        }
    };

    info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

pub fn rows_from_json<R: Read>(reader: R) -> PipelineResult<Vec<RawStatRow>> {
    serde_json::from_reader(reader)
        .map_err(|e| PipelineError::Validation(format!("invalid stats JSON: {}", e)))
}

/// Rows that fail to parse become empty rows, which normalization then
/// drops as malformed.
pub fn rows_from_csv<R: Read>(reader: R) -> Vec<RawStatRow> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize::<RawStatRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("Unparseable CSV row {}: {}", line + 2, e);
                rows.push(RawStatRow::default());
            }
        }
    }
    rows
}
