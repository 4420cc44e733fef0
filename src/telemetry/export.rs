//! # CSV Export
//!
//! Converts the JSON Lines record log into a single tabular file with one
//! column per sensor field.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::telemetry::sink::{FlatRecord, JsonlSink};

/// Write every logged record under `log_dir` to `writer` as CSV
///
/// Segments are read oldest first. The header row is always written, so an
/// empty log produces a header-only file. Lines that are not valid records
/// are skipped with a warning.
///
/// Returns the number of data rows written.
///
/// # Errors
///
/// Returns an error if a segment cannot be read or the writer fails.
pub fn export_csv<P: AsRef<Path>, W: Write>(log_dir: P, writer: W) -> Result<usize> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(FlatRecord::COLUMNS)?;

    let mut rows = 0;
    for (_, path) in JsonlSink::segment_paths(log_dir)? {
        let reader = BufReader::new(File::open(&path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FlatRecord>(&line) {
                Ok(record) => {
                    csv.serialize(&record)?;
                    rows += 1;
                }
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ),
            }
        }
    }

    csv.flush()?;
    Ok(rows)
}

/// Export the record log under `log_dir` into the file at `output`
pub fn export_csv_file<P: AsRef<Path>, Q: AsRef<Path>>(log_dir: P, output: Q) -> Result<usize> {
    let output = output.as_ref();
    let file = BufWriter::new(File::create(output)?);
    let rows = export_csv(log_dir, file)?;
    info!("Exported {} records to {}", rows, output.display());
    Ok(rows)
}
