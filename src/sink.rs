use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::info;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;

use crate::listing::{JobListing, COLUMNS};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xlsx error: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Durable destination for finalized listings.
pub trait RecordSink {
    /// Writes one record and makes it durable before returning.
    fn append(&mut self, record: &JobListing) -> Result<(), PersistenceError>;
}

/// Append-only CSV log. The header goes in only when the file is new.
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let is_new = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(COLUMNS)?;
            writer.flush()?;
            info!("Created {:?} with header row.", path);
        } else {
            info!("Appending to existing {:?}.", path);
        }

        Ok(CsvSink { writer })
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &JobListing) -> Result<(), PersistenceError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the whole run to `<base>.csv` and `<base>.xlsx`, replacing any
/// previous snapshot. Returns the paths written.
pub fn export_snapshot(records: &[JobListing], base: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let csv_path = base.with_extension("csv");
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&csv_path)?;
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    let xlsx_path = base.with_extension("xlsx");
    write_workbook(records, &xlsx_path)?;

    info!("Saved {} rows to {:?} and {:?}", records.len(), csv_path, xlsx_path);
    Ok(vec![csv_path, xlsx_path])
}

fn write_workbook(records: &[JobListing], path: &Path) -> Result<(), PersistenceError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();

    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &bold)?;
    }
    for (i, record) in records.iter().enumerate() {
        let row = i as u32 + 1;
        for (col, cell) in record.cells().iter().enumerate() {
            if let Some(value) = cell {
                sheet.write_string(row, col as u16, value.as_str())?;
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Writes the whole run as a pretty-printed JSON array.
pub fn write_json_dump(records: &[JobListing], path: &Path) -> Result<(), PersistenceError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, records)?;
    info!("Saved {} records to {:?}", records.len(), path);
    Ok(())
}
