use std::fs::File;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Reader, Xlsx, XlsxError};
use log::{error, info};
use serde::Deserialize;
use thiserror::Error;

use crate::listing::CrawlTarget;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("could not read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse CSV input: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not open Excel input: {0}")]
    Excel(#[from] XlsxError),
    #[error("input has no '{0}' column")]
    MissingColumn(&'static str),
}

#[derive(Debug, Deserialize)]
struct TargetRow {
    #[serde(rename = "Keyword", alias = "keyword", alias = "Search Keyword", alias = "search_keyword")]
    keyword: String,
    #[serde(rename = "Location", alias = "location", alias = "Where", default)]
    location: Option<String>,
}

impl TargetRow {
    fn into_target(self) -> Option<CrawlTarget> {
        let keyword = self.keyword.trim();
        if keyword.is_empty() {
            return None;
        }
        let location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Some(CrawlTarget::new(keyword, location))
    }
}

/// Reads crawl targets from a CSV or Excel sheet with `Keyword` and optional `Location` columns.
pub fn load_targets<P: AsRef<Path>>(filename: P) -> Result<Vec<CrawlTarget>, InputError> {
    let path = filename.as_ref();
    if !path.exists() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }

    let is_excel = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls"));

    if is_excel {
        load_excel(path)
    } else {
        load_csv(path)
    }
}

fn load_csv(path: &Path) -> Result<Vec<CrawlTarget>, InputError> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut targets = Vec::new();
    for result in rdr.deserialize::<TargetRow>() {
        match result {
            Ok(row) => targets.extend(row.into_target()),
            Err(e) => error!("Error parsing CSV record: {}", e),
        }
    }
    info!("Loaded {} targets from CSV {:?}", targets.len(), path);
    Ok(targets)
}

fn load_excel(path: &Path) -> Result<Vec<CrawlTarget>, InputError> {
    let mut excel: Xlsx<_> = open_workbook(path)?;

    let mut targets = Vec::new();
    let worksheets = excel.worksheets();
    let Some((_name, range)) = worksheets.first() else {
        info!("Excel file {:?} has no sheets", path);
        return Ok(targets);
    };

    let mut keyword_idx = None;
    let mut location_idx = None;

    for (row_idx, row) in range.rows().enumerate() {
        if row_idx == 0 {
            for (col_idx, cell) in row.iter().enumerate() {
                let header = cell.to_string().to_lowercase();
                if header.contains("keyword") {
                    keyword_idx = Some(col_idx);
                } else if header.contains("location") || header.contains("where") {
                    location_idx = Some(col_idx);
                }
            }
            if keyword_idx.is_none() {
                return Err(InputError::MissingColumn("Keyword"));
            }
            continue;
        }

        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(|c| c.to_string());
        let Some(keyword) = cell(keyword_idx) else { continue };
        let row = TargetRow {
            keyword,
            location: cell(location_idx),
        };
        targets.extend(row.into_target());
    }

    info!("Loaded {} targets from Excel {:?}", targets.len(), path);
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_with_keyword_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(
            &path,
            "Keyword,Location\nData Science, Hong Kong SAR \nAI,\n ,Kowloon\n",
        )
        .unwrap();

        let targets = load_targets(&path).unwrap();
        assert_eq!(
            targets,
            vec![
                CrawlTarget::new("Data Science", Some("Hong Kong SAR".into())),
                CrawlTarget::new("AI", None),
            ]
        );
    }

    #[test]
    fn location_column_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kw.csv");
        std::fs::write(&path, "keyword\nMachine Learning\n").unwrap();

        assert_eq!(load_targets(&path).unwrap(), vec![CrawlTarget::new("Machine Learning", None)]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_targets(dir.path().join("nope.csv")),
            Err(InputError::NotFound(_))
        ));
    }
}
