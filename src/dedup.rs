use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use log::{info, warn};

use crate::sink::PersistenceError;

/// Column names that have held the job URL in earlier output files.
const KEY_COLUMNS: [&str; 2] = ["job_url", "job_posting_url"];

/// Job URLs persisted by this run or any earlier one.
#[derive(Debug, Default)]
pub struct DedupStore {
    keys: HashSet<String>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the key column of a previous output file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            info!("No previous output at {:?}. Starting fresh.", path);
            return Ok(Self::new());
        }

        let file = File::open(path)?;
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let headers = rdr.headers()?.clone();
        let Some(idx) = headers.iter().position(|h| KEY_COLUMNS.contains(&h.trim())) else {
            warn!("{:?} has no job_url column; nothing to deduplicate against.", path);
            return Ok(Self::new());
        };

        let mut keys = HashSet::new();
        for (line, record) in rdr.records().enumerate() {
            match record {
                Ok(row) => {
                    if let Some(key) = row.get(idx).map(str::trim).filter(|k| !k.is_empty()) {
                        keys.insert(key.to_string());
                    }
                }
                Err(e) => warn!("Skipping unreadable row {} in {:?}: {}", line + 2, path, e),
            }
        }

        info!("Found {} existing job URLs in {:?}.", keys.len(), path);
        Ok(DedupStore { keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Records `key`. Returns false, changing nothing, if it was already known.
    pub fn accept(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::load(&dir.path().join("none.csv")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn loads_key_column_and_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "search_keyword,location,job_url").unwrap();
        writeln!(f, "AI,,https://hk.jobsdb.com/job/1").unwrap();
        writeln!(f, "AI,,").unwrap();
        writeln!(f, "AI,Kowloon,https://hk.jobsdb.com/job/2").unwrap();
        writeln!(f, "AI,Kowloon,https://hk.jobsdb.com/job/1").unwrap();

        let store = DedupStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("https://hk.jobsdb.com/job/2"));
    }

    #[test]
    fn understands_the_legacy_column_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        std::fs::write(&path, "location,job_posting_url\nHK,https://hk.jobsdb.com/job/7\n").unwrap();

        assert!(DedupStore::load(&path).unwrap().contains("https://hk.jobsdb.com/job/7"));
    }

    #[test]
    fn accept_only_grows() {
        let mut store = DedupStore::new();
        assert!(store.accept("a"));
        assert!(!store.accept("a"));
        assert!(store.accept("b"));
        assert_eq!(store.len(), 2);
    }
}
