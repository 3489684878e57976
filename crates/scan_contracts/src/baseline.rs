//! Published baseline predictions, merged into tables for comparison.

use crate::ContractError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the published comparison table.
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineRecord {
    pub scan_id: String,
    #[serde(default)]
    pub imt_max: Option<f64>,
    #[serde(default)]
    pub imt_avg: Option<f64>,
}

/// Prior published predictions, keyed by normalized scan id.
#[derive(Debug, Clone, Default)]
pub struct BaselineTable {
    map: BTreeMap<String, BaselineRecord>,
}

impl BaselineTable {
    pub fn load_csv(path: &Path) -> Result<Self, ContractError> {
        let csv_err = |source| ContractError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let mut map = BTreeMap::new();
        for row in reader.deserialize::<BaselineRecord>() {
            let record = row.map_err(csv_err)?;
            map.insert(record.scan_id.clone(), record);
        }
        Ok(Self { map })
    }

    pub fn get(&self, scan_id: &str) -> Option<&BaselineRecord> {
        self.map.get(scan_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_indexes_by_scan_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vila_CCA.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "scan_id,imt_max,imt_avg").unwrap();
        writeln!(file, "0042,0.91,0.74").unwrap();
        writeln!(file, "0107,1.62,").unwrap();
        drop(file);

        let table = BaselineTable::load_csv(&path).unwrap();
        assert_eq!(table.len(), 2);
        let rec = table.get("0042").unwrap();
        assert_eq!(rec.imt_max, Some(0.91));
        assert_eq!(rec.imt_avg, Some(0.74));
        // Empty cells deserialize as absent.
        assert_eq!(table.get("0107").unwrap().imt_avg, None);
        assert!(table.get("9999").is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(BaselineTable::load_csv(Path::new("/nonexistent/vila.csv")).is_err());
    }
}
