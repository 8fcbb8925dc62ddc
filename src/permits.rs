use crate::extract::normalize_text;
use crate::types::PermitRecord;
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read-only permit table, indexed by normalized plate.
#[derive(Debug)]
pub struct PermitDirectory {
    records: Vec<PermitRecord>,
    by_plate: HashMap<String, usize>,
}

impl PermitDirectory {
    pub fn load(path: &Path) -> Result<Self, failure::Error> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format_err!("Unable to read permits from {}: {}", path.display(), e))?;
        let directory = Self::from_json(&raw)
            .map_err(|e| format_err!("Invalid permits in {}: {}", path.display(), e))?;
        info!(
            "Loaded {} permits from {}",
            directory.records.len(),
            path.display()
        );
        Ok(directory)
    }

    pub fn from_json(raw: &str) -> Result<Self, failure::Error> {
        let records: Vec<PermitRecord> = serde_json::from_str(raw)?;
        Ok(Self::new(records))
    }

    /// Builds the index. When two records share a plate the first one wins.
    pub fn new(records: Vec<PermitRecord>) -> Self {
        let mut by_plate = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let key = normalize_text(&record.plate);
            if by_plate.contains_key(&key) {
                warn!("Ignoring duplicate permit for plate '{}'", record.plate);
                continue;
            }
            by_plate.insert(key, i);
        }
        PermitDirectory { records, by_plate }
    }

    pub fn lookup(&self, plate: &str) -> Option<&PermitRecord> {
        self.by_plate
            .get(&normalize_text(plate))
            .map(|&i| &self.records[i])
    }

    pub fn all(&self) -> &[PermitRecord] {
        &self.records
    }
}
