use std::path::{Path, PathBuf};

use kibitz_ops::{read_table_if_present, write_table};
use kibitz_types::{records::LabelledRecord, Result};

/// Durable home of the labelled rows collected so far.
pub trait LabelStore {
    /// Rows persisted by an earlier session; empty when there are none.
    fn load(&self) -> Result<Vec<LabelledRecord>>;
    /// Replaces the persisted rows with `records`.
    fn save(&mut self, records: &[LabelledRecord]) -> Result<()>;
}

/// Labelled table kept as a CSV file that is rewritten in full on every save.
#[derive(Debug, Clone)]
pub struct CsvLabelStore {
    path: PathBuf,
}

impl CsvLabelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LabelStore for CsvLabelStore {
    fn load(&self) -> Result<Vec<LabelledRecord>> {
        read_table_if_present(&self.path)
    }

    fn save(&mut self, records: &[LabelledRecord]) -> Result<()> {
        write_table(&self.path, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kibitz_types::{board::Side, records::Phase};

    #[test]
    fn csv_store_round_trips_and_shrinks() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut store = CsvLabelStore::new(dir.path().join("out/labelled.csv"));
        assert!(store.load().expect("missing file loads").is_empty());

        let row = LabelledRecord {
            fen: "8/8/4k3/8/8/4K3/4P3/8 w - - 0 1".into(),
            phase: Phase::Endgame,
            move_number: 41,
            turn: Side::White,
            material_diff: 1,
            your_move: "e2e4".into(),
            time_taken: 12.5,
        };
        store.save(&[row.clone(), row.clone()]).expect("save two");
        assert!(store.path().ends_with("out/labelled.csv"));
        assert!(store.path().is_file());
        assert_eq!(store.load().expect("load two").len(), 2);

        store.save(&[row.clone()]).expect("save one");
        assert_eq!(store.load().expect("load one"), vec![row]);

        store.save(&[]).expect("save none");
        assert!(store.load().expect("load none").is_empty());
    }
}
