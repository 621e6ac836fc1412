//! CSV tables exchanged between pipeline stages.
//!
//! Every write replaces the whole file through a sibling temp file and an
//! atomic rename, so readers only ever see the previous or the new table.

use std::{fs, io::Write, path::Path};

use kibitz_types::{
    records::{LabelledRecord, PositionRecord, ScoredRecord},
    Result,
};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{ensure_parent_dir, persistence_error};

/// A row type with a fixed header.
pub trait TableRow: Serialize + DeserializeOwned {
    const HEADER: &'static [&'static str];
}

impl TableRow for PositionRecord {
    const HEADER: &'static [&'static str] = &["fen", "phase", "move_number", "turn", "material_diff"];
}

impl TableRow for LabelledRecord {
    const HEADER: &'static [&'static str] = &[
        "fen",
        "phase",
        "move_number",
        "turn",
        "material_diff",
        "your_move",
        "time_taken",
    ];
}

impl TableRow for ScoredRecord {
    const HEADER: &'static [&'static str] = &[
        "fen",
        "phase",
        "move_number",
        "turn",
        "material_diff",
        "your_move",
        "time_taken",
        "eval_before",
        "eval_after",
        "best_move",
        "deviation",
    ];
}

pub fn read_table<T: TableRow>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| {
        persistence_error(format!("failed to open table {}: {err}", path.display()))
    })?;
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<T>().enumerate() {
        let row = row.map_err(|err| {
            persistence_error(format!(
                "malformed row {} in {}: {err}",
                line + 1,
                path.display()
            ))
        })?;
        rows.push(row);
    }
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Like [`read_table`], but a missing or empty file reads as no rows.
pub fn read_table_if_present<T: TableRow>(path: &Path) -> Result<Vec<T>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => read_table(path),
        Ok(_) => Ok(Vec::new()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(persistence_error(format!(
            "failed to inspect table {}: {err}",
            path.display()
        ))),
    }
}

pub fn write_table<T: TableRow>(path: &Path, rows: &[T]) -> Result<()> {
    let dir = ensure_parent_dir(path)?.unwrap_or_else(|| Path::new(".").to_path_buf());
    let mut staged = NamedTempFile::new_in(&dir).map_err(|err| {
        persistence_error(format!("failed to stage table in {}: {err}", dir.display()))
    })?;
    write_rows(staged.as_file_mut(), rows)
        .map_err(|err| persistence_error(format!("failed to write {}: {err}", path.display())))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|err| persistence_error(format!("failed to sync {}: {err}", path.display())))?;
    staged.persist(path).map_err(|err| {
        persistence_error(format!("failed to replace {}: {}", path.display(), err.error))
    })?;
    debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Writes the header followed by every row; an empty table still gets its header.
pub fn write_rows<W: Write, T: TableRow>(writer: W, rows: &[T]) -> csv::Result<()> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    out.write_record(T::HEADER)?;
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(())
}
