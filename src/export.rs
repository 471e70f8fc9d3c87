//! Registry exports: JSONL for the main tables, CSV for the external-URL
//! registries.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::repository::{ExportTable, Registry, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

const JSONL_TABLES: &[ExportTable] = &[
    ExportTable::Pages,
    ExportTable::LinkEdges,
    ExportTable::Assets,
    ExportTable::FaqItems,
];

const CSV_TABLES: &[ExportTable] = &[ExportTable::ExternalUrls, ExportTable::ExternalDomains];

/// Writes every registry table to the export directory. Output order is
/// stable, so two exports of the same registry are byte-identical.
pub struct Exporter<'a> {
    registry: &'a Registry,
    export_dir: PathBuf,
}

impl<'a> Exporter<'a> {
    pub fn new(registry: &'a Registry, export_dir: &Path) -> Self {
        Self {
            registry,
            export_dir: export_dir.to_path_buf(),
        }
    }

    /// Export all tables; returns the files written.
    pub fn export_all(&self) -> Result<Vec<PathBuf>, ExportError> {
        fs::create_dir_all(&self.export_dir)?;
        let mut written = Vec::new();
        for table in JSONL_TABLES {
            written.push(self.export_jsonl(*table)?);
        }
        for table in CSV_TABLES {
            written.push(self.export_csv(*table)?);
        }
        Ok(written)
    }

    fn export_jsonl(&self, table: ExportTable) -> Result<PathBuf, ExportError> {
        let path = self.export_dir.join(format!("{}.jsonl", table.file_stem()));
        let mut writer = BufWriter::new(fs::File::create(&path)?);
        let mut rows = 0usize;
        self.registry.for_each_export_row(table, |value| {
            // Single-line JSON per row; serde_json keeps map order stable.
            let line = value.to_string();
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(RepositoryError::from)?;
            rows += 1;
            Ok(())
        })?;
        writer.flush()?;
        info!(path = %path.display(), rows, "exported jsonl");
        Ok(path)
    }

    fn export_csv(&self, table: ExportTable) -> Result<PathBuf, ExportError> {
        let path = self.export_dir.join(format!("{}.csv", table.file_stem()));
        let mut writer = csv::Writer::from_path(&path)?;
        let mut header_written = false;
        let mut rows = 0usize;
        let mut error: Option<csv::Error> = None;
        self.registry.for_each_export_row(table, |value| {
            if error.is_some() {
                return Ok(());
            }
            if let Value::Object(object) = value {
                if !header_written {
                    if let Err(e) = writer.write_record(object.keys()) {
                        error = Some(e);
                        return Ok(());
                    }
                    header_written = true;
                }
                let record: Vec<String> = object.values().map(scalar_to_string).collect();
                if let Err(e) = writer.write_record(&record) {
                    error = Some(e);
                    return Ok(());
                }
                rows += 1;
            }
            Ok(())
        })?;
        if let Some(e) = error {
            return Err(e.into());
        }
        writer.flush()?;
        info!(path = %path.display(), rows, "exported csv");
        Ok(path)
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
