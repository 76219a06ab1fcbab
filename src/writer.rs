//! Table writers
//!
//! The exporter hands finished tables to a [`TableWriter`]; where and how they
//! end up is the writer's business.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::info;

use crate::exporter::AssetExport;
use crate::pivot::PivotTable;

/// Name of the timestamp column
pub const TIME_COLUMN: &str = "localtime";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Trait for persisting exported tables
#[async_trait]
pub trait TableWriter: Send {
    /// Write one asset's table, returning where it went
    async fn write_table(&mut self, export: &AssetExport) -> Result<PathBuf>;
}

/// Writes `{dir}/{deviceName}-{assetId}.csv`
pub struct CsvWriter {
    dir: PathBuf,
}

impl CsvWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// One directory per project under `output_dir`
    pub fn for_project(output_dir: &str, project_name: &str) -> Self {
        Self::new(PathBuf::from(output_dir).join(sanitize_file_component(project_name)))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl TableWriter for CsvWriter {
    async fn write_table(&mut self, export: &AssetExport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .context(format!("Failed to create directory: {:?}", self.dir))?;

        let path = self.dir.join(format!("{}.csv", export.file_stem()));
        let file = fs::File::create(&path)
            .context(format!("Failed to create CSV file: {:?}", path))?;
        write_csv(&export.table, file)
            .context(format!("Failed to write CSV file: {:?}", path))?;

        info!("Wrote {} rows to {:?}", export.table.len(), path);
        Ok(path)
    }
}

/// Write a table as CSV: `localtime` then one column per point
pub fn write_csv<W: io::Write>(table: &PivotTable, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = Vec::with_capacity(table.columns.len() + 1);
    header.push(TIME_COLUMN);
    header.extend(table.columns.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.local_time.format(TIME_FORMAT).to_string());
        for column in &table.columns {
            record.push(row.get(column).map(render_cell).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace characters that would change the path
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
