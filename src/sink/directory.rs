use super::TableSink;
use crate::error::{Result, StarError};
use crate::tables::TableSchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    Parquet,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

/// Writes each table to `<dir>/<table>.<ext>`.
///
/// The file is first written next to its destination under a temporary
/// name and then renamed over it, so a reader sees the old file or the new
/// one, never a truncated file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    format: FileFormat,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.{}", self.format.extension()))
    }

    fn write_file(&self, path: &Path, frame: &DataFrame) -> Result<()> {
        let mut df = frame.clone();
        let file = std::fs::File::create(path)?;
        match self.format {
            FileFormat::Csv => {
                CsvWriter::new(file)
                    .include_header(true)
                    .with_separator(b',')
                    .finish(&mut df)?;
            }
            FileFormat::Parquet => {
                ParquetWriter::new(file).finish(&mut df)?;
            }
        }
        Ok(())
    }
}

impl TableSink for DirectorySink {
    async fn write_table(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize> {
        let fail = |e: StarError| StarError::sink(&schema.name, e);

        std::fs::create_dir_all(&self.dir).map_err(|e| fail(e.into()))?;

        let final_path = self.path_for(&schema.name);
        let temp_path = self.dir.join(format!(
            ".{}.{}.tmp",
            schema.name,
            Uuid::new_v4().simple()
        ));

        if let Err(e) = self.write_file(&temp_path, frame) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(fail(e));
        }
        if let Err(e) = std::fs::rename(&temp_path, &final_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(fail(e.into()));
        }

        tracing::debug!(table = %schema.name, path = %final_path.display(), "Table file replaced");
        Ok(frame.height())
    }

    fn describe(&self) -> String {
        format!("{} files in {}", self.format.extension(), self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{ColumnDef, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new(
            "region",
            vec![
                ColumnDef::key("region_id", ColumnType::Integer),
                ColumnDef::new("region_name", ColumnType::Text),
            ],
        )
    }

    #[tokio::test]
    async fn test_csv_write_replaces_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = DirectorySink::new(dir.path(), FileFormat::Csv);

        let first = df!("region_id" => [1_i64, 2], "region_name" => ["East", "West"])?;
        sink.write_table(&schema(), &first).await?;
        let second = df!("region_id" => [1_i64], "region_name" => ["North"])?;
        sink.write_table(&schema(), &second).await?;

        let text = std::fs::read_to_string(sink.path_for("region"))?;
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["region_id,region_name", "1,North"]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_parquet_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = DirectorySink::new(dir.path(), FileFormat::Parquet);
        let frame = df!("region_id" => [1_i64, 2], "region_name" => ["East", "West"])?;

        let written = sink.write_table(&schema(), &frame).await?;
        assert_eq!(written, 2);

        let file = std::fs::File::open(sink.path_for("region"))?;
        let back = ParquetReader::new(file).finish()?;
        assert!(back.equals(&frame));
        Ok(())
    }
}
