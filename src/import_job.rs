use crate::sheet::{RawRow, SheetData};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One recorded per-row failure, kept in sheet order for the whole job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based sheet line, header included (row index + 2).
    pub line: usize,
    pub message: String,
    pub field: Option<String>,
    /// Display-string snapshot of the offending row.
    pub row: HashMap<String, String>,
}

/// Durable state of one import attempt. Loaded, mutated and persisted as a
/// whole on every batch call; counters only ever grow.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImportJob {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub new_count: usize,
    pub update_count: usize,
    pub error_count: usize,
    /// (code, company id) pairs successfully upserted so far; consumed only
    /// by the finalize reconciliation pass.
    pub excel_product_keys: HashSet<(String, Uuid)>,
    pub error_details: Vec<RowError>,
    /// Full decoded sheet, immutable after init.
    pub rows: Vec<RawRow>,
    pub columns_display: Vec<String>,
}

impl ImportJob {
    pub fn new(sheet: SheetData) -> Self {
        Self {
            total_rows: sheet.rows.len(),
            rows: sheet.rows,
            columns_display: sheet.columns_display,
            ..Self::default()
        }
    }
}

/// Filesystem-backed keyed store: one JSON record per job id under
/// `<dir>/jobs/`, plus the raw upload copy next to it.
#[derive(Clone, Debug)]
pub struct ImportJobStore {
    dir: PathBuf,
}

impl ImportJobStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("jobs").join(format!("{id}.json"))
    }

    pub fn upload_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("job_{id}.xlsx"))
    }

    pub async fn save(&self, id: Uuid, job: &ImportJob) -> anyhow::Result<()> {
        let path = self.state_path(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(job).context("Unable to serialize job state")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Unable to write job state {}", path.display()))?;
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> anyhow::Result<Option<ImportJob>> {
        let path = self.state_path(id);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Unable to read job state {}", path.display()))
            }
        };
        let job = serde_json::from_slice(&body)
            .with_context(|| format!("Corrupt job state {}", path.display()))?;
        Ok(Some(job))
    }

    pub async fn remove(&self, id: Uuid) -> anyhow::Result<()> {
        tokio::fs::remove_file(self.state_path(id))
            .await
            .context("Unable to remove job state")?;
        Ok(())
    }

    /// Persists the uploaded workbook under the job id.
    pub async fn save_upload(&self, id: Uuid, src: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::copy(src, self.upload_path(id))
            .await
            .context("Unable to persist uploaded file")?;
        Ok(())
    }

    pub async fn remove_upload(&self, id: Uuid) -> anyhow::Result<()> {
        tokio::fs::remove_file(self.upload_path(id))
            .await
            .context("Unable to remove uploaded file")?;
        Ok(())
    }
}
