use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{PdfPrinter, PrintError, Spooler};
use crate::api::client::DocumentSource;
use crate::api::models::RegularTarget;

/// Downloads a rendered PDF and spools it to an OS printer
pub struct PdfPrintDriver {
    source: Arc<dyn DocumentSource>,
    spooler: Arc<dyn Spooler>,
    scratch_dir: PathBuf,
}

impl PdfPrintDriver {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        spooler: Arc<dyn Spooler>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            spooler,
            scratch_dir: scratch_dir.into(),
        }
    }
}

#[async_trait]
impl PdfPrinter for PdfPrintDriver {
    async fn print_pdf(
        &self,
        job_id: &str,
        target: &RegularTarget,
        pdf_url: &str,
    ) -> Result<(), PrintError> {
        let pdf = self
            .source
            .fetch_pdf(pdf_url)
            .await
            .map_err(PrintError::pdf_download)?;

        let file = TempPdf::write(&self.scratch_dir, job_id, &pdf)
            .await
            .map_err(|e| PrintError::Pdf(format!("could not write temp file: {}", e)))?;

        self.spooler.submit(&target.printer_name, file.path()).await?;

        info!(
            "Spooled job {} to printer {} ({} bytes)",
            job_id,
            target.printer_name,
            pdf.len()
        );
        Ok(())
    }
}

/// A downloaded PDF on disk, removed when dropped
struct TempPdf {
    path: PathBuf,
}

impl TempPdf {
    async fn write(dir: &Path, job_id: &str, bytes: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        // Guard exists before the write so a partial file is cleaned up too
        let file = TempPdf {
            path: dir.join(temp_file_name(job_id)),
        };
        tokio::fs::write(&file.path, bytes).await?;
        Ok(file)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp file {}: {}", self.path.display(), e),
        }
    }
}

/// `job-{id}-{millis}-{uuid}.pdf`, unique even for calls in the same millisecond
fn temp_file_name(job_id: &str) -> String {
    let safe_id: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "job-{}-{}-{}.pdf",
        safe_id,
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}
