pub mod escpos;
pub mod regular;
pub mod spooler;
pub mod thermal;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::error::ApiError;
use crate::api::models::{DocumentData, RegularTarget, ThermalTarget};

pub use regular::PdfPrintDriver;
pub use spooler::{CommandSpooler, Spooler};
pub use thermal::NetworkThermalPrinter;

/// Driver-level failures, reported to the backend as the job's error message
#[derive(Error, Debug)]
pub enum PrintError {
    #[error("Failed to connect to printer at {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Printer at {address} timed out during {phase}")]
    Timeout {
        address: String,
        phase: &'static str,
    },

    #[error("Printer I/O error at {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF print failed: {0}")]
    Pdf(String),
}

impl PrintError {
    pub fn pdf_download(err: ApiError) -> Self {
        PrintError::Pdf(format!("download error: {}", err))
    }
}

/// Prints kitchen tickets on raw ESC/POS printers
#[async_trait]
pub trait TicketPrinter: Send + Sync {
    async fn print_ticket(&self, target: &ThermalTarget, ticket: &DocumentData)
        -> Result<(), PrintError>;
}

/// Prints server-rendered PDFs through the OS spooler
#[async_trait]
pub trait PdfPrinter: Send + Sync {
    async fn print_pdf(
        &self,
        job_id: &str,
        target: &RegularTarget,
        pdf_url: &str,
    ) -> Result<(), PrintError>;
}
