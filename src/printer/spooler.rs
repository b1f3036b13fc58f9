use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::PrintError;

/// Hands a file to an OS-managed printer queue
#[async_trait]
pub trait Spooler: Send + Sync {
    async fn submit(&self, printer_name: &str, file: &Path) -> Result<(), PrintError>;
}

/// Argument conventions of the supported print programs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    /// CUPS `lp -d <printer> <file>`
    Lp,
    /// BSD `lpr -P <printer> <file>`
    Lpr,
    /// `SumatraPDF -print-to <printer> -silent <file>`
    Sumatra,
}

impl Dialect {
    fn detect(program: &str) -> Self {
        let name = Path::new(program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("sumatra") {
            Dialect::Sumatra
        } else if name == "lpr" {
            Dialect::Lpr
        } else {
            Dialect::Lp
        }
    }
}

/// Spools by running the platform print command
pub struct CommandSpooler {
    program: String,
    dialect: Dialect,
    timeout: Duration,
}

impl CommandSpooler {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        let program = program.into();
        let dialect = Dialect::detect(&program);
        Self {
            program,
            dialect,
            timeout,
        }
    }

    fn args(&self, printer_name: &str, file: &Path) -> Vec<String> {
        let file = file.to_string_lossy().into_owned();
        let printer_name = printer_name.to_string();
        match self.dialect {
            Dialect::Lp => vec!["-d".into(), printer_name, file],
            Dialect::Lpr => vec!["-P".into(), printer_name, file],
            Dialect::Sumatra => vec!["-print-to".into(), printer_name, "-silent".into(), file],
        }
    }
}

#[async_trait]
impl Spooler for CommandSpooler {
    async fn submit(&self, printer_name: &str, file: &Path) -> Result<(), PrintError> {
        let args = self.args(printer_name, file);
        debug!("Spooling with {} {:?}", self.program, args);

        let running = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, running).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PrintError::Pdf(format!(
                    "could not run {}: {}",
                    self.program, e
                )))
            }
            Err(_) => {
                return Err(PrintError::Pdf(format!(
                    "{} did not finish within {}s",
                    self.program,
                    self.timeout.as_secs()
                )))
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PrintError::Pdf(format!(
                "spooler rejected job for {} ({}): {}",
                printer_name,
                output.status,
                stderr.trim()
            )))
        }
    }
}
