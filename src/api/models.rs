use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use validator::Validate;

/// Default raw ESC/POS port
pub const THERMAL_PORT: u16 = 9100;

/// Job status as the backend stores it
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Printing,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterType {
    Thermal,
    Regular,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct KitchenStation {
    pub name: String,
}

/// One line on a kitchen ticket
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TicketItem {
    #[validate(range(min = 1, message = "Item quantity must be at least 1"))]
    pub quantity: u32,
    #[validate(length(min = 1, message = "Item name must not be empty"))]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Ticket payload of a THERMAL job
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1, message = "Order number must not be empty"))]
    pub order_number: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<TicketItem>,
    #[serde(default)]
    pub waiter_name: Option<String>,
}

/// A print job as returned by `GET /api/print/jobs/pending`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub kitchen_station: Option<KitchenStation>,
    pub printer_type: PrinterType,
    /// Network address for THERMAL, OS printer name for REGULAR
    #[serde(default)]
    pub printer_ip: Option<String>,
    #[serde(default)]
    pub document_data: Option<DocumentData>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

/// Entries are kept raw so one bad job cannot sink the whole batch
#[derive(Debug, Deserialize)]
pub struct PendingJobsResponse {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// A pending entry that does not decode into a `Job`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableJob {
    /// Present when the entry carries a usable `id`, so it can still be failed
    pub id: Option<String>,
    pub reason: String,
}

pub type PendingJob = Result<Job, UndecodableJob>;

/// Body of `PUT /api/print/jobs/{id}/status`
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Raw socket printer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThermalTarget {
    pub host: String,
    pub port: u16,
}

impl ThermalTarget {
    /// Accepts `host` or `host:port`; bare hosts use the ESC/POS port
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(host) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if host.is_empty() {
                return None;
            }
            return Some(Self {
                host: host.to_string(),
                port: THERMAL_PORT,
            });
        }
        if let Ok(addr) = raw.parse::<std::net::SocketAddr>() {
            return Some(Self {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }
        if let Some((host, port)) = raw.rsplit_once(':') {
            // Bare IPv6 addresses contain colons but no port
            if !host.contains(':') {
                let port = port.parse().ok()?;
                return Some(Self {
                    host: host.to_string(),
                    port,
                });
            }
        }
        Some(Self {
            host: raw.to_string(),
            port: THERMAL_PORT,
        })
    }
}

impl std::fmt::Display for ThermalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// OS-registered printer queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularTarget {
    pub printer_name: String,
}

/// What a job asks the agent to do, with its target typed per printer kind
#[derive(Debug, Clone, PartialEq)]
pub enum PrintTask {
    Thermal {
        target: ThermalTarget,
        ticket: DocumentData,
    },
    Regular {
        target: RegularTarget,
        pdf_url: String,
    },
}

/// Reasons a job is rejected before any I/O
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Unsupported printer type")]
    UnsupportedPrinterType,

    #[error("Missing printer address for thermal job")]
    MissingPrinterAddress,

    #[error("Invalid printer address: {0}")]
    InvalidPrinterAddress(String),

    #[error("Missing printer name for regular job")]
    MissingPrinterName,

    #[error("Missing document data for thermal job")]
    MissingDocumentData,

    #[error("Invalid document data: {0}")]
    InvalidDocumentData(String),

    #[error("PDF URL is required for regular printer")]
    MissingPdfUrl,
}

impl Job {
    /// Decode one entry of the pending list
    pub fn from_value(value: serde_json::Value) -> PendingJob {
        let id = match value.get("id") {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        serde_json::from_value(value).map_err(|e| UndecodableJob {
            id,
            reason: format!("Invalid job payload: {}", e),
        })
    }

    pub fn station_name(&self) -> &str {
        self.kitchen_station
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("-")
    }

    /// Resolve the job into a typed task
    pub fn task(&self) -> Result<PrintTask, JobError> {
        let printer = self
            .printer_ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match self.printer_type {
            PrinterType::Thermal => {
                let raw = printer.ok_or(JobError::MissingPrinterAddress)?;
                let target = ThermalTarget::parse(raw)
                    .ok_or_else(|| JobError::InvalidPrinterAddress(raw.to_string()))?;
                let ticket = self
                    .document_data
                    .clone()
                    .ok_or(JobError::MissingDocumentData)?;
                ticket
                    .validate()
                    .map_err(|e| JobError::InvalidDocumentData(validation_message(&e)))?;
                Ok(PrintTask::Thermal { target, ticket })
            }
            PrinterType::Regular => {
                let pdf_url = self
                    .pdf_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(JobError::MissingPdfUrl)?;
                let printer_name = printer.ok_or(JobError::MissingPrinterName)?;
                Ok(PrintTask::Regular {
                    target: RegularTarget {
                        printer_name: printer_name.to_string(),
                    },
                    pdf_url: pdf_url.to_string(),
                })
            }
            PrinterType::Unsupported => Err(JobError::UnsupportedPrinterType),
        }
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    // Flatten nested item errors into their messages
    fn collect(errors: &validator::ValidationErrors, out: &mut Vec<String>) {
        for (field, kind) in errors.errors() {
            match kind {
                validator::ValidationErrorsKind::Field(list) => {
                    out.extend(list.iter().map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("Validation error in field: {}", field))
                    }));
                }
                validator::ValidationErrorsKind::Struct(inner) => collect(inner, out),
                validator::ValidationErrorsKind::List(items) => {
                    for inner in items.values() {
                        collect(inner, out);
                    }
                }
            }
        }
    }

    let mut messages = Vec::new();
    collect(errors, &mut messages);
    messages.sort();
    messages.dedup();
    messages.join("; ")
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Job {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn thermal_job_resolves_to_default_port() {
        let job = parse(json!({
            "id": "j1",
            "printerType": "THERMAL",
            "printerIp": "10.0.0.5",
            "documentData": {
                "orderNumber": "42",
                "items": [{"quantity": 2, "name": "Burger", "modifiers": ["no onion"]}]
            }
        }));

        match job.task().unwrap() {
            PrintTask::Thermal { target, ticket } => {
                assert_eq!(target.to_string(), "10.0.0.5:9100");
                assert_eq!(ticket.order_number, "42");
                assert_eq!(ticket.items[0].modifiers, vec!["no onion".to_string()]);
            }
            other => panic!("unexpected task: {:?}", other),
        }
    }

    #[test]
    fn regular_job_without_pdf_url_is_malformed() {
        let job = parse(json!({"id": "j2", "printerType": "REGULAR", "pdfUrl": ""}));
        assert_eq!(job.task(), Err(JobError::MissingPdfUrl));

        let job = parse(json!({"id": "j3", "printerType": "REGULAR", "printerIp": "Office"}));
        assert_eq!(job.task(), Err(JobError::MissingPdfUrl));
    }

    #[test]
    fn regular_job_uses_printer_field_as_queue_name() {
        let job = parse(json!({
            "id": "j4",
            "printerType": "REGULAR",
            "printerIp": "HP LaserJet",
            "pdfUrl": "/api/print/jobs/j4/pdf"
        }));
        assert_eq!(
            job.task().unwrap(),
            PrintTask::Regular {
                target: RegularTarget {
                    printer_name: "HP LaserJet".to_string()
                },
                pdf_url: "/api/print/jobs/j4/pdf".to_string(),
            }
        );
    }

    #[test]
    fn unknown_printer_type_is_rejected() {
        let job = parse(json!({"id": "j5", "printerType": "LABEL", "printerIp": "10.0.0.9"}));
        assert_eq!(job.printer_type, PrinterType::Unsupported);
        assert_eq!(job.task(), Err(JobError::UnsupportedPrinterType));
    }

    #[test]
    fn invalid_ticket_items_are_rejected() {
        let job = parse(json!({
            "id": "j6",
            "printerType": "THERMAL",
            "printerIp": "10.0.0.5",
            "documentData": {"orderNumber": 7, "items": [{"quantity": 0, "name": "Soup"}]}
        }));
        match job.task() {
            Err(JobError::InvalidDocumentData(msg)) => {
                assert!(msg.contains("quantity"), "message: {}", msg)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn thermal_target_parsing() {
        assert_eq!(
            ThermalTarget::parse("printer.local:9200"),
            Some(ThermalTarget {
                host: "printer.local".to_string(),
                port: 9200
            })
        );
        assert_eq!(ThermalTarget::parse("fe80::1").map(|t| t.port), Some(9100));
        assert_eq!(
            ThermalTarget::parse("[fe80::1]"),
            Some(ThermalTarget {
                host: "fe80::1".to_string(),
                port: 9100
            })
        );
        assert_eq!(
            ThermalTarget::parse("[fe80::1]").unwrap().to_string(),
            "[fe80::1]:9100"
        );
        assert_eq!(ThermalTarget::parse("[fe80::1]:9200").map(|t| t.port), Some(9200));
        assert_eq!(ThermalTarget::parse("[]"), None);
        assert_eq!(ThermalTarget::parse("host:notaport"), None);
        assert_eq!(ThermalTarget::parse("  "), None);
    }

    #[test]
    fn null_modifiers_decode_as_empty() {
        let job = parse(json!({
            "id": "j8",
            "printerType": "THERMAL",
            "printerIp": "10.0.0.5",
            "documentData": {
                "orderNumber": "9",
                "items": [{"quantity": 1, "name": "Fries", "modifiers": null}]
            }
        }));
        let ticket = job.document_data.unwrap();
        assert!(ticket.items[0].modifiers.is_empty());
    }

    #[test]
    fn undecodable_entries_keep_their_id() {
        let bad = Job::from_value(json!({
            "id": 17,
            "printerIp": "10.0.0.5"
        }))
        .unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("17"));
        assert!(bad.reason.contains("printerType"), "reason: {}", bad.reason);

        let bad = Job::from_value(json!({
            "id": "j9",
            "printerType": "THERMAL",
            "documentData": {"orderNumber": "1", "items": [{"quantity": -1, "name": "Soup"}]}
        }))
        .unwrap_err();
        assert_eq!(bad.id.as_deref(), Some("j9"));

        let bad = Job::from_value(json!({"printerType": "THERMAL"})).unwrap_err();
        assert_eq!(bad.id, None);

        let good = Job::from_value(json!({"id": "j10", "printerType": "REGULAR"})).unwrap();
        assert_eq!(good.id, "j10");
    }

    #[test]
    fn status_update_serializes_camel_case() {
        let update = StatusUpdate {
            status: JobStatus::Failed,
            agent_id: "agent-a".to_string(),
            error_message: Some("boom".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"status": "FAILED", "agentId": "agent-a", "errorMessage": "boom"})
        );

        let update = StatusUpdate {
            status: JobStatus::Printing,
            agent_id: "agent-a".to_string(),
            error_message: None,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"status": "PRINTING", "agentId": "agent-a"})
        );
    }
}
