use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{escpos, PrintError, TicketPrinter};
use crate::api::models::{DocumentData, ThermalTarget};

/// ESC/POS printer reachable over a raw TCP socket
pub struct NetworkThermalPrinter {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl NetworkThermalPrinter {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }

    async fn connect(&self, target: &ThermalTarget) -> Result<TcpStream, PrintError> {
        let address = target.to_string();
        let connecting = TcpStream::connect((target.host.as_str(), target.port));

        match timeout(self.connect_timeout, connecting).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(PrintError::Connect {
                address,
                message: e.to_string(),
            }),
            Err(_) => Err(PrintError::Timeout {
                address,
                phase: "connect",
            }),
        }
    }

    /// Write the whole ticket and half-close the socket
    async fn send(
        &self,
        stream: &mut TcpStream,
        target: &ThermalTarget,
        bytes: &[u8],
    ) -> Result<(), PrintError> {
        let address = target.to_string();
        let io = |source| PrintError::Io {
            address: address.clone(),
            source,
        };

        let writing = async {
            stream.write_all(bytes).await.map_err(io)?;
            stream.flush().await.map_err(io)?;
            stream.shutdown().await.map_err(io)
        };

        match timeout(self.write_timeout, writing).await {
            Ok(result) => result,
            Err(_) => Err(PrintError::Timeout {
                address: address.clone(),
                phase: "write",
            }),
        }
    }
}

#[async_trait]
impl TicketPrinter for NetworkThermalPrinter {
    async fn print_ticket(
        &self,
        target: &ThermalTarget,
        ticket: &DocumentData,
    ) -> Result<(), PrintError> {
        // The stream is owned here, so every early return drops and closes it
        let mut stream = self.connect(target).await?;
        debug!("Connected to thermal printer {}", target);

        let bytes = escpos::render_ticket(ticket, Local::now());
        self.send(&mut stream, target, &bytes).await?;

        info!(
            "Printed ticket for order {} on {} ({} bytes)",
            ticket.order_number,
            target,
            bytes.len()
        );
        Ok(())
    }
}
