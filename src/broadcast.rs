//! Best-effort side-channel notification to a secondary peripheral.
//!
//! Distinct from the reliable dispatch path: every failure here is caught by
//! the scheduler, logged, counted, and never aborts a cycle. Availability is
//! decided once at startup (connect-or-disable).

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors a peripheral write can report.
#[derive(Debug, Error)]
pub enum PeripheralError {
    #[error("peripheral write failed: {0}")]
    Write(#[from] io::Error),
}

/// One pluggable notification channel accepting short text labels.
#[async_trait]
pub trait Broadcaster: Send {
    /// Push a label to the peripheral. Best-effort.
    async fn notify(&mut self, label: &str) -> Result<(), PeripheralError>;

    /// Release the underlying channel. Idempotent.
    async fn close(&mut self);
}

/// Writes newline-terminated labels to a character-device port.
///
/// Line discipline and baud setup are left to the platform; the configured
/// baud rate travels in the agent config as a collaborator parameter.
pub struct PortBroadcaster {
    path: PathBuf,
    port: Option<tokio::fs::File>,
}

impl PortBroadcaster {
    /// Open the port for writing.
    ///
    /// Failure here means the peripheral is absent and the agent runs with
    /// broadcasting disabled.
    pub async fn connect(path: impl Into<PathBuf>) -> Result<Self, PeripheralError> {
        let path = path.into();
        let port = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await?;
        tracing::debug!(port = %path.display(), "Peripheral connected");
        Ok(Self {
            path,
            port: Some(port),
        })
    }
}

impl std::fmt::Debug for PortBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortBroadcaster")
            .field("path", &self.path)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

#[async_trait]
impl Broadcaster for PortBroadcaster {
    async fn notify(&mut self, label: &str) -> Result<(), PeripheralError> {
        let Some(port) = self.port.as_mut() else {
            return Err(PeripheralError::Write(io::Error::new(
                io::ErrorKind::NotConnected,
                "port closed",
            )));
        };
        port.write_all(format!("{label}\n").as_bytes()).await?;
        port.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        // dropping the handle closes the descriptor
        self.port.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_writes_newline_terminated_label() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut broadcaster = PortBroadcaster::connect(file.path()).await.unwrap();

        broadcaster.notify("plastic").await.unwrap();
        broadcaster.notify("metal").await.unwrap();
        broadcaster.close().await;

        let written = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(written, "plastic\nmetal\n");
    }

    #[tokio::test]
    async fn connect_missing_port_fails() {
        assert!(PortBroadcaster::connect("/nonexistent/ttyUSB9").await.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_notify_after_close_errors() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut broadcaster = PortBroadcaster::connect(file.path()).await.unwrap();

        broadcaster.close().await;
        broadcaster.close().await;
        assert!(broadcaster.notify("glass").await.is_err());
    }
}
