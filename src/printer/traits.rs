use async_trait::async_trait;
use crate::common::error::UpdaterError;

/// printer transport
/// events (connected, disconnected, received lines) are delivered on the channel given to the
/// implementation, not returned from these calls
#[async_trait]
pub trait PrinterConnection: Send + Sync {
    /// open the port, an already open connection is closed first
    async fn connect(&self, port: &str) -> Result<(), UpdaterError>;

    /// send one command line to the printer
    async fn send_command(&self, command: &str) -> Result<(), UpdaterError>;
}
