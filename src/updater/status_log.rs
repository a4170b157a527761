use std::thread::{self, JoinHandle};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::entity::dto::status_dto::StatusEventDto;
use crate::{info, warn};

const LOG_TAG: &str = "status_log";

/// status observer thread
/// writes every published status event to the log, exits when the reporter is dropped
pub fn status_log_thread(mut status_rx: broadcast::Receiver<StatusEventDto>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match status_rx.blocking_recv() {
            Ok(event) => match event.to_json() {
                Ok(json) => info!(LOG_TAG, "status: {}", json),
                Err(e) => warn!(LOG_TAG, "cannot serialize status event {:?}: {}", event, e),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(LOG_TAG, "status observer lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => {
                info!(LOG_TAG, "status channel closed, observer exiting");
                return;
            }
        }
    })
}
