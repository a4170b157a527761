//! identification session
//! one timed M115 handshake: armed on device connect, resolved by the first line carrying the
//! identity markers, or finished by timeout / parse error / disconnect
//!
//! the session only sees messages while it is listening (AwaitingResponse), leaving that state
//! is the unsubscribe. A new session replaces the old one, so a superseded session never
//! publishes anything again.

use std::time::{Duration, SystemTime};
use uuid::Uuid;

use super::response_parser::parse_m115;
use super::status_reporter::SharedReporter;
use crate::common::error::{ErrorCode, UpdaterError};
use crate::entity::bo::device_identity_bo::{DeviceIdentityBo, FIRMWARE_VERSION_KEY, MACHINE_TYPE_KEY};
use crate::entity::dto::status_dto::{StatusTypeEnum, StatusValueEnum};
use crate::{debug, error, info};

const LOG_TAG: &str = "identification";

pub const M115_COMMAND: &str = "M115\n";

/// time the device has to answer M115
pub const IDENTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStateEnum {
    Idle,
    AwaitingResponse,
    Resolved,
    TimedOut,
    Errored,
}

#[derive(Debug)]
pub enum SessionOutcome {
    // nothing decided yet, or the message was not for us
    Waiting,
    Resolved(DeviceIdentityBo),
    // already reported on the status channel
    Failed(UpdaterError),
}

pub struct IdentificationSession {
    session_id: Uuid,
    state: SessionStateEnum,
    started_at: Option<SystemTime>,
    reporter: SharedReporter,
}

impl IdentificationSession {
    pub fn new(reporter: SharedReporter) -> Self {
        IdentificationSession {
            session_id: Uuid::new_v4(),
            state: SessionStateEnum::Idle,
            started_at: None,
            reporter,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionStateEnum {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == SessionStateEnum::AwaitingResponse
    }

    /// arm the session, the caller sends the M115 command right after
    pub fn begin(&mut self, now: SystemTime) {
        if self.state != SessionStateEnum::Idle {
            return;
        }
        self.started_at = Some(now);
        self.state = SessionStateEnum::AwaitingResponse;
        debug!(LOG_TAG, "session {} waiting for M115 response", self.session_id);
    }

    /// feed one raw device line
    pub fn on_message(&mut self, data: &str, now: SystemTime) -> SessionOutcome {
        if !self.is_listening() {
            return SessionOutcome::Waiting;
        }

        // deadline first, before looking at the content
        if self.deadline_passed(now) {
            return self.time_out();
        }

        if !(data.contains(MACHINE_TYPE_KEY) && data.contains(FIRMWARE_VERSION_KEY)) {
            return SessionOutcome::Waiting;
        }

        match parse_m115(data).and_then(|identity| {
            identity.machine_type()?;
            identity.firmware_version()?;
            identity.firmware_language()?;
            Ok(identity)
        }) {
            Ok(identity) => {
                self.state = SessionStateEnum::Resolved;
                info!(
                    LOG_TAG,
                    "Connected printer: {} (FW version: {})",
                    identity.get(MACHINE_TYPE_KEY).unwrap_or_default(),
                    identity.get(FIRMWARE_VERSION_KEY).unwrap_or_default()
                );
                SessionOutcome::Resolved(identity)
            }
            Err(e) => {
                self.state = SessionStateEnum::Errored;
                error!(LOG_TAG, "Unable to parse M115 response: {}", e);
                self.reporter.send_status(
                    StatusTypeEnum::CheckUpdateStatus,
                    StatusValueEnum::Error,
                    "Unable to parse M115 response",
                );
                SessionOutcome::Failed(e)
            }
        }
    }

    /// deadline check without a message, driven by the orchestrator tick
    pub fn check_deadline(&mut self, now: SystemTime) -> SessionOutcome {
        if self.is_listening() && self.deadline_passed(now) {
            return self.time_out();
        }
        SessionOutcome::Waiting
    }

    pub fn on_disconnect(&mut self) -> SessionOutcome {
        if !self.is_listening() {
            return SessionOutcome::Waiting;
        }
        self.state = SessionStateEnum::Errored;
        self.started_at = None;
        error!(LOG_TAG, "Printer was disconnected during identification");
        self.reporter.send_status(
            StatusTypeEnum::CheckUpdateStatus,
            StatusValueEnum::Error,
            "Printer was disconnected",
        );
        SessionOutcome::Failed(UpdaterError::new(ErrorCode::ConnectionFailure, "Printer was disconnected"))
    }

    // elapsed past the window, or the clock went backwards
    fn deadline_passed(&self, now: SystemTime) -> bool {
        match self.started_at {
            Some(started_at) => match now.duration_since(started_at) {
                Ok(elapsed) => elapsed > IDENTIFICATION_TIMEOUT,
                Err(_) => true,
            },
            None => false,
        }
    }

    fn time_out(&mut self) -> SessionOutcome {
        self.state = SessionStateEnum::TimedOut;
        error!(LOG_TAG, "Unable to get FW version from printer");
        self.reporter.send_status(
            StatusTypeEnum::CheckUpdateStatus,
            StatusValueEnum::Error,
            "Unable to get FW version from printer",
        );
        SessionOutcome::Failed(UpdaterError::new(ErrorCode::TimeoutFailure, "Unable to get FW version from printer"))
    }
}
