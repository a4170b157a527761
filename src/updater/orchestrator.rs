//! update orchestrator
//! the single owner of updater state. One loop handles, one at a time:
//! - printer events (connect -> identification session, lines -> session, disconnect)
//! - inbound commands (check for update, flash with path / url / queued update)
//! - flash job completions
//! - a deadline tick for the identification session
//!
//! flash jobs run on their own tasks, the loop only tracks which port is busy

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::identification::{IdentificationSession, SessionOutcome, M115_COMMAND};
use super::status_reporter::SharedReporter;
use super::update_client::UpdateClient;
use crate::common::error::{ErrorCode, UpdaterError};
use crate::common::setting::Firmware;
use crate::entity::bo::device_identity_bo::DeviceIdentityBo;
use crate::entity::bo::flash_job_bo::{FlashJobBo, FlashOutcome, ImageSource};
use crate::entity::dto::status_dto::{StatusTypeEnum, StatusValueEnum};
use crate::entity::dto::update_info_dto::UpdateInfoDto;
use crate::flasher::flash_session::{run_guarded, FlashConfig, FlashSession};
use crate::flasher::process_runner::check_programmer;
use crate::printer::entity::PrinterEvent;
use crate::printer::traits::PrinterConnection;
use crate::{debug, error, info, warn};

const LOG_TAG: &str = "orchestrator";

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// acknowledgement of job acceptance, not of completion
pub type CommandReply = oneshot::Sender<Result<(), UpdaterError>>;

pub enum UpdaterCommand {
    FlashWithPath { file_path: PathBuf, port: String, reply: CommandReply },
    FlashWithUrl { url: String, port: String, reply: CommandReply },
    FlashUpdate { port: String, reply: CommandReply },
    CheckForUpdate { port: String, reply: CommandReply },
}

#[derive(Debug)]
pub struct FlashFinished {
    pub job_id: Uuid,
    pub port: String,
    pub outcome: FlashOutcome,
}

#[derive(Default)]
struct UpdaterState {
    printer_info: Option<DeviceIdentityBo>,
    update_info: Option<UpdateInfoDto>,
    // identify on the next connect even if check_after_connect is off
    force_check: bool,
    session: Option<IdentificationSession>,
    // port -> job in flight
    flash_jobs: HashMap<String, Uuid>,
}

pub struct UpdateOrchestrator {
    settings: Firmware,
    reporter: SharedReporter,
    printer: Arc<dyn PrinterConnection>,
    update_client: UpdateClient,
    state: UpdaterState,
    finished_tx: mpsc::UnboundedSender<FlashFinished>,
    finished_rx: Option<mpsc::UnboundedReceiver<FlashFinished>>,
}

impl UpdateOrchestrator {
    pub fn new(settings: Firmware, reporter: SharedReporter, printer: Arc<dyn PrinterConnection>) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        UpdateOrchestrator {
            update_client: UpdateClient::new(
                &settings.update_service_url,
                Duration::from_secs(settings.update_request_timeout_secs),
                reporter.clone(),
            ),
            settings,
            reporter,
            printer,
            state: UpdaterState::default(),
            finished_tx,
            finished_rx: Some(finished_rx),
        }
    }

    /// run the loop on its own thread with its own tokio runtime
    pub fn start(
        self,
        printer_rx: mpsc::UnboundedReceiver<PrinterEvent>,
        command_rx: mpsc::UnboundedReceiver<UpdaterCommand>,
    ) -> Result<JoinHandle<()>, UpdaterError> {
        let rt = tokio::runtime::Runtime::new().map_err(|e| {
            UpdaterError::new(ErrorCode::UnexpectedFailure, format!("cannot init tokio runtime: {}", e))
        })?;
        Ok(thread::spawn(move || {
            rt.block_on(self.run(printer_rx, command_rx));
        }))
    }

    pub async fn run(
        mut self,
        mut printer_rx: mpsc::UnboundedReceiver<PrinterEvent>,
        mut command_rx: mpsc::UnboundedReceiver<UpdaterCommand>,
    ) {
        let mut finished_rx = match self.finished_rx.take() {
            Some(rx) => rx,
            None => {
                error!(LOG_TAG, "orchestrator started twice");
                return;
            }
        };
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut printer_open = true;
        info!(LOG_TAG, "orchestrator running");

        loop {
            tokio::select! {
                event = printer_rx.recv(), if printer_open => {
                    match event {
                        Some(event) => self.handle_printer_event(event).await,
                        None => {
                            warn!(LOG_TAG, "printer event channel closed");
                            printer_open = false;
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!(LOG_TAG, "command channel closed, orchestrator exiting");
                            return;
                        }
                    }
                }
                Some(finished) = finished_rx.recv() => self.handle_flash_finished(finished),
                _ = tick.tick() => self.on_tick(SystemTime::now()),
            }
        }
    }

    pub async fn handle_printer_event(&mut self, event: PrinterEvent) {
        match event {
            PrinterEvent::Connected { port } => self.on_connected(&port).await,
            PrinterEvent::Disconnected => {
                if let Some(mut session) = self.state.session.take() {
                    session.on_disconnect();
                }
                self.state.printer_info = None;
            }
            PrinterEvent::Message(line) => {
                let outcome = match self.state.session.as_mut() {
                    Some(session) => session.on_message(&line, SystemTime::now()),
                    None => return,
                };
                self.apply_session_outcome(outcome).await;
            }
        }
    }

    async fn on_connected(&mut self, port: &str) {
        // whatever was known belongs to the previous connection
        self.state.printer_info = None;
        self.state.update_info = None;
        if !self.state.force_check && !self.settings.check_after_connect {
            debug!(LOG_TAG, "printer connected on {}, automatic check disabled", port);
            return;
        }
        self.state.force_check = false;

        // replaces any session still waiting
        let mut session = IdentificationSession::new(self.reporter.clone());
        self.reporter.send_status(
            StatusTypeEnum::CheckUpdateStatus,
            StatusValueEnum::Progress,
            "Retrieving current firmware version from printer...",
        );
        info!(LOG_TAG, "Retrieving current firmware version from printer...");
        session.begin(SystemTime::now());
        self.state.session = Some(session);

        if let Err(e) = self.printer.send_command(M115_COMMAND).await {
            error!(LOG_TAG, "cannot request firmware version: {}", e);
            self.state.session = None;
            self.reporter.send_status(
                StatusTypeEnum::CheckUpdateStatus,
                StatusValueEnum::Error,
                "Unable to get FW version from printer",
            );
        }
    }

    async fn apply_session_outcome(&mut self, outcome: SessionOutcome) {
        match outcome {
            SessionOutcome::Waiting => {}
            SessionOutcome::Failed(e) => {
                debug!(LOG_TAG, "identification finished without result: {}", e);
                self.state.session = None;
            }
            SessionOutcome::Resolved(identity) => {
                self.state.session = None;
                let result = self.update_client.check_identity(&identity).await;
                self.state.printer_info = Some(identity);
                if let Ok(update_info) = result {
                    self.state.update_info = Some(update_info);
                }
            }
        }
    }

    pub fn on_tick(&mut self, now: SystemTime) {
        if let Some(session) = self.state.session.as_mut() {
            if let SessionOutcome::Failed(_) = session.check_deadline(now) {
                self.state.session = None;
            }
        }
    }

    pub async fn handle_command(&mut self, command: UpdaterCommand) {
        match command {
            UpdaterCommand::CheckForUpdate { port, reply } => {
                let _ = reply.send(self.check_for_update(&port).await);
            }
            UpdaterCommand::FlashWithPath { file_path, port, reply } => {
                self.start_flash(ImageSource::LocalPath(file_path), &port, reply);
            }
            UpdaterCommand::FlashWithUrl { url, port, reply } => {
                self.start_flash(ImageSource::Url(url), &port, reply);
            }
            UpdaterCommand::FlashUpdate { port, reply } => self.flash_update(&port, reply),
        }
    }

    async fn check_for_update(&mut self, port: &str) -> Result<(), UpdaterError> {
        self.state.force_check = true;
        if let Some(session) = self.state.session.take() {
            debug!(LOG_TAG, "identification session {} superseded", session.session_id());
        }
        self.reporter.send_status(
            StatusTypeEnum::CheckUpdateStatus,
            StatusValueEnum::Progress,
            "Connecting to Printer...",
        );
        if let Err(e) = self.printer.connect(port).await {
            error!(LOG_TAG, "Unable to connect to printer on {}: {}", port, e);
            self.state.force_check = false;
            self.reporter.send_status(
                StatusTypeEnum::CheckUpdateStatus,
                StatusValueEnum::Error,
                "Unable to connect to printer",
            );
            return Err(e);
        }
        Ok(())
    }

    fn flash_update(&mut self, port: &str, reply: CommandReply) {
        let url = match self.state.update_info.as_ref().and_then(|info| info.ota.as_ref()) {
            Some(ota) => ota.url.clone(),
            None => {
                if let Err(e) = check_programmer(self.settings.programmer_path.as_deref()) {
                    let _ = reply.send(Err(e));
                    return;
                }
                error!(LOG_TAG, "No update info found");
                self.reporter.send_status(
                    StatusTypeEnum::FlashingStatus,
                    StatusValueEnum::Error,
                    "No update info found",
                );
                let _ = reply.send(Err(UpdaterError::new(ErrorCode::PreconditionFailure, "No update info found")));
                return;
            }
        };
        self.start_flash(ImageSource::Url(url), port, reply);
    }

    /// synchronous checks, then the job goes to its own task
    /// the reply is answered by the job once the image is staged
    fn start_flash(&mut self, source: ImageSource, port: &str, reply: CommandReply) {
        let programmer_path = match check_programmer(self.settings.programmer_path.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if let Some(job_id) = self.state.flash_jobs.get(port) {
            warn!(LOG_TAG, "flash job {} is still running on {}", job_id, port);
            let _ = reply.send(Err(UpdaterError::new(
                ErrorCode::Busy,
                format!("flash job {} is still running on {}", job_id, port),
            )));
            return;
        }

        let job = FlashJobBo::new(source, port);
        info!(LOG_TAG, "flash job {} accepted: {} -> {}", job.job_id, job.source, job.port);
        self.state.flash_jobs.insert(job.port.clone(), job.job_id);

        let job_id = job.job_id;
        let job_port = job.port.clone();
        let session = FlashSession::new(
            job,
            FlashConfig {
                programmer_path,
                device_id: self.settings.programmer_device_id.clone(),
                protocol: self.settings.programmer_protocol.clone(),
            },
            self.reporter.clone(),
        );
        let finished_tx = self.finished_tx.clone();
        tokio::spawn(async move {
            let outcome = run_guarded(session, Some(reply)).await;
            let _ = finished_tx.send(FlashFinished { job_id, port: job_port, outcome });
        });
    }

    pub fn handle_flash_finished(&mut self, finished: FlashFinished) {
        if self.state.flash_jobs.get(&finished.port) == Some(&finished.job_id) {
            self.state.flash_jobs.remove(&finished.port);
        }
        match finished.outcome {
            FlashOutcome::Success => {
                info!(LOG_TAG, "flash job {} on {} done, printer is up to date", finished.job_id, finished.port);
                self.state.update_info = Some(UpdateInfoDto::up_to_date());
            }
            FlashOutcome::Failure(failure) => {
                debug!(LOG_TAG, "flash job {} on {} failed: {:?}", finished.job_id, finished.port, failure);
            }
        }
    }

    pub fn printer_info(&self) -> Option<&DeviceIdentityBo> {
        self.state.printer_info.as_ref()
    }

    pub fn update_info(&self) -> Option<&UpdateInfoDto> {
        self.state.update_info.as_ref()
    }
}
