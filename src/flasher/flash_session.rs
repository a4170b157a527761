//! flash session
//! lifecycle of one flash job: Preparing -> Flashing -> Succeeded | Failed
//! the staged image is released on every exit path

use std::path::PathBuf;
use tokio::sync::oneshot;

use super::image::FirmwareImage;
use super::process_runner::ProgrammerCommand;
use crate::common::error::UpdaterError;
use crate::entity::bo::flash_job_bo::{FlashFailureEnum, FlashJobBo, FlashOutcome};
use crate::entity::dto::status_dto::{StatusTypeEnum, StatusValueEnum};
use crate::updater::status_reporter::SharedReporter;
use crate::{error, info};

const LOG_TAG: &str = "flash_session";

/// ack sent once the image is staged (Ok) or could not be staged (Err)
pub type AcceptReply = oneshot::Sender<Result<(), UpdaterError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashSessionStateEnum {
    Preparing,
    Flashing,
    Succeeded,
    Failed,
}

/// programmer settings for one session, the path is already checked
#[derive(Debug, Clone)]
pub struct FlashConfig {
    pub programmer_path: PathBuf,
    pub device_id: String,
    pub protocol: String,
}

pub struct FlashSession {
    job: FlashJobBo,
    config: FlashConfig,
    state: FlashSessionStateEnum,
    reporter: SharedReporter,
}

impl FlashSession {
    pub fn new(job: FlashJobBo, config: FlashConfig, reporter: SharedReporter) -> Self {
        FlashSession {
            job,
            config,
            state: FlashSessionStateEnum::Preparing,
            reporter,
        }
    }

    pub fn job(&self) -> &FlashJobBo {
        &self.job
    }

    pub fn state(&self) -> FlashSessionStateEnum {
        self.state
    }

    /// stage the image, answer the caller, then flash
    /// acquisition failures are logged and returned to the caller only, no status event
    pub async fn execute(mut self, accept: Option<AcceptReply>) -> FlashOutcome {
        let image = match FirmwareImage::acquire(&self.job.source).await {
            Ok(image) => image,
            Err(e) => {
                self.state = FlashSessionStateEnum::Failed;
                error!(LOG_TAG, "job {}: cannot acquire firmware from {}: {}", self.job.job_id, self.job.source, e);
                let msg = e.msg.clone();
                if let Some(accept) = accept {
                    let _ = accept.send(Err(e));
                }
                return FlashOutcome::Failure(FlashFailureEnum::Acquisition(msg));
            }
        };
        if let Some(accept) = accept {
            let _ = accept.send(Ok(()));
        }
        self.flash(image).await
    }

    /// run the programmer against a staged image, the image is consumed and released here
    pub async fn flash(&mut self, image: FirmwareImage) -> FlashOutcome {
        self.state = FlashSessionStateEnum::Flashing;
        let command = ProgrammerCommand {
            programmer_path: self.config.programmer_path.clone(),
            device_id: self.config.device_id.clone(),
            protocol: self.config.protocol.clone(),
            port: self.job.port.clone(),
            image_path: image.path().to_path_buf(),
        };

        let reporter = self.reporter.clone();
        let result = command
            .supervise(|step| {
                info!(LOG_TAG, "{}", step.description());
                reporter.send_status(StatusTypeEnum::FlashingStatus, StatusValueEnum::Progress, step.description());
            })
            .await;
        image.release();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => FlashOutcome::Failure(FlashFailureEnum::Unexpected(e.msg)),
        };
        self.finish(&outcome);
        outcome
    }

    fn finish(&mut self, outcome: &FlashOutcome) {
        match outcome {
            FlashOutcome::Success => {
                self.state = FlashSessionStateEnum::Succeeded;
                info!(LOG_TAG, "job {}: Flashing successful.", self.job.job_id);
                self.reporter.send_status(StatusTypeEnum::FlashingStatus, StatusValueEnum::Successful, "");
                self.reporter.send_status(StatusTypeEnum::CheckUpdateStatus, StatusValueEnum::UpToDate, "");
            }
            FlashOutcome::Failure(failure) => {
                self.state = FlashSessionStateEnum::Failed;
                match failure {
                    FlashFailureEnum::Unexpected(msg) => {
                        error!(LOG_TAG, "job {}: Flashing failed. Unexpected error: {}", self.job.job_id, msg)
                    }
                    _ => error!(
                        LOG_TAG,
                        "job {}: Flashing failed ({:?}). {}.",
                        self.job.job_id,
                        failure.code(),
                        failure.description()
                    ),
                }
                self.reporter.send_status(
                    StatusTypeEnum::FlashingStatus,
                    StatusValueEnum::Error,
                    &failure.description(),
                );
            }
        }
    }
}

/// run a session on its own task; a panic inside it is reported as an unexpected error
pub async fn run_guarded(session: FlashSession, accept: Option<AcceptReply>) -> FlashOutcome {
    let reporter = session.reporter.clone();
    let job_id = session.job.job_id;
    match tokio::spawn(session.execute(accept)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(LOG_TAG, "job {}: Flashing failed. Unexpected error: {}", job_id, e);
            reporter.send_status(StatusTypeEnum::FlashingStatus, StatusValueEnum::Error, "Unexpected error");
            FlashOutcome::Failure(FlashFailureEnum::Unexpected(e.to_string()))
        }
    }
}
