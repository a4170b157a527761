//! flash job business objects

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

use crate::common::error::ErrorCode;

/// where the firmware image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    LocalPath(PathBuf),
    Url(String),
}

impl Display for ImageSource {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ImageSource::LocalPath(path) => write!(f, "file {}", path.display()),
            ImageSource::Url(url) => write!(f, "url {}", url),
        }
    }
}

/// one flash request, the staged image is owned by the flash session running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJobBo {
    pub job_id: Uuid,
    pub source: ImageSource,
    pub port: String,
}

impl FlashJobBo {
    pub fn new(source: ImageSource, port: &str) -> Self {
        FlashJobBo {
            job_id: Uuid::new_v4(),
            source,
            port: port.to_string(),
        }
    }
}

/// classification of one programmer stderr line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClassEnum {
    Progress(ProgressStepEnum),
    Fatal(FlashFailureEnum),
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStepEnum {
    Writing,
    Verifying,
}

impl ProgressStepEnum {
    pub fn description(&self) -> &'static str {
        match self {
            ProgressStepEnum::Writing => "Writing memory...",
            ProgressStepEnum::Verifying => "Verifying memory...",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashFailureEnum {
    // "timeout communicating with programmer"
    ProgrammerTimeout,
    // text after "avrdude: ERROR:"
    ProgrammerError(String),
    ExitCode(i32),
    // terminated by a signal
    Killed,
    // image could not be staged, programmer never started
    Acquisition(String),
    // spawn / io error / panic while supervising
    Unexpected(String),
}

impl FlashFailureEnum {
    pub fn description(&self) -> String {
        match self {
            FlashFailureEnum::ProgrammerTimeout => "Timeout communicating with programmer".to_string(),
            FlashFailureEnum::ProgrammerError(msg) => format!("Avrdude error: {}", msg),
            FlashFailureEnum::ExitCode(code) => format!("Avrdude returned code {}", code),
            FlashFailureEnum::Killed => "Avrdude was terminated by a signal".to_string(),
            FlashFailureEnum::Acquisition(msg) => format!("Unable to acquire firmware image: {}", msg),
            FlashFailureEnum::Unexpected(_) => "Unexpected error".to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            FlashFailureEnum::ProgrammerTimeout => ErrorCode::TimeoutFailure,
            FlashFailureEnum::ProgrammerError(_) | FlashFailureEnum::ExitCode(_) | FlashFailureEnum::Killed => {
                ErrorCode::ProcessFailure
            }
            FlashFailureEnum::Acquisition(_) => ErrorCode::AcquisitionFailure,
            FlashFailureEnum::Unexpected(_) => ErrorCode::UnexpectedFailure,
        }
    }
}

/// result of supervising one programmer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOutcome {
    Success,
    Failure(FlashFailureEnum),
}
