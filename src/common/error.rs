use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    // programmer missing or not executable
    PreconditionFailure = 1000,
    // local copy or remote download of the image failed
    AcquisitionFailure = 1001,
    // malformed device response
    ParseFailure = 1002,
    // identification deadline, or programmer communication timeout
    TimeoutFailure = 1003,
    // update service unreachable or non-200
    RemoteServiceFailure = 1004,
    // programmer nonzero exit or error line
    ProcessFailure = 1005,
    // printer port could not be opened
    ConnectionFailure = 1006,
    // a flash job is already running on the port
    Busy = 1007,
    UnexpectedFailure = 1999,
}

#[derive(Debug, Clone)]
pub struct UpdaterError {
    pub code: ErrorCode,
    pub msg: String,
}

impl UpdaterError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        UpdaterError { code, msg: msg.into() }
    }
}

impl Display for UpdaterError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "firmware updater error code: {}, msg: {}", self.code as u16, self.msg)
    }
}

impl Error for UpdaterError {}
