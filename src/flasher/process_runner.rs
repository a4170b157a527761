//! programmer process runner
//! - precondition check of the programmer executable
//! - build the avrdude command line
//! - run it, classify stderr line by line, return a structured outcome

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::common::error::{ErrorCode, UpdaterError};
use crate::entity::bo::flash_job_bo::{FlashFailureEnum, FlashOutcome, LineClassEnum, ProgressStepEnum};
use crate::{debug, error, info, trace, warn};

const LOG_TAG: &str = "process_runner";

// stderr poll timeout, the child is checked for exit between polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const WRITING_MARKER: &str = "avrdude: writing";
// the "verifying flash memory against" header line is not a step of its own
const VERIFYING_MARKER: &str = "avrdude: verifying ...";
const TIMEOUT_MARKER: &str = "timeout communicating with programmer";
const ERROR_MARKER: &str = "avrdude: ERROR:";

/// programmer must exist, be a regular file and be executable
pub fn check_programmer(programmer_path: Option<&str>) -> Result<PathBuf, UpdaterError> {
    let precondition = |msg: String| {
        error!(LOG_TAG, "{}", msg);
        UpdaterError::new(ErrorCode::PreconditionFailure, msg)
    };

    let path = match programmer_path {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return Err(precondition("Path to avrdude is not configured".to_string())),
    };
    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(_) => return Err(precondition(format!("Path to avrdude does not exist: {}", path.display()))),
    };
    if !metadata.is_file() {
        return Err(precondition(format!("Path to avrdude is not a file: {}", path.display())));
    }
    if !is_executable(&metadata) {
        return Err(precondition(format!("Path to avrdude is not executable: {}", path.display())));
    }
    Ok(path)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// classify one stderr line of avrdude
pub fn classify_line(line: &str) -> LineClassEnum {
    if line.contains(WRITING_MARKER) {
        LineClassEnum::Progress(ProgressStepEnum::Writing)
    } else if line.contains(VERIFYING_MARKER) {
        LineClassEnum::Progress(ProgressStepEnum::Verifying)
    } else if line.contains(TIMEOUT_MARKER) {
        LineClassEnum::Fatal(FlashFailureEnum::ProgrammerTimeout)
    } else if let Some(pos) = line.find(ERROR_MARKER) {
        let msg = line[pos + ERROR_MARKER.len()..].trim();
        LineClassEnum::Fatal(FlashFailureEnum::ProgrammerError(msg.to_string()))
    } else {
        LineClassEnum::Continue
    }
}

#[derive(Debug, Clone)]
pub struct ProgrammerCommand {
    pub programmer_path: PathBuf,
    pub device_id: String,
    pub protocol: String,
    pub port: String,
    pub image_path: PathBuf,
}

impl ProgrammerCommand {
    /// -v -p <device> -c <protocol> -P <port> -U flash:w:<image>:i -D
    pub fn args(&self) -> Vec<String> {
        vec![
            "-v".to_string(),
            "-p".to_string(),
            self.device_id.clone(),
            "-c".to_string(),
            self.protocol.clone(),
            "-P".to_string(),
            self.port.clone(),
            "-U".to_string(),
            format!("flash:w:{}:i", self.image_path.display()),
            "-D".to_string(),
        ]
    }

    /// the programmer runs inside its own directory
    pub fn working_dir(&self) -> Option<&Path> {
        self.programmer_path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// run until exit or the first fatal line, progress lines go to on_progress in order
    pub async fn supervise<F>(&self, mut on_progress: F) -> Result<FlashOutcome, UpdaterError>
    where
        F: FnMut(ProgressStepEnum),
    {
        let unexpected = |msg: String| UpdaterError::new(ErrorCode::UnexpectedFailure, msg);

        let mut command = Command::new(&self.programmer_path);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.working_dir() {
            command.current_dir(dir);
        }

        info!(
            LOG_TAG,
            "Running {} {} in {}",
            self.programmer_path.display(),
            self.args().join(" "),
            self.working_dir().map(|p| p.display().to_string()).unwrap_or_default()
        );
        let mut child = command
            .spawn()
            .map_err(|e| unexpected(format!("cannot start programmer: {}", e)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| unexpected("programmer stderr is not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();

        let mut verified = false;
        let mut exited = false;
        let fatal = loop {
            match tokio::time::timeout(POLL_INTERVAL, lines.next_line()).await {
                Err(_) => {
                    // nothing to read; after the programmer is gone one more quiet poll ends the loop
                    if exited {
                        break None;
                    }
                    exited = child
                        .try_wait()
                        .map_err(|e| unexpected(format!("cannot poll programmer: {}", e)))?
                        .is_some();
                }
                Ok(Ok(Some(line))) => {
                    trace!(LOG_TAG, "avrdude: {}", line);
                    match classify_line(&line) {
                        LineClassEnum::Progress(step) => {
                            if step == ProgressStepEnum::Verifying {
                                verified = true;
                            }
                            on_progress(step);
                        }
                        LineClassEnum::Fatal(failure) => break Some(failure),
                        LineClassEnum::Continue => {}
                    }
                }
                Ok(Ok(None)) => break None,
                Ok(Err(e)) => return Err(unexpected(format!("cannot read programmer output: {}", e))),
            }
        };

        if let Some(failure) = fatal {
            // stop reading, the programmer is not left running on its own
            if let Err(e) = child.start_kill() {
                debug!(LOG_TAG, "programmer already exited: {}", e);
            }
            let _ = child.wait().await;
            return Ok(FlashOutcome::Failure(failure));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| unexpected(format!("cannot wait for programmer: {}", e)))?;
        match status.code() {
            Some(0) => {
                if !verified {
                    warn!(LOG_TAG, "programmer exited with 0 without a verification step");
                }
                Ok(FlashOutcome::Success)
            }
            Some(code) => Ok(FlashOutcome::Failure(FlashFailureEnum::ExitCode(code))),
            None => Ok(FlashOutcome::Failure(FlashFailureEnum::Killed)),
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use std::io::Write;

    /// write an executable shell script into dir, standing in for avrdude
    #[cfg(unix)]
    pub fn fake_programmer(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("avrdude");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn command(programmer_path: PathBuf) -> ProgrammerCommand {
        ProgrammerCommand {
            programmer_path,
            device_id: "m2560".to_string(),
            protocol: "wiring".to_string(),
            port: "/dev/ttyACM0".to_string(),
            image_path: PathBuf::from("/tmp/fw.hex"),
        }
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("avrdude: writing flash (2048 bytes):"),
            LineClassEnum::Progress(ProgressStepEnum::Writing)
        );
        assert_eq!(
            classify_line("avrdude: verifying ..."),
            LineClassEnum::Progress(ProgressStepEnum::Verifying)
        );
        assert_eq!(
            classify_line("avrdude: stk500v2_ReceiveMessage(): timeout communicating with programmer"),
            LineClassEnum::Fatal(FlashFailureEnum::ProgrammerTimeout)
        );
        assert_eq!(
            classify_line("avrdude: ERROR: foo"),
            LineClassEnum::Fatal(FlashFailureEnum::ProgrammerError("foo".to_string()))
        );
        assert_eq!(classify_line("avrdude: Device signature = 0x1e9801"), LineClassEnum::Continue);
        assert_eq!(
            classify_line("avrdude: verifying flash memory against /tmp/firmware-x.hex:"),
            LineClassEnum::Continue
        );
    }

    #[test]
    fn test_args() {
        let cmd = command(PathBuf::from("/opt/avr/bin/avrdude"));
        assert_eq!(
            cmd.args().join(" "),
            "-v -p m2560 -c wiring -P /dev/ttyACM0 -U flash:w:/tmp/fw.hex:i -D"
        );
        assert_eq!(cmd.working_dir(), Some(Path::new("/opt/avr/bin")));
    }

    #[test]
    fn test_check_programmer_missing() {
        let err = check_programmer(Some("/definitely/not/here/avrdude")).unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailure);
        assert!(check_programmer(None).is_err());
    }

    #[test]
    fn test_check_programmer_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_programmer(dir.path().to_str()).unwrap_err();
        assert!(err.msg.contains("is not a file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_programmer_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avrdude");
        std::fs::write(&path, "").unwrap();
        let err = check_programmer(path.to_str()).unwrap_err();
        assert!(err.msg.contains("is not executable"));

        let script = fake_programmer(dir.path(), "exit 0");
        assert_eq!(check_programmer(script.to_str()).unwrap(), script);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_programmer(
            dir.path(),
            "echo 'avrdude: writing flash (10 bytes):' >&2\necho 'avrdude: verifying flash memory against /tmp/fw.hex:' >&2\necho 'avrdude: verifying ...' >&2\necho \"$@\" > args.txt\nexit 0",
        );
        let mut steps = Vec::new();
        let outcome = command(script).supervise(|s| steps.push(s)).await.unwrap();
        assert_eq!(outcome, FlashOutcome::Success);
        assert_eq!(steps, vec![ProgressStepEnum::Writing, ProgressStepEnum::Verifying]);

        // executed inside the programmer directory with the expected arguments
        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(args.trim(), "-v -p m2560 -c wiring -P /dev/ttyACM0 -U flash:w:/tmp/fw.hex:i -D");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_error_line_stops_reading() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_programmer(
            dir.path(),
            "echo 'avrdude: ERROR: foo' >&2\necho 'avrdude: writing flash' >&2\nexit 1",
        );
        let mut steps = Vec::new();
        let outcome = command(script).supervise(|s| steps.push(s)).await.unwrap();
        assert_eq!(outcome, FlashOutcome::Failure(FlashFailureEnum::ProgrammerError("foo".to_string())));
        assert!(steps.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_timeout_line_kills_programmer() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_programmer(
            dir.path(),
            "echo 'avrdude: ser_recv(): timeout communicating with programmer' >&2\nsleep 30\nexit 0",
        );
        let outcome = tokio::time::timeout(Duration::from_secs(10), command(script).supervise(|_| {}))
            .await
            .expect("programmer was not terminated")
            .unwrap();
        assert_eq!(outcome, FlashOutcome::Failure(FlashFailureEnum::ProgrammerTimeout));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_programmer(dir.path(), "echo 'avrdude: something odd' >&2\nexit 3");
        let outcome = command(script).supervise(|_| {}).await.unwrap();
        assert_eq!(outcome, FlashOutcome::Failure(FlashFailureEnum::ExitCode(3)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_silent_long_run() {
        let dir = tempfile::tempdir().unwrap();
        // no output for longer than one poll interval
        let script = fake_programmer(dir.path(), "sleep 1\necho 'avrdude: verifying ...' >&2\nexit 0");
        let mut steps = Vec::new();
        let outcome = command(script).supervise(|s| steps.push(s)).await.unwrap();
        assert_eq!(outcome, FlashOutcome::Success);
        assert_eq!(steps, vec![ProgressStepEnum::Verifying]);
    }
}
