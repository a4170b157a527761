//! staged firmware image
//! the image always lives in a fresh temporary file owned by one flash session,
//! the file is removed when the image is released or dropped

use std::fs::File;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::common::error::{ErrorCode, UpdaterError};
use crate::common::http;
use crate::entity::bo::flash_job_bo::ImageSource;
use crate::{debug, warn};

const LOG_TAG: &str = "firmware_image";

#[derive(Debug)]
pub struct FirmwareImage {
    file: NamedTempFile,
}

impl FirmwareImage {
    fn create_temp() -> Result<NamedTempFile, UpdaterError> {
        tempfile::Builder::new()
            .prefix("firmware-")
            .suffix(".hex")
            .tempfile()
            .map_err(|e| UpdaterError::new(ErrorCode::AcquisitionFailure, format!("cannot create temporary file: {}", e)))
    }

    /// copy a local (uploaded) file into a temporary file
    pub fn copy_local(path: &Path) -> Result<Self, UpdaterError> {
        let acquisition = |msg: String| UpdaterError::new(ErrorCode::AcquisitionFailure, msg);
        let mut source = File::open(path)
            .map_err(|e| acquisition(format!("cannot open {}: {}", path.display(), e)))?;
        let mut file = Self::create_temp()?;
        std::io::copy(&mut source, file.as_file_mut())
            .map_err(|e| acquisition(format!("cannot copy {}: {}", path.display(), e)))?;
        debug!(LOG_TAG, "copied {} to {}", path.display(), file.path().display());
        Ok(FirmwareImage { file })
    }

    /// download a remote image into a temporary file
    pub async fn download(url: &str) -> Result<Self, UpdaterError> {
        let mut file = Self::create_temp()?;
        http::download_to_file(url, file.as_file_mut()).await?;
        debug!(LOG_TAG, "downloaded {} to {}", url, file.path().display());
        Ok(FirmwareImage { file })
    }

    pub async fn acquire(source: &ImageSource) -> Result<Self, UpdaterError> {
        match source {
            ImageSource::LocalPath(path) => Self::copy_local(path),
            ImageSource::Url(url) => Self::download(url).await,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// remove the temporary file
    pub fn release(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(_) => debug!(LOG_TAG, "released image {}", path.display()),
            Err(e) => warn!(LOG_TAG, "cannot remove image {}: {}", path.display(), e),
        }
    }
}
