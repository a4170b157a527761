//! update service client
//! GET {template filled with model / fw_version / language}, expects 200 and
//! {"available": bool, "ota": {"url": .., "fw_version": ..}}

use std::time::Duration;

use super::status_reporter::SharedReporter;
use crate::common::error::{ErrorCode, UpdaterError};
use crate::common::http;
use crate::entity::bo::device_identity_bo::DeviceIdentityBo;
use crate::entity::dto::status_dto::{StatusTypeEnum, StatusValueEnum};
use crate::entity::dto::update_info_dto::UpdateInfoDto;
use crate::{error, info};

const LOG_TAG: &str = "update_client";

const UNREACHABLE: &str = "Unable to connect to update server";
const INVALID_RESPONSE: &str = "Invalid response from update server";

pub struct UpdateClient {
    url_template: String,
    // bounds the whole request, the orchestrator waits on it
    timeout: Duration,
    reporter: SharedReporter,
}

impl UpdateClient {
    pub fn new(url_template: &str, timeout: Duration, reporter: SharedReporter) -> Self {
        UpdateClient {
            url_template: url_template.to_string(),
            timeout,
            reporter,
        }
    }

    pub async fn check_identity(&self, identity: &DeviceIdentityBo) -> Result<UpdateInfoDto, UpdaterError> {
        self.check(
            identity.machine_type()?,
            identity.firmware_version()?,
            identity.firmware_language()?,
        )
        .await
    }

    /// ask the update service, the result is also reported on the status channel
    pub async fn check(&self, model: &str, fw_version: &str, language: &str) -> Result<UpdateInfoDto, UpdaterError> {
        let url = match http::fill_url_template(&self.url_template, model, fw_version, language) {
            Ok(url) => url,
            Err(e) => {
                error!(LOG_TAG, "Unable to connect to update server: {}", e);
                return Err(self.fail(e.code, UNREACHABLE));
            }
        };
        info!(LOG_TAG, "checking for firmware update: {}", url);

        let (status, body) = match http::get_json(&url, self.timeout).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(LOG_TAG, "Unable to connect to update server: {}", e);
                return Err(self.fail(e.code, UNREACHABLE));
            }
        };
        if status != 200 {
            error!(LOG_TAG, "Unable to connect to update server: Got status code {}", status);
            return Err(self.fail(ErrorCode::RemoteServiceFailure, UNREACHABLE));
        }

        let update_info: UpdateInfoDto = serde_json::from_value(body).map_err(|e| {
            error!(LOG_TAG, "update server answered without a valid availability: {}", e);
            self.fail(ErrorCode::RemoteServiceFailure, INVALID_RESPONSE)
        })?;

        match (update_info.available, &update_info.ota) {
            (true, Some(ota)) => {
                info!(LOG_TAG, "Firmware update available (FW version: {})", ota.fw_version);
                self.reporter.send_status(
                    StatusTypeEnum::CheckUpdateStatus,
                    StatusValueEnum::UpdateAvailable,
                    &ota.fw_version,
                );
            }
            (true, None) => {
                error!(LOG_TAG, "update server reported an update without ota info");
                return Err(self.fail(ErrorCode::RemoteServiceFailure, INVALID_RESPONSE));
            }
            (false, _) => {
                info!(LOG_TAG, "Firmware is up to date");
                self.reporter.send_status(StatusTypeEnum::CheckUpdateStatus, StatusValueEnum::UpToDate, "");
            }
        }
        Ok(update_info)
    }

    fn fail(&self, code: ErrorCode, description: &str) -> UpdaterError {
        self.reporter.send_status(StatusTypeEnum::CheckUpdateStatus, StatusValueEnum::Error, description);
        UpdaterError::new(code, description)
    }
}
