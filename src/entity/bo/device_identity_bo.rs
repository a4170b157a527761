//! identity of the connected printer, parsed from one M115 response line

use std::collections::HashMap;
use crate::common::error::{ErrorCode, UpdaterError};

pub const MACHINE_TYPE_KEY: &str = "MACHINE_TYPE";
pub const FIRMWARE_VERSION_KEY: &str = "FIRMWARE_VERSION";
pub const FIRMWARE_LANGUAGE_KEY: &str = "X-FIRMWARE_LANGUAGE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentityBo {
    fields: HashMap<String, String>,
}

impl DeviceIdentityBo {
    pub fn new(fields: HashMap<String, String>) -> Self {
        DeviceIdentityBo { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.as_str())
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// missing keys are a parse failure, never a default
    fn require(&self, key: &str) -> Result<&str, UpdaterError> {
        self.get(key).ok_or_else(|| {
            UpdaterError::new(ErrorCode::ParseFailure, format!("M115 response has no {} field", key))
        })
    }

    pub fn machine_type(&self) -> Result<&str, UpdaterError> {
        self.require(MACHINE_TYPE_KEY)
    }

    pub fn firmware_version(&self) -> Result<&str, UpdaterError> {
        self.require(FIRMWARE_VERSION_KEY)
    }

    pub fn firmware_language(&self) -> Result<&str, UpdaterError> {
        self.require(FIRMWARE_LANGUAGE_KEY)
    }
}
