//! setting config file
//! read from config_{ENV}.toml in the working directory

use std::{fs::File, io::Read};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;

use super::error::{ErrorCode, UpdaterError};

#[derive(Debug, Clone, Deserialize)]
pub struct Env {
    pub env: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Web {
    pub web_host: String,
    pub web_port: u16
}

#[derive(Debug, Clone, Deserialize)]
pub struct Firmware {
    /// avrdude executable
    #[serde(default)]
    pub programmer_path: Option<String>,
    #[serde(default = "default_check_after_connect")]
    pub check_after_connect: bool,
    /// template with {model} {fw_version} {language}
    #[serde(default = "default_update_service_url")]
    pub update_service_url: String,
    #[serde(default = "default_programmer_device_id")]
    pub programmer_device_id: String,
    #[serde(default = "default_programmer_protocol")]
    pub programmer_protocol: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// update service request, connect to last body byte
    #[serde(default = "default_update_request_timeout_secs")]
    pub update_request_timeout_secs: u64,
}

fn default_check_after_connect() -> bool { true }
fn default_update_service_url() -> String {
    "http://localhost:8080/api/checkUpdate/{model}/{fw_version}/{language}".to_string()
}
fn default_programmer_device_id() -> String { "m2560".to_string() }
fn default_programmer_protocol() -> String { "wiring".to_string() }
fn default_baudrate() -> u32 { 115200 }
fn default_update_request_timeout_secs() -> u64 { 10 }

impl Default for Firmware {
    fn default() -> Self {
        Firmware {
            programmer_path: None,
            check_after_connect: default_check_after_connect(),
            update_service_url: default_update_service_url(),
            programmer_device_id: default_programmer_device_id(),
            programmer_protocol: default_programmer_protocol(),
            baudrate: default_baudrate(),
            update_request_timeout_secs: default_update_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub env: Env,
    pub web: Web,
    #[serde(default)]
    pub firmware: Firmware,
}

lazy_static! {
    static ref CACHE: Result<Settings, UpdaterError> = Settings::load_from_env();
}

impl Settings {
    /// global settings, panics when the config file can not be loaded
    pub fn get() -> &'static Self {
        match CACHE.as_ref() {
            Ok(settings) => settings,
            Err(e) => panic!("cannot load settings: {}", e),
        }
    }

    pub fn try_get() -> Option<&'static Self> {
        CACHE.as_ref().ok()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, UpdaterError> {
        toml::from_str(content).map_err(|e| {
            UpdaterError::new(ErrorCode::UnexpectedFailure, format!("config file format invalid: {}", e))
        })
    }

    fn load_from_env() -> Result<Self, UpdaterError> {
        let env = match env::var("ENV") {
            Ok(e) => e,
            Err(_) => {
                log::warn!("no ENV set, use default: 'dev'");
                String::from("dev")
            }
        };

        let file_path: String = format!("config_{}.toml", env);

        let mut file = File::open(file_path.as_str()).map_err(|e| {
            UpdaterError::new(ErrorCode::UnexpectedFailure, format!("no such file {} exception: {}", file_path, e))
        })?;

        let mut str_val = String::new();
        file.read_to_string(&mut str_val).map_err(|e| {
            UpdaterError::new(ErrorCode::UnexpectedFailure, format!("cannot read config file: {}", e))
        })?;

        Self::from_toml_str(&str_val)
    }
}
