//! status event sent to observers
//! serialised as {"type": "status", "status_type": .., "status_value": .., "status_description": ..}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTypeEnum {
    CheckUpdateStatus,
    FlashingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusValueEnum {
    Progress,
    UpToDate,
    UpdateAvailable,
    Successful,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEventDto {
    // always "status"
    #[serde(rename = "type")]
    pub message_type: String,
    pub status_type: StatusTypeEnum,
    pub status_value: StatusValueEnum,
    pub status_description: String,
}

impl StatusEventDto {
    pub fn new(status_type: StatusTypeEnum, status_value: StatusValueEnum, description: &str) -> Self {
        StatusEventDto {
            message_type: "status".to_string(),
            status_type,
            status_value,
            status_description: description.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_json() {
        let dto = StatusEventDto::new(StatusTypeEnum::CheckUpdateStatus, StatusValueEnum::UpdateAvailable, "1.3.0");
        let value: serde_json::Value = serde_json::from_str(&dto.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["status_type"], "check_update_status");
        assert_eq!(value["status_value"], "update_available");
        assert_eq!(value["status_description"], "1.3.0");
    }

    #[test]
    fn test_flashing_status_json() {
        let dto = StatusEventDto::new(StatusTypeEnum::FlashingStatus, StatusValueEnum::UpToDate, "");
        let value = serde_json::to_value(&dto).unwrap();
        assert_eq!(value["status_type"], "flashing_status");
        assert_eq!(value["status_value"], "up_to_date");
    }
}
