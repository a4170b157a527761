use serde::{Deserialize, Serialize};

/// answer of the update service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfoDto {
    pub available: bool,
    #[serde(default)]
    pub ota: Option<OtaDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaDto {
    pub url: String,
    pub fw_version: String,
}

impl UpdateInfoDto {
    /// state after a successful flash
    pub fn up_to_date() -> Self {
        UpdateInfoDto { available: false, ota: None }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_available() {
        let dto: UpdateInfoDto = serde_json::from_str(
            r#"{"available": true, "ota": {"url": "http://x/fw.hex", "fw_version": "1.3.0"}}"#,
        )
        .unwrap();
        assert!(dto.available);
        assert_eq!(dto.ota.unwrap().fw_version, "1.3.0");
    }

    #[test]
    fn test_parse_without_ota() {
        let dto: UpdateInfoDto = serde_json::from_str(r#"{"available": false, "extra": 1}"#).unwrap();
        assert_eq!(dto, UpdateInfoDto::up_to_date());
    }

    #[test]
    fn test_available_required() {
        assert!(serde_json::from_str::<UpdateInfoDto>(r#"{"ota": null}"#).is_err());
    }
}
