//! request bodies of the inbound command surface

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FlashWithPathDto {
    // path of the already uploaded hex file
    pub file_path: String,
    pub selected_port: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlashWithUrlDto {
    pub hex_url: String,
    pub selected_port: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortDto {
    pub selected_port: String,
}
