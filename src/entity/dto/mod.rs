pub mod status_dto;
pub mod update_info_dto;
pub mod command_dto;
