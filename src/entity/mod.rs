pub mod dto;
pub mod bo;
