pub mod process_runner;
pub mod image;
pub mod flash_session;
