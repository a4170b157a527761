pub mod identification;
pub mod orchestrator;
pub mod response_parser;
pub mod status_log;
pub mod status_reporter;
pub mod update_client;
