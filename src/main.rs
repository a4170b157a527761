mod common;
mod entity;
mod flasher;
mod http_server;
mod printer;
mod updater;

use common::logger::init_logger;
use common::setting::Settings;
use dotenv::dotenv;
use http_server::server::run as http_run;
use printer::serial_printer::SerialPrinter;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use updater::orchestrator::UpdateOrchestrator;
use updater::status_log::status_log_thread;
use updater::status_reporter::BroadcastReporter;

const LOG_TAG: &str = "main";

const STATUS_CHANNEL_CAPACITY: usize = 64;

fn main() -> Result<(), Box<dyn Error>> {
    // env file
    dotenv().ok();

    // config
    let settings = Settings::get();

    init_logger()?;
    info!(LOG_TAG, "settings loaded, env: {}", settings.env.env);
    debug!(LOG_TAG, "settings: {:?}", settings);

    // status events, logged by an observer thread
    let reporter = Arc::new(BroadcastReporter::new(STATUS_CHANNEL_CAPACITY));
    let _status_log = status_log_thread(reporter.subscribe());

    let (printer_tx, printer_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let printer = Arc::new(SerialPrinter::new(settings.firmware.baudrate, printer_tx));

    let orchestrator = UpdateOrchestrator::new(settings.firmware.clone(), reporter, printer);
    let _orchestrator = orchestrator.start(printer_rx, command_rx)?;

    actix_web::rt::System::new().block_on(http_run(&settings.web.web_host, settings.web.web_port, command_tx))?;

    info!(LOG_TAG, "http server stopped, exiting");
    Ok(())
}
