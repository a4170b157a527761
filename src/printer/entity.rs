/// what the printer transport tells the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterEvent {
    Connected { port: String },
    Disconnected,
    // one raw line received from the printer
    Message(String),
}

#[derive(Debug)]
pub enum SerialThreadCommand {
    Write(String),
    Stop,
}
