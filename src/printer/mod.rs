pub mod entity;
pub mod traits;
pub mod serial_printer;
