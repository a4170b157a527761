//! serial printer connection
//! - one read/write loop task per open port
//! - lines are framed with PrinterLineCodec, each received line is forwarded as PrinterEvent::Message
//!   (bytes that are not utf-8, as sent by a board that resets on open, are decoded lossily)
//! - connect on an open connection stops the old loop and waits for it before opening again,
//!   so the old Disconnected always arrives before the new Connected

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::entity::{PrinterEvent, SerialThreadCommand};
use super::traits::PrinterConnection;
use crate::common::error::{ErrorCode, UpdaterError};
use crate::{debug, error, info, trace, warn};

const LOG_TAG: &str = "serial_printer";

const MAX_LINE_LENGTH: usize = 4096;

struct SerialLoop {
    command_tx: mpsc::Sender<SerialThreadCommand>,
    handle: JoinHandle<()>,
}

pub struct SerialPrinter {
    baudrate: u32,
    event_tx: mpsc::UnboundedSender<PrinterEvent>,
    current: Mutex<Option<SerialLoop>>,
}

impl SerialPrinter {
    pub fn new(baudrate: u32, event_tx: mpsc::UnboundedSender<PrinterEvent>) -> Self {
        SerialPrinter {
            baudrate,
            event_tx,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PrinterConnection for SerialPrinter {
    async fn connect(&self, port: &str) -> Result<(), UpdaterError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!(LOG_TAG, "closing current printer connection before connecting to {}", port);
            let _ = previous.command_tx.send(SerialThreadCommand::Stop).await;
            if let Err(e) = previous.handle.await {
                warn!(LOG_TAG, "serial loop ended abnormally: {}", e);
            }
        }

        let stream = tokio_serial::new(port, self.baudrate)
            .open_native_async()
            .map_err(|e| {
                error!(LOG_TAG, "cannot open serial port {}: {}", port, e);
                UpdaterError::new(ErrorCode::ConnectionFailure, format!("cannot open serial port {}: {}", port, e))
            })?;

        let (command_tx, command_rx) = mpsc::channel(100);
        let handle = tokio::spawn(run_loop(stream, port.to_string(), command_rx, self.event_tx.clone()));
        *current = Some(SerialLoop { command_tx, handle });
        info!(LOG_TAG, "printer connected on {} at {} baud", port, self.baudrate);
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<(), UpdaterError> {
        let command_tx = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(serial_loop) => serial_loop.command_tx.clone(),
                None => {
                    return Err(UpdaterError::new(ErrorCode::ConnectionFailure, "printer is not connected"));
                }
            }
        };
        command_tx
            .send(SerialThreadCommand::Write(command.to_string()))
            .await
            .map_err(|_| UpdaterError::new(ErrorCode::ConnectionFailure, "printer connection is closed"))
    }
}

/// newline framed text, tolerant of garbage on the line
#[derive(Debug, Default)]
pub struct PrinterLineCodec {
    // dropping an overlong line until its newline shows up
    discarding: bool,
}

impl PrinterLineCodec {
    fn to_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Decoder for PrinterLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match buf.iter().position(|b| *b == b'\n') {
                Some(n) => {
                    let line = buf.split_to(n + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    return Ok(Some(Self::to_line(&line)));
                }
                None => {
                    if buf.len() > MAX_LINE_LENGTH {
                        debug!(LOG_TAG, "dropped {} bytes of an overlong line", buf.len());
                        buf.clear();
                        self.discarding = true;
                    }
                    return Ok(None);
                }
            }
        }
    }

    // an unterminated last line is still delivered
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(Self::to_line(&line)))
    }
}

impl Encoder<String> for PrinterLineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// read lines and write commands until stopped or the port goes away
async fn run_loop<T>(
    stream: T,
    port: String,
    mut command_rx: mpsc::Receiver<SerialThreadCommand>,
    event_tx: mpsc::UnboundedSender<PrinterEvent>,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut writer, mut reader) = PrinterLineCodec::default().framed(stream).split();
    let _ = event_tx.send(PrinterEvent::Connected { port: port.clone() });

    loop {
        tokio::select! {
            command_opt = command_rx.recv() => {
                match command_opt {
                    Some(SerialThreadCommand::Write(line)) => {
                        trace!(LOG_TAG, "write: {:?}", line);
                        if let Err(e) = writer.send(line.trim_end().to_string()).await {
                            error!(LOG_TAG, "cannot write to {}: {}", port, e);
                        }
                    }
                    Some(SerialThreadCommand::Stop) | None => {
                        info!(LOG_TAG, "stop signal received, closing {}", port);
                        break;
                    }
                }
            }
            line_opt = reader.next() => {
                match line_opt {
                    Some(Ok(line)) => {
                        trace!(LOG_TAG, "recv: {:?}", line);
                        if event_tx.send(PrinterEvent::Message(line)).is_err() {
                            warn!(LOG_TAG, "printer event receiver is gone, closing {}", port);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!(LOG_TAG, "read error on {}: {}", port, e);
                        break;
                    }
                    None => {
                        warn!(LOG_TAG, "serial port {} closed", port);
                        break;
                    }
                }
            }
        }
    }
    let _ = event_tx.send(PrinterEvent::Disconnected);
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_send_without_connection() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let printer = SerialPrinter::new(115200, tx);
        let err = printer.send_command("M115\n").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionFailure);
    }

    #[tokio::test]
    async fn test_connect_missing_port() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = SerialPrinter::new(115200, tx);
        let err = printer.connect("/dev/no-such-printer-port").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionFailure);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_codec_survives_garbage() {
        let mut codec = PrinterLineCodec::default();
        let mut buf = BytesMut::from(&b"\xff\xfe\x00start\r\nMACHINE_TYPE:Printer X FIRMWARE_VERSION:1.2.3\nok"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(first.ends_with("start"));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("MACHINE_TYPE:Printer X FIRMWARE_VERSION:1.2.3".to_string())
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("ok".to_string()));
    }

    #[test]
    fn test_codec_drops_overlong_line() {
        let mut codec = PrinterLineCodec::default();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"xxxx\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("ok".to_string()));
    }

    #[tokio::test]
    async fn test_loop_delivers_identity_after_garbage() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (device, host) = tokio::io::duplex(1024);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(10);
        let handle = tokio::spawn(run_loop(host, "/dev/ttyACM0".to_string(), command_rx, event_tx));
        let (mut device_rx, mut device_tx) = tokio::io::split(device);

        assert_eq!(
            event_rx.recv().await,
            Some(PrinterEvent::Connected { port: "/dev/ttyACM0".to_string() })
        );
        command_tx.send(SerialThreadCommand::Write("M115\n".to_string())).await.unwrap();
        let mut sent = [0u8; 5];
        device_rx.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"M115\n");

        device_tx
            .write_all(b"\xff\xfe\x00\nMACHINE_TYPE:Printer X FIRMWARE_VERSION:1.2.3 X-FIRMWARE_LANGUAGE:en\n")
            .await
            .unwrap();
        assert!(matches!(event_rx.recv().await, Some(PrinterEvent::Message(_))));
        assert_eq!(
            event_rx.recv().await,
            Some(PrinterEvent::Message(
                "MACHINE_TYPE:Printer X FIRMWARE_VERSION:1.2.3 X-FIRMWARE_LANGUAGE:en".to_string()
            ))
        );

        command_tx.send(SerialThreadCommand::Stop).await.unwrap();
        handle.await.unwrap();
        assert_eq!(event_rx.recv().await, Some(PrinterEvent::Disconnected));
    }
}
