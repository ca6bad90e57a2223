//! Serial adapter for the instrument's USB virtual COM port.
//!
//! Wraps the `serialport` crate and provides async I/O by running the
//! synchronous serial operations on Tokio's blocking task executor.

use async_trait::async_trait;
use log::debug;
use serde_json::json;
use serialport::SerialPort;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::Adapter;
use crate::error::{VnaError, VnaResult};

/// How long each blocking `read()` on the port may stall before we re-check
/// the outer deadline.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on the drain loop: 64 * 128 = 8 KiB of stale data.
const DRAIN_CHUNKS: usize = 64;
const DRAIN_CHUNK_LEN: usize = 128;

/// Serial transport for RS-232/USB-CDC instrument links.
#[derive(Clone)]
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3").
    port_name: String,

    /// Baud rate (e.g., 9600, 115200).
    baud_rate: u32,

    /// Default bounded read timeout.
    timeout: Duration,

    /// The actual serial port (behind Arc<Mutex> for async access).
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings.
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 115200 for NanoVNA-family firmware)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(1500),
            port: None,
        }
    }

    /// Override the default per-read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// The adapter's effective settings as a JSON object, in the same shape
    /// [`Adapter::connect`] accepts.
    pub fn default_config(&self) -> serde_json::Value {
        json!({
            "port": self.port_name,
            "baud_rate": self.baud_rate,
            "timeout_ms": self.timeout.as_millis(),
        })
    }

    fn locked_port(&self) -> VnaResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.as_ref().cloned().ok_or(VnaError::NotConnected)
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    async fn connect(&mut self, config: &serde_json::Value) -> VnaResult<()> {
        if let Some(port) = config["port"].as_str() {
            self.port_name = port.to_string();
        }
        if let Some(baud) = config["baud_rate"].as_u64() {
            self.baud_rate = baud as u32;
        }
        if let Some(ms) = config["timeout_ms"].as_u64() {
            self.timeout = Duration::from_millis(ms);
        }

        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(PORT_POLL_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| VnaError::Connection(format!("serial open task panicked: {e}")))?
        .map_err(|e| {
            VnaError::Connection(format!(
                "failed to open serial port '{}' at {} baud: {e}",
                self.port_name, self.baud_rate
            ))
        })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> VnaResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn write_all(&mut self, bytes: &[u8]) -> VnaResult<()> {
        let port = self.locked_port()?;
        let data = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> VnaResult<()> {
            use std::io::Write;

            let mut guard = port.blocking_lock();
            guard.write_all(&data)?;
            guard.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| VnaError::Connection(format!("serial I/O task panicked: {e}")))?
    }

    async fn read_until(&mut self, delimiter: u8, timeout: Duration) -> VnaResult<Vec<u8>> {
        let port = self.locked_port()?;

        tokio::task::spawn_blocking(move || -> VnaResult<Vec<u8>> {
            use std::io::Read;

            let mut guard = port.blocking_lock();
            let mut response = Vec::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    if response.is_empty() {
                        return Err(VnaError::Timeout { waited: timeout });
                    }
                    // Partial line: hand it back, the codec decides.
                    return Ok(response);
                }

                match guard.read(&mut buffer) {
                    Ok(1) => {
                        response.push(buffer[0]);
                        if buffer[0] == delimiter {
                            return Ok(response);
                        }
                    }
                    Ok(0) => {
                        return Err(VnaError::Connection(
                            "unexpected EOF from serial port".to_string(),
                        ));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port poll expired before our deadline did.
                        continue;
                    }
                    Err(e) => return Err(VnaError::Io(e)),
                    Ok(_) => {
                        return Err(VnaError::Connection(
                            "single-byte read returned more than one byte".to_string(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|e| VnaError::Connection(format!("serial I/O task panicked: {e}")))?
    }

    async fn read_up_to(&mut self, len: usize, timeout: Duration) -> VnaResult<Vec<u8>> {
        let port = self.locked_port()?;

        tokio::task::spawn_blocking(move || -> VnaResult<Vec<u8>> {
            use std::io::Read;

            let mut guard = port.blocking_lock();
            let mut response = Vec::with_capacity(len);
            let mut buffer = [0u8; 256];
            let start = Instant::now();

            while response.len() < len {
                if start.elapsed() > timeout {
                    if response.is_empty() {
                        return Err(VnaError::Timeout { waited: timeout });
                    }
                    return Ok(response);
                }

                let want = (len - response.len()).min(buffer.len());
                match guard.read(&mut buffer[..want]) {
                    Ok(0) => {
                        return Err(VnaError::Connection(
                            "unexpected EOF from serial port".to_string(),
                        ));
                    }
                    Ok(n) => response.extend_from_slice(&buffer[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(VnaError::Io(e)),
                }
            }

            Ok(response)
        })
        .await
        .map_err(|e| VnaError::Connection(format!("serial I/O task panicked: {e}")))?
    }

    async fn drain(&mut self) -> VnaResult<()> {
        let port = self.locked_port()?;

        tokio::task::spawn_blocking(move || -> VnaResult<()> {
            use std::io::Read;

            let mut guard = port.blocking_lock();
            let mut buffer = [0u8; DRAIN_CHUNK_LEN];
            let mut discarded = 0usize;

            for _ in 0..DRAIN_CHUNKS {
                match guard.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => discarded += n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                    Err(e) => return Err(VnaError::Io(e)),
                }
            }

            if discarded > 0 {
                debug!("Drained {discarded} stale bytes from serial buffer");
            }
            Ok(())
        })
        .await
        .map_err(|e| VnaError::Connection(format!("serial I/O task panicked: {e}")))?
    }
}
