//! Driver for the NanoVNA family of low-cost vector network analyzers.
//!
//! Both supported firmware revisions speak the same ASCII command verbs; they
//! differ in how a data fetch answers (lines vs. a binary block), which is
//! entirely the codec's business. One `NanoVna` instance owns one serial
//! session.

use log::{debug, info};
use num_complex::Complex64;
use std::time::Duration;

use async_trait::async_trait;

use super::{FetchMode, FirmwareVersion, Instrument, SweepLimits};
use crate::adapters::Adapter;
use crate::error::{VnaError, VnaResult};
use crate::measurement::{FrequencyPoint, SParameter};
use crate::protocol::{text, Codec, ProtocolVariant, SweepPlan};

/// Default bounded read timeout, per response line / per point.
const READ_TIMEOUT: Duration = Duration::from_millis(1500);

/// Reads allowed beyond the expected line count before giving up on a
/// chattering response.
const EXTRA_READS: usize = 8;

fn limits_for(variant: &ProtocolVariant) -> SweepLimits {
    match variant {
        ProtocolVariant::TextV1 => SweepLimits {
            min_hz: 50_000,
            max_hz: 900_000_000,
            max_points: 101,
        },
        ProtocolVariant::BinaryV2(_) => SweepLimits {
            min_hz: 50_000,
            max_hz: 3_000_000_000,
            max_points: 1024,
        },
    }
}

/// NanoVNA driver: one open serial session plus its codec state.
pub struct NanoVna {
    id: String,
    adapter: Box<dyn Adapter>,
    codec: Codec,
    version: FirmwareVersion,
    limits: SweepLimits,
    read_timeout: Duration,
}

impl NanoVna {
    /// Connect through an already-configured adapter, probe the firmware and
    /// build the driver. Fails with `Connection` if the device does not
    /// report a valid version.
    pub async fn open(
        id: impl Into<String>,
        mut adapter: Box<dyn Adapter>,
        variant: ProtocolVariant,
    ) -> VnaResult<Self> {
        let id = id.into();
        if !adapter.is_connected() {
            adapter.connect(&serde_json::Value::Null).await?;
        }

        let mut vna = Self {
            id,
            adapter,
            limits: limits_for(&variant),
            codec: Codec::new(variant),
            version: FirmwareVersion::default(),
            read_timeout: READ_TIMEOUT,
        };

        let version = vna.probe_version().await?;
        if !version.is_valid() {
            vna.adapter.disconnect().await?;
            return Err(VnaError::Connection(format!(
                "device on '{}' did not report a valid firmware version",
                vna.id
            )));
        }
        info!("[{}] connected, firmware {}", vna.id, version);
        vna.version = version;
        Ok(vna)
    }

    /// Override the per-read timeout (default 1.5 s).
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    async fn probe_version(&mut self) -> VnaResult<FirmwareVersion> {
        let cmd = self.codec.encode_version();
        let lines = self.exchange_lines(&cmd, 1).await?;
        let payload = lines
            .first()
            .ok_or_else(|| VnaError::Connection("empty version reply".to_string()))?;
        let text = text::parse_version_payload(payload)?;
        Ok(FirmwareVersion::parse(&text))
    }

    /// Issue one command and collect its echoed-line response.
    ///
    /// Returns payload lines with the echo stripped. Stops early when the
    /// link goes quiet; the caller's decoder decides whether what arrived is
    /// complete.
    async fn exchange_lines(&mut self, cmd: &[u8], expected: usize) -> VnaResult<Vec<String>> {
        self.adapter.drain().await?;
        self.adapter.write_all(cmd).await?;

        let command_str = String::from_utf8_lossy(cmd).trim_end().to_string();
        let mut lines: Vec<String> = Vec::with_capacity(expected + 1);
        let mut reads = 0usize;

        // One extra line for the echo.
        while lines.len() < expected + 1 && reads < expected + 1 + EXTRA_READS {
            reads += 1;
            match self.adapter.read_until(b'\n', self.read_timeout).await {
                Ok(raw) => lines.extend(text::payload_lines(&raw)),
                Err(VnaError::Timeout { waited }) => {
                    if lines.is_empty() {
                        return Err(VnaError::Timeout { waited });
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!("[{}] '{}' answered {} lines", self.id, command_str, lines.len());
        Ok(text::strip_echo(&lines, &command_str).to_vec())
    }

    /// Issue a data-fetch command and read the fixed-length binary block that
    /// follows the echoed command line.
    async fn exchange_block(&mut self, cmd: &[u8], block_len: usize) -> VnaResult<Vec<u8>> {
        self.adapter.drain().await?;
        self.adapter.write_all(cmd).await?;

        // Echo line first.
        self.adapter.read_until(b'\n', self.read_timeout).await?;

        // The whole block shares one deadline, scaled up for large sweeps.
        let chunks = block_len.max(1).div_ceil(1024);
        let budget = self
            .read_timeout
            .saturating_mul(u32::try_from(chunks).unwrap_or(u32::MAX))
            .max(self.read_timeout);
        self.adapter.read_up_to(block_len, budget).await
    }
}

#[async_trait]
impl Instrument for NanoVna {
    fn id(&self) -> &str {
        &self.id
    }

    fn firmware_version(&self) -> &FirmwareVersion {
        &self.version
    }

    fn limits(&self) -> &SweepLimits {
        &self.limits
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Block
    }

    async fn info(&mut self) -> VnaResult<String> {
        let cmd = self.codec.encode_info();
        // Board info is a handful of lines; length is not known up front.
        let lines = self.exchange_lines(&cmd, 8).await?;
        Ok(lines.join("\n"))
    }

    async fn set_sweep(&mut self, plan: &SweepPlan) -> VnaResult<()> {
        let cmd = self.codec.encode_sweep(plan);
        self.adapter.drain().await?;
        self.adapter.write_all(&cmd).await?;
        self.codec.set_plan(*plan);
        debug!(
            "[{}] sweep configured: {}..{} Hz, {} points",
            self.id, plan.start_hz, plan.stop_hz, plan.points
        );
        Ok(())
    }

    async fn read_frequencies(&mut self) -> VnaResult<Vec<FrequencyPoint>> {
        let expected = self.codec.expected_lines()?;
        let cmd = self.codec.encode_frequencies();
        let lines = self.exchange_lines(&cmd, expected).await?;
        self.codec.decode_frequencies(&lines)
    }

    async fn read_raw_data(&mut self, port: SParameter) -> VnaResult<Vec<Complex64>> {
        let cmd = self.codec.encode_data(port);
        let raw = match self.codec.binary_block_len()? {
            Some(block_len) => self.exchange_block(&cmd, block_len).await?,
            None => {
                let expected = self.codec.expected_lines()?;
                let lines = self.exchange_lines(&cmd, expected).await?;
                let mut raw = lines.join("\n").into_bytes();
                raw.push(b'\n');
                raw
            }
        };
        self.codec.decode_sweep_data(&raw)
    }

    async fn close(&mut self) -> VnaResult<()> {
        self.adapter.disconnect().await?;
        info!("[{}] disconnected", self.id);
        Ok(())
    }
}
