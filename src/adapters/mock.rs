//! Mock adapter for deterministic testing of the protocol codec and sweep
//! controller without hardware.
//!
//! Expectations are consumed in order: each `write_all` is matched against
//! the next expected request and queues the scripted reply for the following
//! read. Replies can also inject faults — a silent link (timeout) or a
//! response cut short partway through a block.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use super::Adapter;
use crate::error::{VnaError, VnaResult};

/// Scripted reply for one expected request.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return these bytes on subsequent reads.
    Respond(Vec<u8>),
    /// Nothing arrives: the next read times out.
    Silence,
}

#[derive(Clone, Debug)]
struct Expectation {
    request: Vec<u8>,
    reply: MockReply,
}

/// A scripted [`Adapter`] with an expectation queue and a sent log.
pub struct MockAdapter {
    expectations: VecDeque<Expectation>,
    rx_buffer: VecDeque<u8>,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            expectations: VecDeque::new(),
            rx_buffer: VecDeque::new(),
            connected: false,
            sent_log: Vec::new(),
        }
    }

    /// Expect `request`; reply with `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply: MockReply::Respond(response.to_vec()),
        });
    }

    /// Expect `request`; let the following read time out.
    pub fn expect_silence(&mut self, request: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply: MockReply::Silence,
        });
    }

    /// All data written through this adapter, one entry per `write_all`.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn connect(&mut self, _config: &serde_json::Value) -> VnaResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> VnaResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn write_all(&mut self, bytes: &[u8]) -> VnaResult<()> {
        if !self.connected {
            return Err(VnaError::NotConnected);
        }
        self.sent_log.push(bytes.to_vec());

        let expectation = self.expectations.pop_front().ok_or_else(|| {
            VnaError::Instrument(format!(
                "mock adapter: unexpected write of {} bytes: {:?}",
                bytes.len(),
                String::from_utf8_lossy(bytes)
            ))
        })?;

        if expectation.request != bytes {
            return Err(VnaError::Instrument(format!(
                "mock adapter: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(bytes)
            )));
        }

        match expectation.reply {
            MockReply::Respond(data) => self.rx_buffer.extend(data),
            MockReply::Silence => self.rx_buffer.clear(),
        }
        Ok(())
    }

    async fn read_until(&mut self, delimiter: u8, timeout: Duration) -> VnaResult<Vec<u8>> {
        if !self.connected {
            return Err(VnaError::NotConnected);
        }
        if self.rx_buffer.is_empty() {
            return Err(VnaError::Timeout { waited: timeout });
        }
        let mut out = Vec::new();
        while let Some(byte) = self.rx_buffer.pop_front() {
            out.push(byte);
            if byte == delimiter {
                break;
            }
        }
        Ok(out)
    }

    async fn read_up_to(&mut self, len: usize, timeout: Duration) -> VnaResult<Vec<u8>> {
        if !self.connected {
            return Err(VnaError::NotConnected);
        }
        if self.rx_buffer.is_empty() {
            return Err(VnaError::Timeout { waited: timeout });
        }
        let take = len.min(self.rx_buffer.len());
        Ok(self.rx_buffer.drain(..take).collect())
    }

    async fn drain(&mut self) -> VnaResult<()> {
        self.rx_buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expectations_consumed_in_order() {
        let mut mock = MockAdapter::new();
        mock.expect(b"version\r", b"version 1.2.3\r\nch> ");
        mock.connect(&serde_json::Value::Null).await.unwrap();

        mock.write_all(b"version\r").await.unwrap();
        let line = mock
            .read_until(b'\n', Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, b"version 1.2.3\r\n");
        assert_eq!(mock.remaining_expectations(), 0);
        assert_eq!(mock.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let mut mock = MockAdapter::new();
        mock.expect_silence(b"data 0\r");
        mock.connect(&serde_json::Value::Null).await.unwrap();

        mock.write_all(b"data 0\r").await.unwrap();
        let err = mock.read_until(b'\n', Duration::from_millis(10)).await;
        assert!(matches!(err, Err(VnaError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_request_rejected() {
        let mut mock = MockAdapter::new();
        mock.expect(b"version\r", b"ok\r\n");
        mock.connect(&serde_json::Value::Null).await.unwrap();

        let err = mock.write_all(b"help\r").await;
        assert!(matches!(err, Err(VnaError::Instrument(_))));
    }
}
