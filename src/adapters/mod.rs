//! Hardware adapters: the byte-level transport under the protocol codec.
//!
//! An [`Adapter`] owns one half-duplex link to the instrument. The firmware
//! protocol is strictly request/response with no pipelining, so all methods
//! take `&mut self`: holding the adapter exclusively is what guarantees only
//! one command is in flight per session.

mod mock;
#[cfg(feature = "instrument_serial")]
mod serial_adapter;

pub use mock::{MockAdapter, MockReply};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::VnaResult;

/// Byte transport to the instrument.
///
/// Read calls use a bounded timeout. The contract for both read methods:
///
/// - if **nothing** arrives before the deadline, the call fails with
///   `VnaError::Timeout` — no data at all means the caller's retry policy
///   decides what happens next;
/// - if **some** bytes arrive but the terminator (or requested length) is
///   never reached, the partial data is returned as `Ok`; the protocol codec
///   turns a short response into `ProtocolError::Incomplete`, which is
///   deliberately distinct from a timeout because partial data is still
///   salvageable for diagnostics.
#[async_trait]
pub trait Adapter: Send {
    /// Open the underlying link. `config` may override connection settings
    /// (the serial adapter honors `port`, `baud_rate` and `timeout_ms` keys);
    /// pass `serde_json::Value::Null` to use the adapter's builder settings.
    async fn connect(&mut self, config: &serde_json::Value) -> VnaResult<()>;

    /// Close the link. Safe to call when already closed.
    async fn disconnect(&mut self) -> VnaResult<()>;

    fn is_connected(&self) -> bool;

    /// Write all bytes of one command.
    async fn write_all(&mut self, bytes: &[u8]) -> VnaResult<()>;

    /// Read until `delimiter` (inclusive) or until `timeout`.
    async fn read_until(&mut self, delimiter: u8, timeout: Duration) -> VnaResult<Vec<u8>>;

    /// Read up to `len` bytes, stopping at the deadline.
    async fn read_up_to(&mut self, len: usize, timeout: Duration) -> VnaResult<Vec<u8>>;

    /// Discard any stale bytes sitting in the receive buffer, so the next
    /// response is framed from a clean start.
    async fn drain(&mut self) -> VnaResult<()>;
}
