//! Instrument session: the process-wide handle to one open connection.
//!
//! The session owns the driver (and through it the adapter and codec state)
//! exclusively. `run_sweep` takes `&mut self`, so two sweeps can never
//! interleave on one connection — the half-duplex discipline is enforced by
//! the borrow checker rather than a runtime lock. The serial handle is
//! released on [`InstrumentSession::close`] and when the session is dropped,
//! on every exit path including cancellation and fatal protocol errors.

use tokio::sync::watch;

use super::{run_sweep, Instrument};
use crate::error::VnaResult;
use crate::measurement::{SParameter, Sweep};
use crate::protocol::SweepPlan;

#[cfg(feature = "instrument_serial")]
use super::NanoVna;
#[cfg(feature = "instrument_serial")]
use crate::adapters::SerialAdapter;
#[cfg(feature = "instrument_serial")]
use crate::protocol::ProtocolVariant;

/// Create a linked cancel handle/signal pair.
///
/// The handle side lives with whoever may abort the sweep (e.g. a UI task);
/// the signal side is passed to [`InstrumentSession::run_sweep`], which polls
/// it between points — never mid-point, so the codec framing stays
/// consistent.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Requests cancellation of an in-flight sweep.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by the sweep controller between points.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Handle to one open instrument connection.
pub struct InstrumentSession {
    instrument: Box<dyn Instrument>,
}

impl InstrumentSession {
    /// Open a serial connection, probe the firmware and build the session.
    #[cfg(feature = "instrument_serial")]
    pub async fn connect(
        port: &str,
        baud_rate: u32,
        variant: ProtocolVariant,
    ) -> VnaResult<Self> {
        let adapter = SerialAdapter::new(port, baud_rate);
        let instrument = NanoVna::open(port, Box::new(adapter), variant).await?;
        Ok(Self {
            instrument: Box::new(instrument),
        })
    }

    /// Wrap an already-built instrument (mock or custom driver).
    pub fn with_instrument(instrument: Box<dyn Instrument>) -> Self {
        Self { instrument }
    }

    pub fn instrument(&self) -> &dyn Instrument {
        self.instrument.as_ref()
    }

    /// Run one full sweep. This is the designated suspension point: invoke it
    /// from a background task to keep a user-facing thread responsive. The
    /// `&mut self` receiver rules out a second concurrent sweep on this
    /// session.
    pub async fn run_sweep(
        &mut self,
        plan: &SweepPlan,
        port: SParameter,
        cancel: Option<&CancelSignal>,
    ) -> VnaResult<Sweep> {
        run_sweep(self.instrument.as_mut(), plan, port, cancel).await
    }

    /// Release the connection.
    pub async fn close(mut self) -> VnaResult<()> {
        self.instrument.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_signal() {
        let (handle, signal) = cancellation();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());

        let cloned = signal.clone();
        assert!(cloned.is_cancelled());
    }
}
