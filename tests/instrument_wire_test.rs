//! End-to-end driver tests: the NanoVna driver speaking both protocol
//! variants over a scripted transport.

use num_complex::Complex64;

use vna_toolkit::adapters::MockAdapter;
use vna_toolkit::error::VnaError;
use vna_toolkit::instrument::{Instrument, InstrumentSession, NanoVna};
use vna_toolkit::measurement::SParameter;
use vna_toolkit::protocol::binary::encode_block;
use vna_toolkit::protocol::{BinaryLayout, ProtocolVariant, SweepPlan};

const PLAN: SweepPlan = SweepPlan {
    start_hz: 1_000_000,
    stop_hz: 2_000_000,
    points: 3,
};

fn scripted_preamble(mock: &mut MockAdapter) {
    mock.expect(b"version\r", b"version\r\nversion 1.2.3\r\nch> ");
    mock.expect(
        b"sweep 1000000 2000000 3\r",
        b"sweep 1000000 2000000 3\r\nch> ",
    );
    mock.expect(
        b"frequencies\r",
        b"frequencies\r\n1000000\r\n1500000\r\n2000000\r\nch> ",
    );
}

#[tokio::test]
async fn text_variant_full_sweep() {
    let mut mock = MockAdapter::new();
    scripted_preamble(&mut mock);
    mock.expect(
        b"data 0\r",
        b"data 0\r\n0.1 -0.2\r\n0.25 -0.35\r\n0.5 0.0\r\nch> ",
    );

    let vna = NanoVna::open("test", Box::new(mock), ProtocolVariant::TextV1)
        .await
        .unwrap();
    assert_eq!(vna.firmware_version().to_string(), "1.2.3");

    let mut session = InstrumentSession::with_instrument(Box::new(vna));
    let sweep = session
        .run_sweep(&PLAN, SParameter::S11, None)
        .await
        .unwrap();

    assert_eq!(sweep.len(), 3);
    assert_eq!(sweep.points()[1].hz, 1_500_000);
    assert_eq!(sweep.samples()[0], Complex64::new(0.1, -0.2));
    assert_eq!(sweep.samples()[2], Complex64::new(0.5, 0.0));
}

#[tokio::test]
async fn silent_data_fetch_exhausts_retries() {
    let mut mock = MockAdapter::new();
    scripted_preamble(&mut mock);
    // The data fetch never answers; the controller retries it three times.
    mock.expect_silence(b"data 0\r");
    mock.expect_silence(b"data 0\r");
    mock.expect_silence(b"data 0\r");

    let vna = NanoVna::open("test", Box::new(mock), ProtocolVariant::TextV1)
        .await
        .unwrap();
    let mut session = InstrumentSession::with_instrument(Box::new(vna));

    let err = session
        .run_sweep(&PLAN, SParameter::S11, None)
        .await
        .unwrap_err();
    match err {
        VnaError::SweepFailed {
            index,
            attempts,
            source,
        } => {
            assert_eq!(index, 0);
            assert_eq!(attempts, 3);
            assert!(matches!(*source, VnaError::Timeout { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn binary_variant_decodes_block() {
    let layout = BinaryLayout::default();
    let samples = vec![
        Complex64::new(0.25, -0.5),
        Complex64::new(-0.125, 0.0625),
        Complex64::new(0.5, 0.25),
    ];
    let block = encode_block(&layout, &samples);
    let mut reply = b"data 0\r\n".to_vec();
    reply.extend_from_slice(&block);

    let mut mock = MockAdapter::new();
    scripted_preamble(&mut mock);
    mock.expect(b"data 0\r", &reply);

    let vna = NanoVna::open(
        "test",
        Box::new(mock),
        ProtocolVariant::BinaryV2(layout),
    )
    .await
    .unwrap();
    let mut session = InstrumentSession::with_instrument(Box::new(vna));

    let sweep = session
        .run_sweep(&PLAN, SParameter::S11, None)
        .await
        .unwrap();
    assert_eq!(sweep.len(), 3);
    for (decoded, original) in sweep.samples().iter().zip(&samples) {
        assert!((decoded - original).norm() < 1e-6);
    }
}

#[tokio::test]
async fn truncated_binary_block_names_first_missing_point() {
    let layout = BinaryLayout::default();
    let samples = vec![
        Complex64::new(0.25, -0.5),
        Complex64::new(-0.125, 0.0625),
        Complex64::new(0.5, 0.25),
    ];
    let block = encode_block(&layout, &samples);
    let stride = layout.record_stride();

    // Only two whole records make it through.
    let mut reply = b"data 0\r\n".to_vec();
    reply.extend_from_slice(&block[..2 * stride]);

    let mut mock = MockAdapter::new();
    scripted_preamble(&mut mock);
    mock.expect(b"data 0\r", &reply);

    let vna = NanoVna::open(
        "test",
        Box::new(mock),
        ProtocolVariant::BinaryV2(layout),
    )
    .await
    .unwrap();
    let mut session = InstrumentSession::with_instrument(Box::new(vna));

    let err = session
        .run_sweep(&PLAN, SParameter::S11, None)
        .await
        .unwrap_err();
    match err {
        VnaError::SweepFailed { index, attempts, .. } => {
            assert_eq!(index, 2);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}
