//! Exporters for calibrated measurement data.

mod touchstone;

pub use touchstone::{
    parse, serialize, write_file, ExportOptions, FrequencyUnit, ParsedTouchstone,
    TouchstoneFormat,
};
