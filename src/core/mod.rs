//! Format-independent helpers: serial dates, header slugs and memory figures

pub mod dates;
pub mod memory;
pub mod text;

pub use dates::{datetime_to_serial, excel_fix_date, serial_to_datetime};
pub use memory::MemoryReporter;
pub use text::slugify;
