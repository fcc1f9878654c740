mod format;

pub use format::{format_number, parse_datetime};
