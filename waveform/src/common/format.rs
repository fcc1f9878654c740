use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Formats a float the way the reference writer's plain string interpolation does: an
/// integral value keeps one decimal place (`100000000.0`), anything else falls back to
/// Rust's default `Display` formatting of `f64`.
pub fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Parses the `<DateTime>` element's ISO-8601-with-microseconds value
/// (`YYYY-MM-DDTHH:MM:SS.ffffff`), the format [`crate::codec::iqtar`]'s writer emits.
pub fn parse_datetime(value: &str) -> Option<OffsetDateTime> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:1+]"
    );
    PrimitiveDateTime::parse(value, &format).ok().map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_values_keep_one_decimal() {
        assert_eq!(format_number(1e8), "100000000.0");
        assert_eq!(format_number(0.0), "0.0");
    }

    #[test]
    fn fractional_values_use_default_display() {
        assert_eq!(format_number(1.5), "1.5");
    }

    #[test]
    fn parse_datetime_reads_the_iqtar_timestamp_format() {
        let ts = parse_datetime("2024-03-07T12:34:56.123456").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(u8::from(ts.month()), 3);
        assert_eq!(ts.day(), 7);
    }
}
