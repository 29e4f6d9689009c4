//! Human-readable formatting for reports.

/// Binary unit suffixes, one per power of 1024.
const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Format bytes as a compact human-readable string.
///
/// Sizes below ten bytes are printed exactly (`"7B"`). Larger sizes are
/// scaled to the largest fitting unit and rounded to one decimal, which is
/// only shown while the scaled value is below ten (`"1.5KiB"`, `"12MiB"`).
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 10 {
        return format!("{}B", bytes);
    }

    let mut exponent = 0;
    let mut whole = bytes;
    while whole >= 1024 && exponent < UNITS.len() - 1 {
        whole /= 1024;
        exponent += 1;
    }

    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    let value = (scaled * 10.0 + 0.5).floor() / 10.0;

    if value < 10.0 {
        format!("{:.1}{}", value, UNITS[exponent])
    } else {
        format!("{:.0}{}", value, UNITS[exponent])
    }
}

/// Percentage of `part` in `whole` with one decimal, e.g. `"97.5%"`.
pub fn format_percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", 100.0 * part as f64 / whole as f64)
}
