//! Shared formatting helpers for log output.

use std::time::Duration;

/// Format a bits-per-second rate as human-readable.
///
/// `"94.3 Mbit/s"`, `"1.2 Gbit/s"`, `"512 bit/s"`
pub fn format_bits_rate(bits_per_sec: f64) -> String {
    if !bits_per_sec.is_finite() {
        return "-".to_string();
    }
    if bits_per_sec >= 1e9 {
        format!("{:.1} Gbit/s", bits_per_sec / 1e9)
    } else if bits_per_sec >= 1e6 {
        format!("{:.1} Mbit/s", bits_per_sec / 1e6)
    } else if bits_per_sec >= 1e3 {
        format!("{:.1} kbit/s", bits_per_sec / 1e3)
    } else {
        format!("{:.0} bit/s", bits_per_sec)
    }
}

/// Format a duration for log lines.
///
/// Sub-second values keep millisecond precision (`"850ms"`, `"12.4s"`),
/// longer ones use the largest two units (`"4m 30s"`, `"1h 15m"`).
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Indent every line after the first by `n` spaces so a multi-line value
/// lines up under the first one.
pub fn indent_continuation(n: usize, s: &str) -> String {
    let pad = " ".repeat(n);
    let mut out = String::with_capacity(s.len());
    for (i, line) in s.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str(&pad);
        }
        out.push_str(line);
    }
    out
}
