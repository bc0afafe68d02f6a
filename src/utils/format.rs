use std::time::Duration;

const BINARY_UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// 按 1024 进位显示字节数，不足 1 KiB 时显示整数
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    // 最高位决定单位
    let exponent = ((63 - bytes.leading_zeros()) / 10).min(BINARY_UNITS.len() as u32) as usize;
    let value = bytes as f64 / (1u64 << (10 * exponent)) as f64;

    format!("{:.1} {}", value, BINARY_UNITS[exponent - 1])
}

/// `1.5s` / `2m05s` / `1h02m05s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", duration.as_secs_f64()),
        (0, minutes, seconds) => format!("{}m{:02}s", minutes, seconds),
        (hours, minutes, seconds) => format!("{}h{:02}m{:02}s", hours, minutes, seconds),
    }
}
