pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{:.0} {}", size, UNITS[unit_idx])
    } else {
        format!("{:.1} {}", size, UNITS[unit_idx])
    }
}

/// Output size as a share of input size
pub fn format_ratio(output: u64, input: u64) -> String {
    if input == 0 {
        "N/A".to_string()
    } else {
        format!("{:.1}%", output as f64 / input as f64 * 100.0)
    }
}
