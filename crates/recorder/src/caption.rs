/// Caption attached to every file of a capture, e.g.
/// `#Alice #bilibili 20261019` followed by the broadcast title on its own line.
pub fn gen_caption(name: &str, plat_name: &str, date: &str, title: &str) -> String {
    format!("#{} #{} {}\n{}", name, plat_name, date, title)
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count with binary units, e.g. 1536 -> "1.50 KB"
pub fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
