use url::Url;

/// Local filename for a downloaded artifact: the final path segment of its
/// URL. `None` when the URL path has no usable segment.
pub fn artifact_filename(url: &Url) -> Option<&str> {
    url.path_segments().and_then(|mut segments| segments.next_back()).filter(|s| !s.is_empty())
}

/// Format a size in bytes to a human-readable string.
/// Uses SI (kilo = 1000) units, formatted to two decimal places.
pub fn size(value: u64) -> String {
    let units = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let mut value = value as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < units.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}
