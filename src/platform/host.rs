//! Host identification for report metadata.

use std::fs;

/// Get the system hostname.
///
/// Tries `/etc/hostname`, then `/proc/sys/kernel/hostname`, then the
/// `HOSTNAME` environment variable. Containers launched by batch platforms
/// often carry only the last of these.
pub fn get_hostname() -> std::io::Result<String> {
    for source in ["/etc/hostname", "/proc/sys/kernel/hostname"] {
        if let Ok(contents) = fs::read_to_string(source) {
            let name = contents.trim();
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }
    }

    match std::env::var("HOSTNAME") {
        Ok(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine hostname from /etc/hostname, /proc or HOSTNAME",
        )),
    }
}
