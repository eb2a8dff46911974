//! Device fingerprinting from the remote address and user agent.

use sha2::{Digest, Sha256};

use crate::models::session::Device;

/// Derive a [`Device`] for a request.
///
/// The ID is the first 8 bytes of `SHA-256(ip ‖ user_agent)` in lowercase
/// hex, so the same client on the same address always maps to the same
/// device.
pub fn generate_device(ip: &str, user_agent: &str) -> Device {
    let digest = Sha256::digest(format!("{ip}{user_agent}").as_bytes());
    let id = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    let device_type = device_type(user_agent);

    Device {
        id,
        name: format!("My {device_type}"),
        device_type: device_type.to_string(),
        os: os_family(user_agent).to_string(),
        browser: browser_family(user_agent).to_string(),
        user_agent: user_agent.to_string(),
        ip: ip.to_string(),
        last_active: None,
    }
}

fn device_type(ua: &str) -> &'static str {
    let lower = ua.to_ascii_lowercase();
    if ["bot", "crawler", "spider", "slurp"]
        .iter()
        .any(|m| lower.contains(m))
    {
        "bot"
    } else if lower.contains("ipad") || lower.contains("tablet") {
        "tablet"
    } else if lower.contains("mobi") || lower.contains("iphone") || lower.contains("android") {
        "mobile"
    } else if ua.starts_with("Mozilla/") {
        "desktop"
    } else {
        "unknown"
    }
}

fn os_family(ua: &str) -> &'static str {
    // Order matters: iOS and Android UAs also mention Mac OS X and Linux.
    if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("CrOS") {
        "ChromeOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        ""
    }
}

fn browser_family(ua: &str) -> &'static str {
    if ua.contains("Edg/") {
        "Edge"
    } else if ua.contains("OPR/") {
        "Opera"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else {
        ""
    }
}
