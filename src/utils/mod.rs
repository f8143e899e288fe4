use std::net::Ipv4Addr;

/// Normalize a MAC address to lowercase colon-separated octets.
/// Accepts colon, hyphen, Cisco dotted (`0cc4.7aaa.bb01`) and bare forms;
/// anything that is not 12 hex digits is only lowercased.
pub fn normalize_mac(mac: &str) -> String {
    let hex: Vec<char> = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if hex.len() != 12 {
        return mac.trim().to_lowercase();
    }

    hex.chunks(2)
        .map(|octet| octet.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// NetBox slug: lowercase alphanumerics joined by single hyphens
pub fn slugify(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Dotted-decimal IPv4 address without a prefix length
pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

/// Host or device name: dot-separated labels of alphanumerics, `-` and `_`,
/// each 1-63 characters and not starting or ending with `-`.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}
