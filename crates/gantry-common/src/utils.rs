use if_addrs::IfAddr;

/// First non-loopback IPv4 address of this host.
///
/// Falls back to `127.0.0.1` if no suitable interface is found.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .map(|iface| iface.ip().to_string())
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Identity this replica campaigns with, `{hostname}_{ip}`.
pub fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}_{}", host, local_ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_shape() {
        let id = instance_id();
        let (host, ip) = id.rsplit_once('_').unwrap();
        assert!(!host.is_empty());
        assert!(ip.parse::<std::net::Ipv4Addr>().is_ok());
    }
}
