use flux_config::TransportProtocol;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

/// 协议相关的接收参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolSettings {
    pub buffer_size: usize,
    pub timeout: Duration,
}

impl ProtocolSettings {
    /// UDP 丢包与乱序更多，使用更大的缓冲和更长的超时
    pub fn for_protocol(protocol: TransportProtocol) -> Self {
        if protocol.is_udp() {
            Self {
                buffer_size: 16 * 1024 * 1024,
                timeout: Duration::from_secs(10),
            }
        } else {
            Self {
                buffer_size: 8 * 1024 * 1024,
                timeout: Duration::from_secs(5),
            }
        }
    }
}

/// 源地址是否为组播地址（224.0.0.0 - 239.255.255.255 或 IPv6 ff00::/8）
pub fn is_multicast_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_multicast())
        .unwrap_or(false)
}

/// 组播源强制使用组播传输
pub fn effective_protocol(configured: TransportProtocol, url: &str) -> TransportProtocol {
    if is_multicast_url(url) {
        TransportProtocol::Multicast
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_detection() {
        assert!(is_multicast_url("rtsp://224.0.0.1:554/live"));
        assert!(is_multicast_url("rtp://239.255.255.255:5004"));
        assert!(is_multicast_url("rtsp://[ff02::1]:554/live"));
        assert!(!is_multicast_url("rtsp://223.255.255.255/live"));
        assert!(!is_multicast_url("rtsp://240.0.0.1/live"));
        assert!(!is_multicast_url("rtsp://192.168.1.10:554/stream1"));
        assert!(!is_multicast_url("rtsp://camera.local/stream1"));
        assert!(!is_multicast_url("not a url"));
    }

    #[test]
    fn test_protocol_settings() {
        let udp = ProtocolSettings::for_protocol(TransportProtocol::Udp);
        assert_eq!(udp.buffer_size, 16 * 1024 * 1024);
        assert_eq!(udp.timeout, Duration::from_secs(10));

        let tcp = ProtocolSettings::for_protocol(TransportProtocol::Tcp);
        assert_eq!(tcp.buffer_size, 8 * 1024 * 1024);
        assert_eq!(tcp.timeout, Duration::from_secs(5));

        assert_eq!(
            ProtocolSettings::for_protocol(TransportProtocol::Multicast),
            udp
        );
    }

    #[test]
    fn test_effective_protocol() {
        assert_eq!(
            effective_protocol(TransportProtocol::Tcp, "rtsp://230.1.1.1/live"),
            TransportProtocol::Multicast
        );
        assert_eq!(
            effective_protocol(TransportProtocol::Udp, "rtsp://10.0.0.2/live"),
            TransportProtocol::Udp
        );
    }
}
