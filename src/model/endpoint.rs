use serde::Serialize;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Service name reported for spans whose endpoint was never registered.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// The process reporting a span: service name plus network address.
///
/// Recorded once per request id when the request is first observed and
/// reused for every annotation on that span.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Logical name of the reporting service.
    pub service_name: String,
    /// IPv4 address of the reporting process, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 address of the reporting process, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<std::net::Ipv6Addr>,
    /// Listening port, `0` when unknown.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint for `service_name` reporting from `addr`.
    pub fn new(service_name: impl Into<String>, addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Endpoint {
                service_name: service_name.into(),
                ipv4: Some(*v4.ip()),
                ipv6: None,
                port: v4.port(),
            },
            SocketAddr::V6(v6) => Endpoint {
                service_name: service_name.into(),
                ipv4: None,
                ipv6: Some(*v6.ip()),
                port: v6.port(),
            },
        }
    }

    /// The sentinel endpoint used when no endpoint was registered for a
    /// request id.
    pub fn unknown() -> Self {
        Endpoint {
            service_name: UNKNOWN_SERVICE.to_string(),
            ipv4: Some(Ipv4Addr::UNSPECIFIED),
            ipv6: None,
            port: 0,
        }
    }
}

/// Determines the local address spans are reported from.
///
/// Connecting a UDP socket sends no traffic; it only asks the OS which
/// interface routes toward the wider network.
pub(crate) fn local_reporting_addr() -> io::Result<SocketAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("8.8.8.8", 53))?;
    socket.local_addr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4() {
        test_json_serialization(
            Endpoint::new("web", "10.0.0.1:8080".parse().unwrap()),
            "{\"serviceName\":\"web\",\"ipv4\":\"10.0.0.1\",\"port\":8080}",
        );
    }

    #[test]
    fn test_ipv6() {
        test_json_serialization(
            Endpoint::new("web", "[::1]:8080".parse().unwrap()),
            "{\"serviceName\":\"web\",\"ipv6\":\"::1\",\"port\":8080}",
        );
    }

    #[test]
    fn test_unknown_sentinel() {
        test_json_serialization(
            Endpoint::unknown(),
            "{\"serviceName\":\"unknown\",\"ipv4\":\"0.0.0.0\",\"port\":0}",
        );
    }

    fn test_json_serialization(endpoint: Endpoint, desired: &str) {
        let result = serde_json::to_string(&endpoint).unwrap();
        assert_eq!(result, desired.to_owned());
    }
}
