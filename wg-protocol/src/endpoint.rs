//! Peer endpoint parsing and canonical encoding
//!
//! An endpoint is written `host:port` for IPv4 addresses and hostnames, and
//! `[host]:port` for IPv6 addresses. The text form ends up in backend UAPI
//! configuration and in saved tunnel files, so [`Endpoint`]'s `Display`
//! output is canonical and stable: parsing it again yields an equal value.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Host half of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// IPv4 literal
    Ipv4(Ipv4Addr),
    /// IPv6 literal
    Ipv6(Ipv6Addr),
    /// Anything else, resolved through DNS before use
    Name(String),
}

impl Host {
    /// Classify a host token: IP literals become address variants,
    /// everything else is a name
    fn classify(token: &str) -> Self {
        if let Ok(addr) = token.parse::<Ipv4Addr>() {
            return Host::Ipv4(addr);
        }
        if let Ok(addr) = token.parse::<Ipv6Addr>() {
            return Host::Ipv6(addr);
        }
        Host::Name(token.to_string())
    }

    /// Check if the host is an IP literal
    pub fn is_ip_address(&self) -> bool {
        !matches!(self, Host::Name(_))
    }

    /// Get the IP address if the host is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Host::Ipv4(addr) => Some(IpAddr::V4(*addr)),
            Host::Ipv6(addr) => Some(IpAddr::V6(*addr)),
            Host::Name(_) => None,
        }
    }

    /// IPv6 literal with a zone suffix, such as `fe80::1%eth0`
    ///
    /// These stay [`Host::Name`] because [`Ipv6Addr`] has no zone, but they
    /// must never be sent to a name resolver.
    pub fn is_scoped_ipv6(&self) -> bool {
        match self {
            Host::Name(name) => name.split_once('%').is_some_and(|(addr, zone)| {
                !zone.is_empty() && addr.parse::<Ipv6Addr>().is_ok()
            }),
            _ => false,
        }
    }

    /// Whether the textual form must be wrapped in brackets
    fn needs_brackets(&self) -> bool {
        match self {
            Host::Ipv4(_) => false,
            Host::Ipv6(_) => true,
            // Zone-scoped v6 literals ("fe80::1%eth0") stay names but still
            // contain ':'
            Host::Name(name) => name.contains(':'),
        }
    }
}

impl From<IpAddr> for Host {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Host::Ipv4(v4),
            IpAddr::V6(v6) => Host::Ipv6(v6),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ipv4(addr) => write!(f, "{}", addr),
            Host::Ipv6(addr) => write!(f, "{}", addr),
            Host::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A remote peer address: host (name or IP literal) plus UDP port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: Host,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts
    ///
    /// A [`Host::Name`] holding an IP literal becomes the matching address
    /// variant, the same value parsing the text form would give.
    pub fn new(host: Host, port: u16) -> Self {
        let host = match host {
            Host::Name(name) => Host::classify(&name),
            host => host,
        };
        Self { host, port }
    }

    /// Parse an endpoint, returning `None` for anything malformed
    ///
    /// Use [`str::parse`] to get the reason a string was rejected.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Get the host
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if the host is an IP literal (no resolution needed)
    pub fn has_host_as_ip_address(&self) -> bool {
        self.host.is_ip_address()
    }

    /// Get the hostname if the host is not an IP literal
    pub fn hostname(&self) -> Option<&str> {
        match &self.host {
            Host::Name(name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Get the IP address if the host is an IP literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.ip()
    }

    /// Name to look up before the endpoint can be used, if any
    ///
    /// Like [`hostname`](Self::hostname) but skips zone-scoped IPv6
    /// literals, which pass to the backend as written.
    pub fn name_to_resolve(&self) -> Option<&str> {
        self.hostname().filter(|_| !self.host.is_scoped_ipv6())
    }

    /// Convert to a socket address if the host is an IP literal
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Copy of this endpoint with the host replaced by a resolved address
    pub fn with_ip(&self, ip: IpAddr) -> Self {
        Self {
            host: Host::from(ip),
            port: self.port,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: Host::from(addr.ip()),
            port: addr.port(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::EmptyEndpoint);
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| Error::UnterminatedBracket(s.to_string()))?;
            let after = &rest[end + 1..];
            if after.is_empty() {
                return Err(Error::MissingPort(s.to_string()));
            }
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| Error::MissingPortSeparator(s.to_string()))?;
            (&rest[..end], port)
        } else {
            let colon = s.find(':').ok_or_else(|| Error::MissingPort(s.to_string()))?;
            (&s[..colon], &s[colon + 1..])
        };

        if host.is_empty() {
            return Err(Error::EmptyHost(s.to_string()));
        }

        let port = parse_port(port)?;

        if let Some(ch) = host.chars().find(|c| !is_host_char(*c)) {
            return Err(Error::InvalidHostCharacter {
                host: host.to_string(),
                ch,
            });
        }

        Ok(Self {
            host: Host::classify(host),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.needs_brackets() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Decimal digits only: `u16::from_str` would also take a leading '+'
fn parse_port(s: &str) -> Result<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPort(s.to_string()));
    }
    s.parse::<u16>().map_err(|_| Error::InvalidPort(s.to_string()))
}

/// Characters allowed in the host part of a URL
fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.' | '_' | '~' | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';'
                | '=' | ':' | '%'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let ep: Endpoint = "192.168.1.1:51820".parse().unwrap();
        assert_eq!(ep.host(), &Host::Ipv4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(ep.port(), 51820);
        assert!(ep.has_host_as_ip_address());
        assert_eq!(ep.hostname(), None);
    }

    #[test]
    fn test_parse_hostname() {
        let ep: Endpoint = "example.com:51820".parse().unwrap();
        assert_eq!(ep.hostname(), Some("example.com"));
        assert_eq!(ep.port(), 51820);
        assert!(!ep.has_host_as_ip_address());
        assert_eq!(ep.to_socket_addr(), None);
    }

    #[test]
    fn test_parse_ipv6() {
        let ep: Endpoint = "[2001:db8::1]:443".parse().unwrap();
        assert_eq!(ep.ip(), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(ep.port(), 443);
        assert_eq!(ep.to_string(), "[2001:db8::1]:443");
    }

    #[test]
    fn test_round_trip() {
        for s in [
            "1.2.3.4:0",
            "10.0.0.1:65535",
            "[::1]:51820",
            "[fe80::1%eth0]:51820",
            "vpn.example.com:4500",
            "my_host-1.lan:1",
        ] {
            let ep: Endpoint = s.parse().unwrap();
            assert_eq!(ep.to_string(), s);
            assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);
        }
    }

    #[test]
    fn test_new_classifies_literal_names() {
        let ep = Endpoint::new(Host::Name("1.2.3.4".into()), 80);
        assert_eq!(ep.host(), &Host::Ipv4(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);

        let ep = Endpoint::new(Host::Name("2001:db8::1".into()), 443);
        assert_eq!(ep.to_string(), "[2001:db8::1]:443");
        assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);

        let ep = Endpoint::new(Host::Name("vpn.example.com".into()), 51820);
        assert_eq!(ep.hostname(), Some("vpn.example.com"));
    }

    #[test]
    fn test_scoped_ipv6_needs_no_resolution() {
        let ep: Endpoint = "[fe80::1%eth0]:51820".parse().unwrap();
        assert!(ep.host().is_scoped_ipv6());
        assert_eq!(ep.name_to_resolve(), None);

        let ep: Endpoint = "vpn.example.com:51820".parse().unwrap();
        assert!(!ep.host().is_scoped_ipv6());
        assert_eq!(ep.name_to_resolve(), Some("vpn.example.com"));

        // '%' without a valid address in front is just an odd name
        let ep: Endpoint = "host%eth0:1".parse().unwrap();
        assert_eq!(ep.name_to_resolve(), Some("host%eth0"));
    }

    #[test]
    fn test_canonicalization() {
        let ep: Endpoint = "[2001:0db8:0000::0001]:443".parse().unwrap();
        assert_eq!(ep.to_string(), "[2001:db8::1]:443");

        let ep: Endpoint = "[10.0.0.1]:80".parse().unwrap();
        assert_eq!(ep.to_string(), "10.0.0.1:80");

        let ep: Endpoint = "[example.com]:80".parse().unwrap();
        assert_eq!(ep.to_string(), "example.com:80");
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!("".parse::<Endpoint>(), Err(Error::EmptyEndpoint));
        assert!(matches!("example.com".parse::<Endpoint>(), Err(Error::MissingPort(_))));
        assert!(matches!("[::1:80".parse::<Endpoint>(), Err(Error::UnterminatedBracket(_))));
        assert!(matches!("[::1]".parse::<Endpoint>(), Err(Error::MissingPort(_))));
        assert!(matches!(
            "[::1]80".parse::<Endpoint>(),
            Err(Error::MissingPortSeparator(_))
        ));
        assert!(matches!(":80".parse::<Endpoint>(), Err(Error::EmptyHost(_))));
        assert!(matches!("[]:80".parse::<Endpoint>(), Err(Error::EmptyHost(_))));
    }

    #[test]
    fn test_rejects_bad_ports() {
        for s in ["host:", "host:http", "host:65536", "host:-1", "host:+80", "1.2.3.4:8 0"] {
            assert!(
                matches!(s.parse::<Endpoint>(), Err(Error::InvalidPort(_))),
                "{} should be rejected",
                s
            );
        }
        // Unbracketed IPv6 splits at the first ':' and leaves garbage as port
        assert!("2001:db8::1:443".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_rejects_bad_host_chars() {
        assert!(matches!(
            "exa mple.com:80".parse::<Endpoint>(),
            Err(Error::InvalidHostCharacter { ch: ' ', .. })
        ));
        assert!(Endpoint::parse("host/path:80").is_none());
        assert!(Endpoint::parse("héllo:80").is_none());
    }

    #[test]
    fn test_with_ip() {
        let ep = Endpoint::parse("example.com:51820").unwrap();
        let resolved = ep.with_ip("93.184.216.34".parse().unwrap());
        assert!(resolved.has_host_as_ip_address());
        assert_eq!(resolved.to_string(), "93.184.216.34:51820");
    }

    #[test]
    fn test_serde_as_string() {
        let ep = Endpoint::parse("[::1]:51820").unwrap();
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"[::1]:51820\"");
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
        assert!(serde_json::from_str::<Endpoint>("\"nope\"").is_err());
    }
}
