//! wg-quick style `.conf` files
//!
//! Reads and writes the INI-like format used by `wg-quick` and the
//! official WireGuard apps. Hook keys (`PostUp` and friends) are accepted
//! and ignored with a warning since this engine never runs shell commands.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::net::IpAddr;

use ipnet::IpNet;
use wg_protocol::{Endpoint, Key};

use crate::config::{InterfaceConfiguration, PeerConfiguration, TunnelConfiguration};
use crate::error::{Error, Result};

/// Keys that are understood by wg-quick but have no effect here
const IGNORED_KEYS: &[&str] = &[
    "preup",
    "postup",
    "predown",
    "postdown",
    "table",
    "saveconfig",
    "fwmark",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

#[derive(Default)]
struct PartialInterface {
    private_key: Option<Key>,
    listen_port: Option<u16>,
    addresses: Vec<IpNet>,
    dns: Vec<IpAddr>,
    dns_search: Vec<String>,
    mtu: u16,
    seen: HashSet<String>,
}

#[derive(Default)]
struct PartialPeer {
    public_key: Option<Key>,
    preshared_key: Option<Key>,
    allowed_ips: Vec<IpNet>,
    endpoint: Option<Endpoint>,
    persistent_keepalive: Option<u16>,
    seen: HashSet<String>,
}

/// Parse a wg-quick configuration
pub fn parse(text: &str, name: Option<&str>) -> Result<TunnelConfiguration> {
    let mut section = Section::None;
    let mut interface: Option<PartialInterface> = None;
    let mut peers: Vec<PartialPeer> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            section = match line.to_ascii_lowercase().as_str() {
                "[interface]" => {
                    if interface.is_some() {
                        return Err(line_error(line_no, "multiple [Interface] sections"));
                    }
                    interface = Some(PartialInterface::default());
                    Section::Interface
                }
                "[peer]" => {
                    peers.push(PartialPeer::default());
                    Section::Peer
                }
                _ => return Err(line_error(line_no, &format!("unknown section {}", line))),
            };
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| line_error(line_no, "expected 'Key = Value'"))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if IGNORED_KEYS.contains(&key.as_str()) {
            log::warn!("Ignoring unsupported wg-quick key '{}' on line {}", key, line_no);
            continue;
        }

        match section {
            Section::None => {
                return Err(line_error(line_no, "key outside of a section"));
            }
            Section::Interface => {
                if let Some(iface) = interface.as_mut() {
                    parse_interface_key(iface, &key, value, line_no)?;
                }
            }
            Section::Peer => {
                if let Some(peer) = peers.last_mut() {
                    parse_peer_key(peer, &key, value, line_no)?;
                }
            }
        }
    }

    let iface = interface.ok_or_else(|| Error::Config("missing [Interface] section".into()))?;
    let private_key = iface
        .private_key
        .ok_or_else(|| Error::Config("[Interface] is missing PrivateKey".into()))?;

    let mut config = TunnelConfiguration::new(InterfaceConfiguration {
        private_key,
        listen_port: iface.listen_port,
        addresses: iface.addresses,
        dns: iface.dns,
        dns_search: iface.dns_search,
        mtu: iface.mtu,
    });
    config.name = name.map(str::to_string);

    for (i, peer) in peers.into_iter().enumerate() {
        let public_key = peer
            .public_key
            .ok_or_else(|| Error::Config(format!("[Peer] #{} is missing PublicKey", i + 1)))?;
        config.peers.push(PeerConfiguration {
            public_key,
            preshared_key: peer.preshared_key,
            allowed_ips: peer.allowed_ips,
            endpoint: peer.endpoint,
            persistent_keepalive: peer.persistent_keepalive,
        });
    }

    config.validate()?;
    Ok(config)
}

fn parse_interface_key(
    iface: &mut PartialInterface,
    key: &str,
    value: &str,
    line_no: usize,
) -> Result<()> {
    check_repeat(&mut iface.seen, key, &["address", "dns"], line_no)?;

    match key {
        "privatekey" => iface.private_key = Some(parse_key(value, line_no)?),
        "listenport" => iface.listen_port = Some(parse_number(value, line_no)?),
        "address" => {
            for item in split_list(value) {
                iface.addresses.push(parse_net(item, line_no)?);
            }
        }
        "dns" => {
            for item in split_list(value) {
                match item.parse::<IpAddr>() {
                    Ok(ip) => iface.dns.push(ip),
                    Err(_) => iface.dns_search.push(item.to_string()),
                }
            }
        }
        "mtu" => iface.mtu = parse_number(value, line_no)?,
        _ => {
            return Err(line_error(
                line_no,
                &format!("unknown key '{}' in [Interface]", key),
            ))
        }
    }
    Ok(())
}

fn parse_peer_key(peer: &mut PartialPeer, key: &str, value: &str, line_no: usize) -> Result<()> {
    check_repeat(&mut peer.seen, key, &["allowedips"], line_no)?;

    match key {
        "publickey" => peer.public_key = Some(parse_key(value, line_no)?),
        "presharedkey" => peer.preshared_key = Some(parse_key(value, line_no)?),
        "allowedips" => {
            for item in split_list(value) {
                peer.allowed_ips.push(parse_net(item, line_no)?);
            }
        }
        "endpoint" => {
            let endpoint = value
                .parse::<Endpoint>()
                .map_err(|e| line_error(line_no, &format!("invalid Endpoint: {}", e)))?;
            peer.endpoint = Some(endpoint);
        }
        "persistentkeepalive" => {
            peer.persistent_keepalive = if value.eq_ignore_ascii_case("off") {
                None
            } else {
                match parse_number::<u16>(value, line_no)? {
                    0 => None,
                    n => Some(n),
                }
            };
        }
        _ => return Err(line_error(line_no, &format!("unknown key '{}' in [Peer]", key))),
    }
    Ok(())
}

/// Render a tunnel as a wg-quick configuration
pub fn format(config: &TunnelConfiguration) -> String {
    let mut out = String::new();
    let iface = &config.interface;

    out.push_str("[Interface]\n");
    let _ = writeln!(out, "PrivateKey = {}", iface.private_key);
    if let Some(port) = iface.listen_port {
        let _ = writeln!(out, "ListenPort = {}", port);
    }
    if !iface.addresses.is_empty() {
        let _ = writeln!(out, "Address = {}", join(&iface.addresses));
    }
    if !iface.dns.is_empty() || !iface.dns_search.is_empty() {
        let mut entries: Vec<String> = iface.dns.iter().map(ToString::to_string).collect();
        entries.extend(iface.dns_search.iter().cloned());
        let _ = writeln!(out, "DNS = {}", entries.join(", "));
    }
    if iface.mtu != 0 {
        let _ = writeln!(out, "MTU = {}", iface.mtu);
    }

    for peer in &config.peers {
        out.push_str("\n[Peer]\n");
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
        if let Some(psk) = &peer.preshared_key {
            let _ = writeln!(out, "PresharedKey = {}", psk);
        }
        if !peer.allowed_ips.is_empty() {
            let _ = writeln!(out, "AllowedIPs = {}", join(&peer.allowed_ips));
        }
        if let Some(endpoint) = &peer.endpoint {
            let _ = writeln!(out, "Endpoint = {}", endpoint);
        }
        if let Some(keepalive) = peer.persistent_keepalive {
            let _ = writeln!(out, "PersistentKeepalive = {}", keepalive);
        }
    }

    out
}

fn check_repeat(
    seen: &mut HashSet<String>,
    key: &str,
    repeatable: &[&str],
    line_no: usize,
) -> Result<()> {
    if !seen.insert(key.to_string()) && !repeatable.contains(&key) {
        return Err(line_error(line_no, &format!("duplicate key '{}'", key)));
    }
    Ok(())
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_key(value: &str, line_no: usize) -> Result<Key> {
    Key::from_base64(value).map_err(|e| line_error(line_no, &e.to_string()))
}

fn parse_number<T: std::str::FromStr>(value: &str, line_no: usize) -> Result<T> {
    value
        .parse()
        .map_err(|_| line_error(line_no, &format!("invalid number '{}'", value)))
}

/// Parse `addr/prefix`, treating a bare address as a host network
fn parse_net(value: &str, line_no: usize) -> Result<IpNet> {
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net);
    }
    value
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| line_error(line_no, &format!("invalid address '{}'", value)))
}

fn join(nets: &[IpNet]) -> String {
    nets.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn line_error(line_no: usize, msg: &str) -> Error {
    Error::Config(format!("line {}: {}", line_no, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "\
[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.8.0.2/24, fd08::2/64
Address = 10.9.0.2
DNS = 10.8.0.1, corp.example.com
PostUp = iptables -A FORWARD -i %i -j ACCEPT
MTU = 1380

# office gateway
[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
AllowedIPs = 0.0.0.0/0, ::/0
Endpoint = vpn.example.com:51820 # primary
PersistentKeepalive = 25
";

    #[test]
    fn test_parse() {
        let config = parse(CONF, Some("office")).unwrap();
        assert_eq!(config.name.as_deref(), Some("office"));

        let iface = &config.interface;
        assert_eq!(iface.addresses.len(), 3);
        assert_eq!(iface.addresses[2], "10.9.0.2/32".parse::<IpNet>().unwrap());
        assert_eq!(iface.dns, vec!["10.8.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(iface.dns_search, vec!["corp.example.com".to_string()]);
        assert_eq!(iface.mtu, 1380);

        let peer = &config.peers[0];
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.endpoint.as_ref().unwrap().to_string(), "vpn.example.com:51820");
        assert_eq!(peer.persistent_keepalive, Some(25));
    }

    #[test]
    fn test_format_reparses() {
        let config = parse(CONF, None).unwrap();
        let text = format(&config);
        assert!(text.contains("DNS = 10.8.0.1, corp.example.com"));
        assert!(!text.contains("PostUp"));
        assert_eq!(parse(&text, None).unwrap(), config);
    }

    #[test]
    fn test_missing_private_key() {
        let err = parse("[Interface]\nListenPort = 51820\n", None).unwrap_err();
        assert!(err.to_string().contains("PrivateKey"));
    }

    #[test]
    fn test_unknown_key() {
        let text = "[Interface]\nPrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\nColor = blue\n";
        let err = parse(text, None).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_duplicate_key() {
        let text = "[Interface]\nPrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\nListenPort = 1\nListenPort = 2\n";
        assert!(parse(text, None).is_err());
    }

    #[test]
    fn test_keepalive_off() {
        let text = "[Interface]\nPrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\n[Peer]\nPublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\nPersistentKeepalive = off\n";
        let config = parse(text, None).unwrap();
        assert_eq!(config.peers[0].persistent_keepalive, None);
    }
}
