//! Human-readable rendering of the control socket's status reply

use std::fmt::Write;

use wgpilot_engine::StatusInfo;

/// Render status the way `wg show` lays out an interface
pub fn render_status(status: &StatusInfo) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "interface: {}", status.interface);
    if let Some(name) = &status.name {
        let _ = writeln!(out, "  tunnel: {}", name);
    }
    let _ = writeln!(out, "  state: {}", status.state);
    if let Some(session) = status.session {
        let _ = writeln!(out, "  session: #{}", session);
    }
    if let Some(port) = status.listen_port {
        let _ = writeln!(out, "  listening port: {}", port);
    }
    if status.session.is_some() {
        let _ = writeln!(
            out,
            "  transfer: {} received, {} sent",
            format_bytes(status.bytes_rx),
            format_bytes(status.bytes_tx)
        );
    }

    for peer in &status.peers {
        let _ = writeln!(out);
        let _ = writeln!(out, "peer: {}", peer.public_key);
        if let Some(endpoint) = &peer.endpoint {
            let _ = writeln!(out, "  endpoint: {}", endpoint);
        }
        if !peer.allowed_ips.is_empty() {
            let _ = writeln!(out, "  allowed ips: {}", peer.allowed_ips.join(", "));
        }
        match peer.last_handshake_secs {
            Some(secs) => {
                let _ = writeln!(out, "  latest handshake: {} ago", format_elapsed(secs));
            }
            None => {
                let _ = writeln!(out, "  latest handshake: never");
            }
        }
        let _ = writeln!(
            out,
            "  transfer: {} received, {} sent",
            format_bytes(peer.bytes_rx),
            format_bytes(peer.bytes_tx)
        );
    }

    out
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

fn format_elapsed(secs: u64) -> String {
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpilot_engine::{PeerStatus, TunnelState};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(7), "7s");
        assert_eq!(format_elapsed(125), "2m 5s");
        assert_eq!(format_elapsed(3725), "1h 2m 5s");
    }

    #[test]
    fn test_render_idle() {
        let status = StatusInfo {
            state: TunnelState::Idle,
            name: None,
            interface: "wg0".into(),
            session: None,
            listen_port: None,
            bytes_rx: 0,
            bytes_tx: 0,
            peers: vec![],
        };

        let text = render_status(&status);
        assert!(text.starts_with("interface: wg0\n"));
        assert!(!text.contains("transfer"));
        assert!(!text.contains("peer:"));
    }

    #[test]
    fn test_render_running() {
        let status = StatusInfo {
            state: TunnelState::Running,
            name: Some("office".into()),
            interface: "wg0".into(),
            session: Some(3),
            listen_port: Some(51820),
            bytes_rx: 2048,
            bytes_tx: 10,
            peers: vec![PeerStatus {
                public_key: "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=".into(),
                endpoint: Some("192.0.2.1:51820".into()),
                last_handshake_secs: None,
                bytes_rx: 2048,
                bytes_tx: 10,
                allowed_ips: vec!["0.0.0.0/0".into(), "::/0".into()],
            }],
        };

        let text = render_status(&status);
        assert!(text.contains("  tunnel: office\n"));
        assert!(text.contains("  session: #3\n"));
        assert!(text.contains("  listening port: 51820\n"));
        assert!(text.contains("  transfer: 2.00 KiB received, 10 B sent\n"));
        assert!(text.contains("peer: xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n"));
        assert!(text.contains("  allowed ips: 0.0.0.0/0, ::/0\n"));
        assert!(text.contains("  latest handshake: never\n"));
    }
}
