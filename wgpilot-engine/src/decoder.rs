//! Turning an activation context into a tunnel configuration

use std::path::{Path, PathBuf};

use crate::config::TunnelConfiguration;
use crate::error::Result;
use crate::wg_quick;

/// Where the tunnel configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Inline TOML text
    Toml(String),
    /// Inline wg-quick text
    WgQuick(String),
    /// A file; `.conf` is read as wg-quick, anything else as TOML
    File(PathBuf),
}

/// Activation context handed to `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfiguration {
    /// Tunnel name override
    pub name: Option<String>,
    pub source: ConfigSource,
}

impl ProtocolConfiguration {
    pub fn toml(text: impl Into<String>) -> Self {
        Self {
            name: None,
            source: ConfigSource::Toml(text.into()),
        }
    }

    pub fn wg_quick(text: impl Into<String>) -> Self {
        Self {
            name: None,
            source: ConfigSource::WgQuick(text.into()),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            source: ConfigSource::File(path.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Decodes an activation context
pub trait ConfigDecoder: Send + Sync {
    fn decode(&self, protocol: &ProtocolConfiguration) -> Result<TunnelConfiguration>;
}

/// Decoder for TOML and wg-quick sources
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecoder;

impl DefaultDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_file(&self, path: &Path) -> Result<TunnelConfiguration> {
        let text = std::fs::read_to_string(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str());

        if path.extension().is_some_and(|ext| ext == "conf") {
            wg_quick::parse(&text, stem)
        } else {
            let mut tunnel = TunnelConfiguration::from_toml(&text)?;
            if tunnel.name.is_none() {
                tunnel.name = stem.map(str::to_string);
            }
            Ok(tunnel)
        }
    }
}

impl ConfigDecoder for DefaultDecoder {
    fn decode(&self, protocol: &ProtocolConfiguration) -> Result<TunnelConfiguration> {
        let mut tunnel = match &protocol.source {
            ConfigSource::Toml(text) => TunnelConfiguration::from_toml(text)?,
            ConfigSource::WgQuick(text) => wg_quick::parse(text, None)?,
            ConfigSource::File(path) => self.decode_file(path)?,
        };

        if let Some(name) = &protocol.name {
            tunnel.name = Some(name.clone());
        }

        log::debug!(
            "Decoded tunnel '{}' with {} peer(s)",
            tunnel.display_name(),
            tunnel.peers.len()
        );
        Ok(tunnel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WG_QUICK: &str = "[Interface]\nPrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\nAddress = 10.0.0.2/32\n\n[Peer]\nPublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\nAllowedIPs = 10.0.0.0/24\nEndpoint = 192.0.2.1:51820\n";

    #[test]
    fn test_decode_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home.conf");
        std::fs::write(&path, WG_QUICK).unwrap();

        let tunnel = DefaultDecoder.decode(&ProtocolConfiguration::file(&path)).unwrap();
        assert_eq!(tunnel.name.as_deref(), Some("home"));
        assert_eq!(tunnel.peers.len(), 1);

        let tunnel = DefaultDecoder
            .decode(&ProtocolConfiguration::file(&path).with_name("work"))
            .unwrap();
        assert_eq!(tunnel.name.as_deref(), Some("work"));
    }

    #[test]
    fn test_decode_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(
            &path,
            "[interface]\nprivate_key = \"yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\"\n",
        )
        .unwrap();

        let tunnel = DefaultDecoder.decode(&ProtocolConfiguration::file(&path)).unwrap();
        assert_eq!(tunnel.name.as_deref(), Some("lab"));
    }

    #[test]
    fn test_decode_errors() {
        let err = DefaultDecoder
            .decode(&ProtocolConfiguration::wg_quick("[Peer]\n"))
            .unwrap_err();
        assert!(err.is_config_error());

        let err = DefaultDecoder
            .decode(&ProtocolConfiguration::file("/nonexistent/tunnel.conf"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
