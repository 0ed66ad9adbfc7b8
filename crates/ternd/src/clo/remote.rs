//! `<host>[:<port>]` duct names.

use std::fmt;
use std::net::SocketAddr;

use crate::error::CloError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr {
    pub host: String,
    pub port: u16,
}

impl RemoteAddr {
    /// Parse a duct name. A missing or zero port means `default_port`.
    /// IPv6 literals must be bracketed when a port is given.
    pub fn parse(name: &str, default_port: u16) -> Result<Self, CloError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CloError::Configuration("empty duct name".into()));
        }

        let (host, port) = if let Some(rest) = name.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| CloError::Configuration(format!("unterminated '[' in {name}")))?;
            match tail {
                "" => (host, None),
                t => match t.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(CloError::Configuration(format!("bad duct name: {name}")))
                    }
                },
            }
        } else {
            match name.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                // Bare IPv6 literal, no port.
                Some(_) => (name, None),
                None => (name, None),
            }
        };

        if host.is_empty() {
            return Err(CloError::Configuration(format!("no host in {name}")));
        }
        let port = match port {
            None => default_port,
            Some(p) => match p.parse::<u16>() {
                Ok(0) => default_port,
                Ok(n) => n,
                Err(_) => {
                    return Err(CloError::Configuration(format!("bad port in {name}")));
                }
            },
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Resolve once. The first address returned wins.
    pub async fn resolve(&self) -> Result<SocketAddr, CloError> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| CloError::Configuration(format!("can't resolve {self}: {e}")))?;
        addrs
            .next()
            .ok_or_else(|| CloError::Configuration(format!("no address for {self}")))
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
