use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingProtocol {
    Tcp,
    Udp,
    Sctp,
}

impl MappingProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl FromStr for MappingProtocol {
    type Err = anyhow::Error;

    fn from_str(proto: &str) -> Result<Self> {
        match proto.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "sctp" => Ok(Self::Sctp),
            other => anyhow::bail!("Unsupported protocol '{}'", other),
        }
    }
}

impl fmt::Display for MappingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: MappingProtocol,
    /// Host address to bind; `None` means every local address.
    #[serde(default)]
    pub host_ip: Option<IpAddr>,
}

impl FromStr for PortMapping {
    type Err = anyhow::Error;

    /// Parses `[HOST_IP:]HOST_PORT:CONTAINER_PORT[/PROTO]`, e.g.
    /// `8080:80`, `127.0.0.1:8080:80/udp` or `[::1]:8080:80`.
    fn from_str(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        let (ports, protocol) = match trimmed.rsplit_once('/') {
            Some((ports, proto)) => (ports, proto.parse()?),
            None => (trimmed, MappingProtocol::Tcp),
        };

        let (host_part, container_port) = ports
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Port mapping must be HOST_PORT:CONTAINER_PORT: {}", spec))?;
        let container_port = parse_port(container_port)
            .with_context(|| format!("Invalid container port in {}", spec))?;

        let (host_ip, host_port) = match host_part.rsplit_once(':') {
            Some((ip, port)) => (parse_host_ip(ip)?, port),
            None => (None, host_part),
        };
        let host_port =
            parse_port(host_port).with_context(|| format!("Invalid host port in {}", spec))?;

        Ok(Self {
            host_port,
            container_port,
            protocol,
            host_ip,
        })
    }
}

fn parse_port(value: &str) -> Result<u16> {
    let port: u16 = value.trim().parse()?;
    if port == 0 {
        anyhow::bail!("port 0 is not allowed");
    }
    Ok(port)
}

fn parse_host_ip(value: &str) -> Result<Option<IpAddr>> {
    let value = value.trim_start_matches('[').trim_end_matches(']');
    if value.is_empty() {
        return Ok(None);
    }

    let ip: IpAddr = value
        .parse()
        .with_context(|| format!("Invalid host IP address '{}'", value))?;
    Ok((!ip.is_unspecified()).then_some(ip))
}

/// Port mappings of a single pod sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodPortMapping {
    pub namespace: String,
    pub name: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub mappings: Vec<PortMapping>,
}

impl PodPortMapping {
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.namespace, self.name)
    }
}
