use std::{fmt, net::IpAddr, str::FromStr};

/// A reachable instance of a `MeshService`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
    /// Zero means "unset"; the compiler fills in a default when rebalancing.
    pub weight: u32,
    /// Identifies the remote cluster a federated endpoint lives in. Local
    /// endpoints carry no key.
    pub cluster_key: Option<String>,
    pub lb_type: Option<LbType>,
    pub path: Option<String>,
}

/// How traffic is spread across clusters exporting the same service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LbType {
    Locality,
    ActiveActive,
    FailOver,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown load balancer type: {0}")]
pub struct InvalidLbType(String);

// === impl Endpoint ===

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            weight: 0,
            cluster_key: None,
            lb_type: None,
            path: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.cluster_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

// === impl LbType ===

impl LbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locality => "Locality",
            Self::ActiveActive => "ActiveActive",
            Self::FailOver => "FailOver",
        }
    }
}

impl FromStr for LbType {
    type Err = InvalidLbType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Locality" => Ok(Self::Locality),
            "ActiveActive" => Ok(Self::ActiveActive),
            "FailOver" => Ok(Self::FailOver),
            other => Err(InvalidLbType(other.to_string())),
        }
    }
}

impl fmt::Display for LbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
