use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// APISIX release lines whose resource schemas the control plane knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApisixVersion {
    #[serde(rename = "3.2.X")]
    V3_2,
    #[serde(rename = "3.3.X")]
    V3_3,
    #[serde(rename = "3.11.X")]
    V3_11,
    #[serde(rename = "3.13.X")]
    V3_13,
}

impl ApisixVersion {
    pub const LATEST: ApisixVersion = ApisixVersion::V3_13;

    pub fn as_str(self) -> &'static str {
        match self {
            ApisixVersion::V3_2 => "3.2.X",
            ApisixVersion::V3_3 => "3.3.X",
            ApisixVersion::V3_11 => "3.11.X",
            ApisixVersion::V3_13 => "3.13.X",
        }
    }

    /// Resolves a gateway's version string, falling back to the newest line.
    pub fn parse_lenient(raw: &str) -> ApisixVersion {
        raw.parse().unwrap_or(ApisixVersion::LATEST)
    }
}

impl fmt::Display for ApisixVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApisixVersion {
    type Err = String;

    /// Accepts `3.11.X`, `3.11.2` or `3.11`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let major = parts.next().unwrap_or_default();
        let minor = parts.next().unwrap_or_default();
        match (major, minor) {
            ("3", "2") => Ok(ApisixVersion::V3_2),
            ("3", "3") => Ok(ApisixVersion::V3_3),
            ("3", "11") => Ok(ApisixVersion::V3_11),
            ("3", "13") => Ok(ApisixVersion::V3_13),
            _ => Err(format!("unsupported apisix version '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!("3.2.X".parse::<ApisixVersion>(), Ok(ApisixVersion::V3_2));
        assert_eq!("3.11.4".parse::<ApisixVersion>(), Ok(ApisixVersion::V3_11));
        assert_eq!("v3.13".parse::<ApisixVersion>(), Ok(ApisixVersion::V3_13));
        assert!("2.15.0".parse::<ApisixVersion>().is_err());
        assert_eq!(ApisixVersion::parse_lenient("unknown"), ApisixVersion::LATEST);
    }

    #[test]
    fn test_version_order() {
        assert!(ApisixVersion::V3_2 < ApisixVersion::V3_3);
        assert!(ApisixVersion::V3_11 < ApisixVersion::V3_13);
    }
}
