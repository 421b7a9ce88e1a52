//! Enumerated configuration options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where jobs are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database on disk (default).
    #[default]
    Sqlite,
    /// In-process map; jobs are lost on exit.
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Unknown store backend: {}", s)),
        }
    }
}

/// Which variant of an HLS master playlist to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantPreference {
    /// Highest advertised bandwidth (default).
    #[default]
    Highest,
    /// Lowest advertised bandwidth.
    Lowest,
}

impl fmt::Display for VariantPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantPreference::Highest => write!(f, "highest"),
            VariantPreference::Lowest => write!(f, "lowest"),
        }
    }
}

impl FromStr for VariantPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "highest" | "best" => Ok(VariantPreference::Highest),
            "lowest" | "worst" => Ok(VariantPreference::Lowest),
            _ => Err(format!("Unknown variant preference: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!("SQLite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
        assert_eq!("best".parse::<VariantPreference>().unwrap(), VariantPreference::Highest);
        assert_eq!(VariantPreference::Lowest.to_string(), "lowest");
    }
}
