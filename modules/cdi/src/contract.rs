use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// `bean-discovery-mode` of a `beans.xml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    All,
    Annotated,
    None,
}

impl DiscoveryMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Annotated => "annotated",
            Self::None => "none",
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::All),
            "annotated" => Ok(Self::Annotated),
            "none" => Ok(Self::None),
            other => Err(format!("unknown bean-discovery-mode '{other}'")),
        }
    }
}

/// How a deployment became a bean archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BeanArchiveKind {
    /// Declared by a `beans.xml`.
    Explicit,
    /// No descriptor; bean-defining annotations were found.
    Implicit,
}

impl BeanArchiveKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

impl FromStr for BeanArchiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "implicit" => Ok(Self::Implicit),
            other => Err(format!("unknown bean archive kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeanArchive {
    pub deployment: String,
    pub kind: BeanArchiveKind,
    pub discovery_mode: DiscoveryMode,
}

/// Bean archives known to the `cdi` module.
pub trait BeanArchives: Send + Sync {
    /// Ordered by deployment name.
    fn archives(&self) -> Vec<BeanArchive>;

    fn get(&self, deployment: &str) -> Option<BeanArchive>;
}
