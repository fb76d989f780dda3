use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;

use super::DeploymentDescriptor;
use super::properties;

/// Source of user-supplied deployment metadata, merged over what the sniffers found.
///
/// An error is fatal for the deployment attempt: downstream modules may depend on the
/// data, so it is never silently dropped.
pub trait DeploymentDataRetriever: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Any failure to produce the data.
    fn retrieve(&self, descriptor: &DeploymentDescriptor)
    -> anyhow::Result<BTreeMap<String, String>>;
}

/// Fixed key/value pairs applied to every deployment.
#[derive(Debug, Clone, Default)]
pub struct StaticDataRetriever {
    data: BTreeMap<String, String>,
}

impl StaticDataRetriever {
    #[must_use]
    pub fn new(data: BTreeMap<String, String>) -> Self {
        Self { data }
    }
}

impl DeploymentDataRetriever for StaticDataRetriever {
    fn name(&self) -> &'static str {
        "static"
    }

    fn retrieve(
        &self,
        _descriptor: &DeploymentDescriptor,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(self.data.clone())
    }
}

/// Reads a `.properties` side-file: `descriptor.properties`, or `<archive>.properties`
/// next to the archive. Only the implicit `<archive>.properties` may be absent; a missing
/// file named by the descriptor is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesFileRetriever;

impl PropertiesFileRetriever {
    #[must_use]
    pub fn side_file(descriptor: &DeploymentDescriptor) -> PathBuf {
        descriptor.properties.clone().unwrap_or_else(|| {
            let mut p = descriptor.archive.clone().into_os_string();
            p.push(".properties");
            PathBuf::from(p)
        })
    }
}

impl DeploymentDataRetriever for PropertiesFileRetriever {
    fn name(&self) -> &'static str {
        "properties-file"
    }

    fn retrieve(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let path = Self::side_file(descriptor);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound && descriptor.properties.is_none() =>
            {
                tracing::debug!(file = %path.display(), "no deployment properties file");
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read '{}'", path.display()));
            }
        };
        let text = String::from_utf8(bytes)
            .with_context(|| format!("'{}' is not valid UTF-8", path.display()))?;
        let data = properties::parse(&text)
            .with_context(|| format!("malformed properties file '{}'", path.display()))?;
        tracing::debug!(file = %path.display(), keys = data.len(), "loaded deployment properties");
        Ok(data)
    }
}
