use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdiConfig {
    /// Treat archives without `beans.xml` but with bean-defining annotations as bean
    /// archives.
    #[serde(default = "default_true")]
    pub implicit_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CdiConfig {
    fn default() -> Self {
        Self {
            implicit_enabled: default_true(),
        }
    }
}
