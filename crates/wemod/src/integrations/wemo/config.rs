use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// Configuration for the WeMo integration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Enable the integration (default: true when the section is present)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { enabled: true }
    }
}
