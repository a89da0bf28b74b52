/// Default prefix of the names interpolated values are bound under.
pub const DEFAULT_INTERPOLATION_PREFIX: &str = "__conduit_arg_";

/// Bridge-wide settings.
///
/// Deserializable so embedders can keep them next to the rest of their
/// configuration; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Interpolated template values are bound as `<prefix><index>` in the
    /// shadow namespace.
    pub interpolation_prefix: String,
    /// Strip the common leading indentation of evaluated sources.
    pub dedent: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            interpolation_prefix: DEFAULT_INTERPOLATION_PREFIX.to_owned(),
            dedent: true,
        }
    }
}

impl BridgeOptions {
    /// Parses options from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Name an interpolated value at `index` is bound under.
    #[must_use]
    pub fn interpolation_name(&self, index: usize) -> String {
        format!("{}{index}", self.interpolation_prefix)
    }
}
