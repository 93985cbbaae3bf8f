use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Settings that shape a compilation, usually read from `weft.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Allow template names that shadow html tags.
    pub allow_aliasing: bool,
    /// Directories searched for bare import paths, in order.
    pub template_paths: Vec<PathBuf>,
    /// Public url of each source file, for `url()`.
    pub urls: BTreeMap<PathBuf, String>,
    /// Make `url()` of an unregistered file yield an empty string instead of failing.
    pub ignore_unset_urls: bool,
}

/// Renders math source to an svg document. Math layout is left to the host.
pub trait MathRenderer: Send + Sync {
    fn render_svg(&self, source: &str) -> Result<String, String>;
}
