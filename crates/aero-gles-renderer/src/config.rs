//! Renderer knobs, resolved from code defaults and environment overrides.

pub const DEBUG_LAYER_ENV: &str = "AERO_GLES_DEBUG_LAYER";
pub const FORCE_VSYNC_OFF_ENV: &str = "AERO_GLES_FORCE_VSYNC_OFF";
pub const DISABLE_FEATURE_LEVEL_9_ENV: &str = "AERO_GLES_DISABLE_FEATURE_LEVEL_9";
pub const INDEX_BUFFER_SIZE_ENV: &str = "AERO_GLES_INDEX_BUFFER_SIZE";

/// Initial capacity of the scratch index buffers used for emulated primitives.
pub const INITIAL_INDEX_BUFFER_SIZE: u32 = 4096 * std::mem::size_of::<u32>() as u32;

pub(crate) fn parse_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

fn env_var_truthy(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|raw| parse_truthy(&raw))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Ask the device factory for validation layers first; creation falls back to a release
    /// device when they are unavailable.
    pub debug_layer: bool,
    /// Present with sync interval 0 regardless of the surface swap interval.
    pub force_vsync_off: bool,
    /// Whether 9_x feature levels are part of the device request.
    pub allow_feature_level_9: bool,
    pub initial_index_buffer_size: u32,
    /// Upper bound on `Renderer::sync` polls; `None` spins until the fence signals.
    pub max_sync_polls: Option<u32>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            debug_layer: cfg!(debug_assertions),
            force_vsync_off: false,
            allow_feature_level_9: true,
            initial_index_buffer_size: INITIAL_INDEX_BUFFER_SIZE,
            max_sync_polls: None,
        }
    }
}

impl RendererConfig {
    /// Defaults with `AERO_GLES_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(debug) = env_var_truthy(DEBUG_LAYER_ENV) {
            config.debug_layer = debug;
        }
        if let Some(off) = env_var_truthy(FORCE_VSYNC_OFF_ENV) {
            config.force_vsync_off = off;
        }
        if let Some(disable) = env_var_truthy(DISABLE_FEATURE_LEVEL_9_ENV) {
            config.allow_feature_level_9 = !disable;
        }
        if let Some(size) = std::env::var(INDEX_BUFFER_SIZE_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|size| *size > 0)
        {
            config.initial_index_buffer_size = size;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive() {
        for raw in ["1", "true", "YES", " On "] {
            assert!(parse_truthy(raw), "{raw}");
        }
        for raw in ["0", "false", "off", ""] {
            assert!(!parse_truthy(raw), "{raw}");
        }
    }

    #[test]
    fn default_index_buffer_holds_4096_u32_indices() {
        assert_eq!(RendererConfig::default().initial_index_buffer_size, 16384);
    }
}
