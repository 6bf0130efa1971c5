//! # reel-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ReelSettings::default()`]
//! 2. **User file**: `~/.reel/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `REEL_*` overrides (highest priority)
//!
//! The file is only read here. Editing it is left to the user.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, reel_home, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_usable() {
        let settings = ReelSettings::default();
        assert!(settings.api.base_url.is_empty());
        assert_eq!(settings.generation.idle_timeout_secs, 300);
        assert_eq!(settings.generation.connect_timeout_secs, 30);
        assert!(!settings.generation.content_restriction.signatures.is_empty());
        assert!(settings.storage.database_path.ends_with("reel.db"));
    }
}
