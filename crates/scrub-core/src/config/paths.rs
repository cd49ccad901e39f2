//! Standard locations for scrub configuration files

use std::path::PathBuf;

/// Directory holding scrub's configuration
///
/// Returns: `<config dir>/scrub` (e.g. `~/.config/scrub` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrub")
}

/// Path of a config file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_scrub() {
        assert!(default_config_dir().ends_with("scrub"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("test.yaml");
        assert!(path.ends_with("scrub/test.yaml"));
    }
}
