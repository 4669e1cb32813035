//! Path resolution for tidecode's on-disk state.
//!
//! Follows XDG conventions on Linux/macOS.

use std::path::PathBuf;

/// Get the tidecode configuration directory.
///
/// `$XDG_CONFIG_HOME/tidecode` if set, `~/.config/tidecode` otherwise.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tidecode"))
}

/// Get the tidecode data directory.
///
/// `$XDG_DATA_HOME/tidecode` if set, `~/.local/share/tidecode` otherwise.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("tidecode"))
}

/// Path of the MCP credential store document.
pub fn mcp_auth_path() -> Option<PathBuf> {
    data_dir().map(|p| p.join("mcp-auth.json"))
}

/// Path of the provider API key store.
pub fn api_key_path() -> Option<PathBuf> {
    data_dir().map(|p| p.join("auth.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("tidecode"));
    }

    #[test]
    fn test_store_paths() {
        assert!(mcp_auth_path().unwrap().ends_with("mcp-auth.json"));
        assert!(api_key_path().unwrap().ends_with("auth.json"));
    }
}
