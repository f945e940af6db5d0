use std::path::PathBuf;

/// Location of the desktop client's state database, relative to the
/// platform config directory.
const STATE_DB_RELATIVE: &str = "Cursor/User/globalStorage/state.vscdb";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".autologin"))
            .unwrap_or_else(|| PathBuf::from(".autologin"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.base.join("browser")
    }

    /// Chrome user data directory for one display mode. Headless and visible
    /// runs never share a profile, so a detached visible browser does not
    /// lock the profile of the next headless run.
    pub fn browser_profile_dir(&self, headless: bool) -> PathBuf {
        let name = if headless { "headless" } else { "visible" };
        self.browser_dir().join(name)
    }

    /// Default state database of the desktop client.
    ///
    /// macOS: `~/Library/Application Support/...`, Linux: `~/.config/...`,
    /// Windows: `%APPDATA%\...`.
    pub fn default_state_db() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STATE_DB_RELATIVE)
    }

    pub fn default_shell_rc() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zshrc")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/al"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/al/config.json"));
        assert_eq!(
            paths.browser_profile_dir(true),
            PathBuf::from("/tmp/al/browser/headless")
        );
        assert_eq!(
            paths.browser_profile_dir(false),
            PathBuf::from("/tmp/al/browser/visible")
        );
    }

    #[test]
    fn test_default_state_db_suffix() {
        let db = Paths::default_state_db();
        assert!(db.ends_with("Cursor/User/globalStorage/state.vscdb"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/zshrc"), PathBuf::from("/etc/zshrc"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.zshrc"), home.join(".zshrc"));
        }
    }
}
