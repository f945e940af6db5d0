use autologin_core::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What happened to the startup file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvUpdate {
    /// An existing export line was rewritten in place.
    Replaced,
    /// No export line existed; a new block was appended.
    Appended,
}

pub fn export_line(var_name: &str, value: &str) -> String {
    format!("export {}=\"{}\"\n", var_name, value)
}

/// Rewrite `content` so it exports `var_name` with `value`.
///
/// Lines keep their terminators and order. Every existing
/// `export <var_name>=` line is replaced; otherwise a blank line, `comment`
/// and the export line are appended.
pub fn apply_export(
    content: &str,
    var_name: &str,
    value: &str,
    comment: &str,
) -> (String, EnvUpdate) {
    let marker = format!("export {}=", var_name);
    let new_line = export_line(var_name, value);

    let mut lines: Vec<String> = content.split_inclusive('\n').map(String::from).collect();
    let mut found = false;
    for line in lines.iter_mut() {
        if line.trim().starts_with(&marker) {
            *line = new_line.clone();
            found = true;
        }
    }

    if found {
        return (lines.concat(), EnvUpdate::Replaced);
    }

    if let Some(last) = lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }
    lines.push("\n".to_string());
    lines.push(format!("{}\n", comment));
    lines.push(new_line);
    (lines.concat(), EnvUpdate::Appended)
}

/// Persists a secret as an exported variable in a shell startup file.
pub struct EnvWriter {
    path: PathBuf,
    var_name: String,
    comment: String,
}

impl EnvWriter {
    pub fn new(path: PathBuf, var_name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            path,
            var_name: var_name.into(),
            comment: comment.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    /// Export `value` from the startup file. A file created here is
    /// readable by its owner only.
    pub fn write(&self, value: &str) -> Result<EnvUpdate> {
        let existed = self.path.exists();
        let content = if existed {
            std::fs::read_to_string(&self.path)?
        } else {
            String::new()
        };

        let (updated, outcome) = apply_export(&content, &self.var_name, value, &self.comment);
        std::fs::write(&self.path, updated)?;
        if !existed {
            restrict_to_owner(&self.path)?;
        }
        debug!(path = %self.path.display(), var = %self.var_name, ?outcome, "Startup file updated");
        Ok(outcome)
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMMENT: &str = "# Cursor API Key (added automatically)";

    fn writer(dir: &TempDir) -> EnvWriter {
        EnvWriter::new(dir.path().join(".zshrc"), "CURSOR_API_KEY", COMMENT)
    }

    #[test]
    fn test_append_after_unrelated_export() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        std::fs::write(w.path(), "export PATH=\"$HOME/bin:$PATH\"\n").unwrap();

        let secret = format!("key_ABC123{}", "x".repeat(26));
        assert_eq!(w.write(&secret).unwrap(), EnvUpdate::Appended);

        let content = std::fs::read_to_string(w.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "export PATH=\"$HOME/bin:$PATH\"");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], COMMENT);
        assert_eq!(lines[3], format!("export CURSOR_API_KEY=\"{}\"", secret));
    }

    #[test]
    fn test_rerun_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let original = "alias ll='ls -l'\nexport CURSOR_API_KEY=\"key_OLD\"\nexport EDITOR=vim\n";
        std::fs::write(w.path(), original).unwrap();

        assert_eq!(w.write("key_NEW").unwrap(), EnvUpdate::Replaced);

        let content = std::fs::read_to_string(w.path()).unwrap();
        assert_eq!(
            content,
            "alias ll='ls -l'\nexport CURSOR_API_KEY=\"key_NEW\"\nexport EDITOR=vim\n"
        );
        assert_eq!(content.lines().count(), original.lines().count());
    }

    #[test]
    fn test_second_write_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        std::fs::write(w.path(), "export A=1\n").unwrap();

        w.write("key_1").unwrap();
        let first = std::fs::read_to_string(w.path()).unwrap();
        assert_eq!(w.write("key_1").unwrap(), EnvUpdate::Replaced);
        assert_eq!(std::fs::read_to_string(w.path()).unwrap(), first);
    }

    #[test]
    fn test_indented_export_matches() {
        let (out, outcome) = apply_export(
            "  export CURSOR_API_KEY=\"key_OLD\"\n",
            "CURSOR_API_KEY",
            "key_NEW",
            COMMENT,
        );
        assert_eq!(outcome, EnvUpdate::Replaced);
        assert_eq!(out, "export CURSOR_API_KEY=\"key_NEW\"\n");
    }

    #[test]
    fn test_missing_trailing_newline() {
        let (out, outcome) = apply_export("export A=1", "CURSOR_API_KEY", "key_X", COMMENT);
        assert_eq!(outcome, EnvUpdate::Appended);
        assert_eq!(
            out,
            format!("export A=1\n\n{}\nexport CURSOR_API_KEY=\"key_X\"\n", COMMENT)
        );
    }

    #[test]
    fn test_similar_variable_not_matched() {
        let (_, outcome) = apply_export(
            "export CURSOR_API_KEY_BACKUP=\"x\"\n",
            "CURSOR_API_KEY",
            "key_X",
            COMMENT,
        );
        assert_eq!(outcome, EnvUpdate::Appended);
    }

    #[test]
    fn test_missing_file_created() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        assert_eq!(w.write("key_FRESH").unwrap(), EnvUpdate::Appended);
        let content = std::fs::read_to_string(w.path()).unwrap();
        assert_eq!(
            content,
            format!("\n{}\nexport CURSOR_API_KEY=\"key_FRESH\"\n", COMMENT)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_new_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        w.write("key_FRESH").unwrap();
        let mode = std::fs::metadata(w.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_file_mode_kept() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        std::fs::write(w.path(), "export A=1\n").unwrap();
        std::fs::set_permissions(w.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        w.write("key_X").unwrap();
        let mode = std::fs::metadata(w.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_unwritable_path_errors() {
        let dir = TempDir::new().unwrap();
        let w = EnvWriter::new(dir.path().join("missing").join(".zshrc"), "V", COMMENT);
        assert!(w.write("key_X").is_err());
    }
}
