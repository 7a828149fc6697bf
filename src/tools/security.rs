use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ToolError;

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Allowlists enforced before any tool touches the filesystem or spawns a
/// process. Empty lists deny everything; the configuration must opt paths
/// and commands in explicitly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub allowed_paths: Vec<PathBuf>,
    pub allowed_commands: Vec<String>,
    pub max_file_size: u64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            allowed_commands: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl SecurityPolicy {
    /// A policy that admits everything under `root`. Used by tests and by
    /// callers that scope an agent to a workspace directory.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            allowed_paths: vec![root.into()],
            ..Self::default()
        }
    }

    pub fn allow_command(mut self, command: impl Into<String>) -> Self {
        self.allowed_commands.push(command.into());
        self
    }

    /// Canonicalizes `path` and requires it to sit under one of the allowed
    /// prefixes. For paths that do not exist yet (writes), the parent is
    /// canonicalized instead so `..` segments cannot escape the allowlist.
    pub fn check_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let resolved = canonicalize_lenient(path)?;

        let allowed = self.allowed_paths.iter().any(|prefix| {
            canonicalize_lenient(prefix)
                .map(|prefix| resolved.starts_with(&prefix))
                .unwrap_or(false)
        });

        if !allowed {
            return Err(ToolError::SecurityDenied(format!(
                "path {} is outside the allowed prefixes",
                path.display()
            )));
        }

        Ok(resolved)
    }

    /// The first token of every shell command must be on the allowlist.
    pub fn check_command(&self, command: &str) -> Result<(), ToolError> {
        let program = command.split_whitespace().next().unwrap_or_default();

        if program.is_empty() {
            return Err(ToolError::SecurityDenied("empty command".to_string()));
        }
        if !self.allowed_commands.iter().any(|c| c == program) {
            return Err(ToolError::SecurityDenied(format!(
                "command '{program}' is not on the allowlist"
            )));
        }

        Ok(())
    }

    pub fn check_file_size(&self, path: &Path, size: u64) -> Result<(), ToolError> {
        if size > self.max_file_size {
            return Err(ToolError::FileTooLarge {
                path: path.display().to_string(),
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }
}

/// Canonicalizes a path that may not exist yet: walks up to the nearest
/// existing ancestor and re-appends the plain-name tail. Tails containing
/// anything but plain names (`..`, roots) are refused.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, ToolError> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }

    let denied = || ToolError::SecurityDenied(format!("cannot resolve path {}", path.display()));

    let mut tail = Vec::new();
    let mut current = path;
    loop {
        let parent = current.parent().filter(|p| !p.as_os_str().is_empty());
        let Some(parent) = parent else {
            return Err(denied());
        };
        tail.push(current.file_name().ok_or_else(denied)?.to_os_string());

        if let Ok(mut resolved) = parent.canonicalize() {
            for segment in tail.iter().rev() {
                resolved.push(segment);
            }
            return Ok(resolved);
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_inside_workspace_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SecurityPolicy::for_workspace(dir.path());

        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        assert!(policy.check_path(&dir.path().join("a.txt")).is_ok());
        // Not-yet-existing file under the workspace is fine too.
        assert!(policy.check_path(&dir.path().join("new.txt")).is_ok());
    }

    #[test]
    fn test_path_outside_workspace_denied() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SecurityPolicy::for_workspace(dir.path());

        let err = policy.check_path(Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, ToolError::SecurityDenied(_)));
    }

    #[test]
    fn test_dotdot_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SecurityPolicy::for_workspace(dir.path());

        let sneaky = dir.path().join("../outside.txt");
        assert!(policy.check_path(&sneaky).is_err());
    }

    #[test]
    fn test_empty_allowlist_denies_all_paths() {
        let policy = SecurityPolicy::default();
        assert!(policy.check_path(Path::new(".")).is_err());
    }

    #[test]
    fn test_command_allowlist() {
        let policy = SecurityPolicy::default().allow_command("echo");

        assert!(policy.check_command("echo hello world").is_ok());
        assert!(matches!(
            policy.check_command("rm -rf /"),
            Err(ToolError::SecurityDenied(_))
        ));
        assert!(policy.check_command("").is_err());
    }

    #[test]
    fn test_file_size_bound() {
        let policy = SecurityPolicy {
            max_file_size: 10,
            ..SecurityPolicy::default()
        };
        assert!(policy.check_file_size(Path::new("x"), 10).is_ok());
        assert!(matches!(
            policy.check_file_size(Path::new("x"), 11),
            Err(ToolError::FileTooLarge { .. })
        ));
    }
}
