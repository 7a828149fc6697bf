use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::CredentialError;

/// One stored secret plus bookkeeping shown by `test-credentials`.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialEntry {
    pub api_key: SecretString,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub description: String,
}

/// Keyed secret store persisted as JSON under the user's home directory
/// with owner-only permissions. Keys are provider identifiers.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    entries: HashMap<String, CredentialEntry>,
}

impl CredentialStore {
    pub fn default_path() -> Result<PathBuf, CredentialError> {
        let home = dirs::home_dir().ok_or(CredentialError::NoHomeDirectory)?;
        Ok(home.join(".agentflow").join("credentials.json"))
    }

    /// Loads the store, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, entries })
    }

    pub fn load_default() -> Result<Self, CredentialError> {
        Self::load(Self::default_path()?)
    }

    pub fn empty() -> Self {
        Self {
            path: PathBuf::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, provider: &str) -> Option<&SecretString> {
        self.entries.get(provider).map(|entry| &entry.api_key)
    }

    pub fn set(
        &mut self,
        provider: impl Into<String>,
        api_key: impl Into<String>,
        description: impl Into<String>,
    ) {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.entries.insert(
            provider.into(),
            CredentialEntry {
                api_key: api_key.into().into(),
                created_at,
                description: description.into(),
            },
        );
    }

    pub fn remove(&mut self, provider: &str) -> bool {
        self.entries.remove(provider).is_some()
    }

    pub fn providers(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Persists the store, creating the directory and restricting the file
    /// to the owner.
    pub fn save(&self) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let document: serde_json::Value = self
            .entries
            .iter()
            .map(|(provider, entry)| {
                (
                    provider.clone(),
                    json!({
                        "api_key": entry.api_key.expose_secret(),
                        "created_at": entry.created_at,
                        "description": entry.description,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>()
            .into();

        std::fs::write(&self.path, serde_json::to_string_pretty(&document)?)?;
        restrict_permissions(&self.path)?;

        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let mut store = CredentialStore::load(&path).unwrap();
        assert!(store.get("openai").is_none());

        store.set("openai", "sk-test", "workstation key");
        store.save().unwrap();

        let reloaded = CredentialStore::load(&path).unwrap();
        assert_eq!(reloaded.get("openai").unwrap().expose_secret(), "sk-test");
        assert_eq!(reloaded.providers(), vec!["openai"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let mut store = CredentialStore::load(&path).unwrap();
        store.set("anthropic", "key", "");
        store.save().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remove() {
        let mut store = CredentialStore::empty();
        store.set("ollama", "unused", "");
        assert!(store.remove("ollama"));
        assert!(!store.remove("ollama"));
    }
}
