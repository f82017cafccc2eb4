//! Configuration sources: where candidate bytes for a domain come from.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::domain::ConfigDomain;
use crate::error::{ConfigError, ConfigResult};

/// Supplies the raw, unparsed content of a configuration domain.
pub trait ConfigSource: Send + Sync {
    fn load_candidate(&self, domain: ConfigDomain) -> ConfigResult<Vec<u8>>;
}

/// Reads `<dir>/<domain>.toml`.
pub struct FileConfigSource {
    dir: PathBuf,
}

impl FileConfigSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, domain: ConfigDomain) -> PathBuf {
        self.dir.join(format!("{}.toml", domain.file_stem()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ConfigSource for FileConfigSource {
    fn load_candidate(&self, domain: ConfigDomain) -> ConfigResult<Vec<u8>> {
        let path = self.path_for(domain);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(?path, %domain, len = bytes.len(), "configuration candidate loaded");
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConfigError::Missing(domain)),
            Err(e) => Err(ConfigError::Unavailable {
                domain,
                reason: format!("{}: {e}", path.display()),
            }),
        }
    }
}

/// In-memory source whose contents can be swapped between refreshes.
#[derive(Default)]
pub struct MemoryConfigSource {
    docs: RwLock<HashMap<ConfigDomain, String>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, domain: ConfigDomain, content: impl Into<String>) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(domain, content.into());
    }
}

impl ConfigSource for MemoryConfigSource {
    fn load_candidate(&self, domain: ConfigDomain) -> ConfigResult<Vec<u8>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(&domain)
            .map(|s| s.clone().into_bytes())
            .ok_or(ConfigError::Missing(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_reads_domain_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("max-priority.toml"), "max_priority = 5\n").unwrap();

        let source = FileConfigSource::new(dir.path());
        let bytes = source.load_candidate(ConfigDomain::MaxPriority).unwrap();
        assert_eq!(bytes, b"max_priority = 5\n");
    }

    #[test]
    fn file_source_missing_domain() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path());
        assert!(matches!(
            source.load_candidate(ConfigDomain::Queues),
            Err(ConfigError::Missing(ConfigDomain::Queues))
        ));
    }

    #[test]
    fn memory_source_set_and_load() {
        let source = MemoryConfigSource::new();
        assert!(source.load_candidate(ConfigDomain::AdminAcl).is_err());
        source.set(ConfigDomain::AdminAcl, "acl = \"*\"");
        assert_eq!(source.load_candidate(ConfigDomain::AdminAcl).unwrap(), b"acl = \"*\"");
    }
}
