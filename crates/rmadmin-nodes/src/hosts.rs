//! Include/exclude host lists that drive decommissioning.
//!
//! Host files hold one entry per line (commas and spaces also separate
//! entries); `#` starts a comment. An entry without a port matches the
//! host on any port.

use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use rmadmin_state::NodeId;

use crate::error::{NodeError, NodeResult};

/// The node lists in effect after a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostLists {
    pub include: Vec<NodeId>,
    pub exclude: Vec<NodeId>,
}

impl HostLists {
    /// Excluded when listed in `exclude`, or when an include list exists and omits it.
    pub fn is_excluded(&self, node: &NodeId) -> bool {
        if self.exclude.iter().any(|e| node.matches(e)) {
            return true;
        }
        !self.include.is_empty() && !self.include.iter().any(|e| node.matches(e))
    }
}

/// Supplies the current include/exclude lists.
pub trait NodeListSource: Send + Sync {
    fn load(&self) -> NodeResult<HostLists>;
}

/// Parse a host file body.
pub fn parse_host_list(text: &str) -> NodeResult<Vec<NodeId>> {
    let mut nodes = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        for entry in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if entry.is_empty() {
                continue;
            }
            let node = entry
                .parse::<NodeId>()
                .map_err(|e| NodeError::InvalidHosts(e.to_string()))?;
            nodes.push(node);
        }
    }
    Ok(nodes)
}

/// Reads include/exclude lists from files; an unset path means an empty list.
pub struct FileNodeListSource {
    include: Option<PathBuf>,
    exclude: Option<PathBuf>,
}

impl FileNodeListSource {
    pub fn new(include: Option<PathBuf>, exclude: Option<PathBuf>) -> Self {
        Self { include, exclude }
    }

    fn read(path: &Option<PathBuf>) -> NodeResult<Vec<NodeId>> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| NodeError::HostsUnavailable(format!("{}: {e}", path.display())))?;
                parse_host_list(&text)
            }
            None => Ok(Vec::new()),
        }
    }
}

impl NodeListSource for FileNodeListSource {
    fn load(&self) -> NodeResult<HostLists> {
        let lists = HostLists {
            include: Self::read(&self.include)?,
            exclude: Self::read(&self.exclude)?,
        };
        debug!(
            include = lists.include.len(),
            exclude = lists.exclude.len(),
            "host lists loaded"
        );
        Ok(lists)
    }
}

/// Host lists held in memory and replaced by the caller.
#[derive(Default)]
pub struct StaticNodeListSource {
    lists: RwLock<HostLists>,
}

impl StaticNodeListSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, lists: HostLists) {
        *self.lists.write().unwrap_or_else(|e| e.into_inner()) = lists;
    }

    pub fn exclude(&self, nodes: Vec<NodeId>) {
        self.set(HostLists {
            include: Vec::new(),
            exclude: nodes,
        });
    }
}

impl NodeListSource for StaticNodeListSource {
    fn load(&self) -> NodeResult<HostLists> {
        Ok(self.lists.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_comments_and_separators() {
        let nodes = parse_host_list("# decommission list\nh1:8041, h2\n\n h3:9000 # spare\n").unwrap();
        assert_eq!(
            nodes,
            vec![NodeId::new("h1", 8041), NodeId::new("h2", 0), NodeId::new("h3", 9000)]
        );
    }

    #[test]
    fn parse_rejects_bad_port() {
        assert!(matches!(parse_host_list("h1:abc"), Err(NodeError::InvalidHosts(_))));
    }

    #[test]
    fn exclusion_rules() {
        let lists = HostLists {
            include: vec![NodeId::new("h1", 0), NodeId::new("h2", 0)],
            exclude: vec![NodeId::new("h2", 8041)],
        };
        assert!(!lists.is_excluded(&NodeId::new("h1", 8041)));
        assert!(lists.is_excluded(&NodeId::new("h2", 8041)));
        assert!(!lists.is_excluded(&NodeId::new("h2", 9000)));
        assert!(lists.is_excluded(&NodeId::new("h3", 8041)));
    }

    #[test]
    fn empty_lists_exclude_nothing() {
        assert!(!HostLists::default().is_excluded(&NodeId::new("h1", 1)));
    }

    #[test]
    fn file_source_reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let exclude = dir.path().join("exclude");
        std::fs::write(&exclude, "h1:8041\n").unwrap();

        let source = FileNodeListSource::new(None, Some(exclude));
        let lists = source.load().unwrap();
        assert!(lists.include.is_empty());
        assert_eq!(lists.exclude, vec![NodeId::new("h1", 8041)]);
    }

    #[test]
    fn file_source_missing_file_is_unavailable() {
        let source = FileNodeListSource::new(Some("/nonexistent/include".into()), None);
        assert!(matches!(source.load(), Err(NodeError::HostsUnavailable(_))));
    }
}
