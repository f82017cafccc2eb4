//! Label and attribute store.
//!
//! Owns the cluster label vocabulary, the node → labels mapping, and the
//! node → attributes mapping. Every per-node change is validated in full
//! before it commits, so a rejected request leaves the node as it was.
//! Nodes are stored in sharded maps: edits to different nodes do not
//! contend.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock, RwLock};

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rmadmin_state::NodeId;

use crate::error::{NodeError, NodeResult};
use crate::registry::NodeRegistry;

static LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z][0-9a-zA-Z_\-]*$").expect("static regex"));

static ATTRIBUTE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-zA-Z][0-9a-zA-Z_\-.]*$").expect("static regex"));

const MAX_NAME_LEN: usize = 255;

/// Prefix for attributes set through the admin interface.
pub const CENTRALIZED_PREFIX: &str = "rm.yarn.io";

/// A label in the cluster vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabel {
    pub name: String,
    /// Exclusive labels only admit work that asks for them.
    #[serde(default = "exclusive_by_default")]
    pub exclusive: bool,
}

fn exclusive_by_default() -> bool {
    true
}

impl NodeLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclusive: true,
        }
    }
}

/// How `map_attributes` combines requested attributes with existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMappingMode {
    Replace,
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    #[default]
    String,
}

/// Attributes are keyed by `(prefix, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeKey {
    pub prefix: String,
    pub name: String,
}

/// A typed attribute on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttribute {
    #[serde(default = "centralized_prefix")]
    pub prefix: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub value: String,
}

fn centralized_prefix() -> String {
    CENTRALIZED_PREFIX.to_string()
}

impl NodeAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prefix: centralized_prefix(),
            name: name.into(),
            attribute_type: AttributeType::String,
            value: value.into(),
        }
    }

    pub fn key(&self) -> AttributeKey {
        AttributeKey {
            prefix: self.prefix.clone(),
            name: self.name.clone(),
        }
    }
}

/// Check a label (or attribute) name against the naming grammar.
pub fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{kind} name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("{kind} name {name:?} longer than {MAX_NAME_LEN}"));
    }
    if !LABEL_NAME.is_match(name) {
        return Err(format!("{kind} name {name:?} has illegal characters"));
    }
    Ok(())
}

fn validate_attribute(attr: &NodeAttribute) -> Result<(), String> {
    validate_name("attribute", &attr.name)?;
    if !ATTRIBUTE_PREFIX.is_match(&attr.prefix) {
        return Err(format!("attribute prefix {:?} is malformed", attr.prefix));
    }
    Ok(())
}

type AttributeMap = BTreeMap<AttributeKey, (AttributeType, String)>;

/// Cluster label vocabulary plus per-node label and attribute assignments.
pub struct LabelStore {
    registry: Arc<dyn NodeRegistry>,
    vocabulary: RwLock<BTreeMap<String, NodeLabel>>,
    node_labels: DashMap<NodeId, BTreeSet<String>>,
    node_attributes: DashMap<NodeId, AttributeMap>,
}

impl LabelStore {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            vocabulary: RwLock::new(BTreeMap::new()),
            node_labels: DashMap::new(),
            node_attributes: DashMap::new(),
        }
    }

    // ── Vocabulary ─────────────────────────────────────────────────

    /// Add labels to the vocabulary. All names are checked before any is added.
    pub fn add_labels(&self, labels: &[NodeLabel]) -> NodeResult<()> {
        for label in labels {
            validate_name("label", &label.name).map_err(NodeError::InvalidLabel)?;
        }
        let mut vocab = self.vocabulary.write().unwrap_or_else(|e| e.into_inner());
        for label in labels {
            vocab.insert(label.name.clone(), label.clone());
        }
        info!(count = labels.len(), total = vocab.len(), "labels added to vocabulary");
        Ok(())
    }

    /// Remove labels from the vocabulary. Existing node assignments are kept.
    pub fn remove_labels(&self, names: &[String]) -> NodeResult<()> {
        for name in names {
            validate_name("label", name).map_err(NodeError::InvalidLabel)?;
        }
        let mut vocab = self.vocabulary.write().unwrap_or_else(|e| e.into_inner());
        for name in names {
            if vocab.remove(name).is_none() {
                debug!(label = %name, "label not in vocabulary, nothing to remove");
            }
        }
        info!(count = names.len(), total = vocab.len(), "labels removed from vocabulary");
        Ok(())
    }

    pub fn vocabulary(&self) -> Vec<NodeLabel> {
        let vocab = self.vocabulary.read().unwrap_or_else(|e| e.into_inner());
        vocab.values().cloned().collect()
    }

    // ── Node labels ────────────────────────────────────────────────

    /// Replace each node's label set wholesale.
    ///
    /// Nodes are handled independently; the outcome list follows the
    /// request order. Without `fail_on_unknown_nodes`, labels may be
    /// assigned to nodes that have not registered yet; they take effect
    /// when the node registers and are held until then. Replacing with
    /// an empty set drops the node's entry, which is how such
    /// assignments are withdrawn.
    pub fn replace_node_labels(
        &self,
        requests: Vec<(NodeId, BTreeSet<String>)>,
        fail_on_unknown_nodes: bool,
    ) -> Vec<(NodeId, NodeResult<()>)> {
        requests
            .into_iter()
            .map(|(node, labels)| {
                let result = self.replace_one(&node, labels, fail_on_unknown_nodes);
                if let Err(e) = &result {
                    warn!(%node, error = %e, "label replacement rejected");
                }
                (node, result)
            })
            .collect()
    }

    fn replace_one(&self, node: &NodeId, labels: BTreeSet<String>, fail_on_unknown: bool) -> NodeResult<()> {
        if fail_on_unknown && !self.registry.is_known(node) {
            return Err(NodeError::UnknownNode(node.clone()));
        }
        // Hold the vocabulary read lock through the commit so a concurrent
        // removal cannot slip between the check and the assignment.
        let vocab = self.vocabulary.read().unwrap_or_else(|e| e.into_inner());
        if let Some(missing) = labels.iter().find(|l| !vocab.contains_key(l.as_str())) {
            return Err(NodeError::LabelNotFound {
                node: node.clone(),
                label: missing.clone(),
            });
        }
        debug!(%node, labels = ?labels, "node labels replaced");
        if labels.is_empty() {
            self.node_labels.remove(node);
        } else {
            self.node_labels.insert(node.clone(), labels);
        }
        Ok(())
    }

    pub fn labels_of(&self, node: &NodeId) -> BTreeSet<String> {
        self.node_labels.get(node).map(|l| l.clone()).unwrap_or_default()
    }

    pub fn nodes_with_label(&self, label: &str) -> BTreeSet<NodeId> {
        self.node_labels
            .iter()
            .filter(|e| e.value().contains(label))
            .map(|e| e.key().clone())
            .collect()
    }

    // ── Node attributes ────────────────────────────────────────────

    /// Apply attribute mappings per node under the given mode.
    pub fn map_attributes(
        &self,
        requests: Vec<(NodeId, Vec<NodeAttribute>)>,
        mode: AttributeMappingMode,
    ) -> Vec<(NodeId, NodeResult<()>)> {
        requests
            .into_iter()
            .map(|(node, attributes)| {
                let result = self.map_one(&node, attributes, mode);
                if let Err(e) = &result {
                    warn!(%node, error = %e, ?mode, "attribute mapping rejected");
                }
                (node, result)
            })
            .collect()
    }

    fn map_one(&self, node: &NodeId, attributes: Vec<NodeAttribute>, mode: AttributeMappingMode) -> NodeResult<()> {
        if !self.registry.is_known(node) {
            return Err(NodeError::UnknownNode(node.clone()));
        }
        let mut requested = AttributeMap::new();
        for attr in attributes {
            validate_attribute(&attr).map_err(NodeError::InvalidAttribute)?;
            let key = attr.key();
            if requested.insert(key, (attr.attribute_type, attr.value)).is_some() {
                return Err(NodeError::InvalidAttribute(format!(
                    "attribute {}/{} listed twice for node {node}",
                    attr.prefix, attr.name
                )));
            }
        }

        let mut entry = self.node_attributes.entry(node.clone()).or_default();
        match mode {
            AttributeMappingMode::Replace => *entry = requested,
            AttributeMappingMode::Add => entry.extend(requested),
            AttributeMappingMode::Remove => entry.retain(|k, _| !requested.contains_key(k)),
        }
        debug!(%node, ?mode, count = entry.len(), "node attributes mapped");
        Ok(())
    }

    pub fn attributes_of(&self, node: &NodeId) -> Vec<NodeAttribute> {
        self.node_attributes
            .get(node)
            .map(|attrs| {
                attrs
                    .iter()
                    .map(|(k, (t, v))| NodeAttribute {
                        prefix: k.prefix.clone(),
                        name: k.name.clone(),
                        attribute_type: *t,
                        value: v.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop everything held for a node that left the cluster for good.
    pub fn forget_node(&self, node: &NodeId) {
        let had_labels = self.node_labels.remove(node).is_some();
        let had_attributes = self.node_attributes.remove(node).is_some();
        if had_labels || had_attributes {
            debug!(%node, "label and attribute state dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryNodeRegistry;

    fn node(host: &str) -> NodeId {
        NodeId::new(host, 8041)
    }

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    fn store_with(nodes: &[&str], vocab: &[&str]) -> LabelStore {
        let registry = Arc::new(InMemoryNodeRegistry::new());
        for n in nodes {
            registry.register(node(n));
        }
        let store = LabelStore::new(registry);
        let labels: Vec<NodeLabel> = vocab.iter().map(|l| NodeLabel::new(*l)).collect();
        store.add_labels(&labels).unwrap();
        store
    }

    #[test]
    fn add_labels_rejects_malformed_without_partial_effect() {
        let store = store_with(&[], &[]);
        let err = store
            .add_labels(&[NodeLabel::new("gpu"), NodeLabel::new("bad label")])
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidLabel(_)));
        assert!(store.vocabulary().is_empty());
    }

    #[test]
    fn remove_empty_label_is_invalid() {
        let store = store_with(&[], &["gpu"]);
        assert!(matches!(
            store.remove_labels(&["".to_string()]),
            Err(NodeError::InvalidLabel(_))
        ));
        assert_eq!(store.vocabulary().len(), 1);
    }

    #[test]
    fn replace_then_conflict_keeps_previous_labels() {
        let store = store_with(&["a"], &["gpu", "ssd"]);

        let results = store.replace_node_labels(vec![(node("a"), set(&["gpu"]))], false);
        assert!(results[0].1.is_ok());
        assert_eq!(store.labels_of(&node("a")), set(&["gpu"]));

        let results = store.replace_node_labels(vec![(node("a"), set(&["gpu", "fast"]))], false);
        match &results[0].1 {
            Err(NodeError::LabelNotFound { label, .. }) => assert_eq!(label, "fast"),
            other => panic!("expected LabelNotFound, got {other:?}"),
        }
        assert_eq!(store.labels_of(&node("a")), set(&["gpu"]));
    }

    #[test]
    fn nodes_are_processed_independently() {
        let store = store_with(&["a", "b"], &["gpu"]);
        let results = store.replace_node_labels(
            vec![(node("a"), set(&["missing"])), (node("b"), set(&["gpu"]))],
            false,
        );
        assert_eq!(results[0].0, node("a"));
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());
        assert_eq!(store.labels_of(&node("b")), set(&["gpu"]));
    }

    #[test]
    fn fail_on_unknown_nodes() {
        let store = store_with(&["a"], &["gpu"]);
        let results = store.replace_node_labels(vec![(node("ghost"), set(&["gpu"]))], true);
        assert!(matches!(results[0].1, Err(NodeError::UnknownNode(_))));

        let results = store.replace_node_labels(vec![(node("ghost"), set(&["gpu"]))], false);
        assert!(results[0].1.is_ok());
    }

    #[test]
    fn removing_vocabulary_label_does_not_cascade() {
        let store = store_with(&["a"], &["gpu", "ssd"]);
        store.replace_node_labels(vec![(node("a"), set(&["gpu"]))], false);

        store.remove_labels(&["gpu".to_string()]).unwrap();
        assert_eq!(store.labels_of(&node("a")), set(&["gpu"]));
        assert_eq!(store.nodes_with_label("gpu"), BTreeSet::from([node("a")]));

        // New assignments of the removed label fail.
        let results = store.replace_node_labels(vec![(node("a"), set(&["gpu"]))], false);
        assert!(results[0].1.is_err());
    }

    #[test]
    fn replace_with_empty_set_clears_labels() {
        let store = store_with(&["a"], &["gpu"]);
        store.replace_node_labels(vec![(node("a"), set(&["gpu"]))], false);
        store.replace_node_labels(vec![(node("a"), BTreeSet::new())], false);
        assert!(store.labels_of(&node("a")).is_empty());
        assert!(!store.node_labels.contains_key(&node("a")));
    }

    #[test]
    fn labels_for_unregistered_node_apply_on_registration_and_can_be_withdrawn() {
        let registry = Arc::new(InMemoryNodeRegistry::new());
        let store = LabelStore::new(registry.clone());
        store.add_labels(&[NodeLabel::new("gpu")]).unwrap();

        let results = store.replace_node_labels(vec![(node("later"), set(&["gpu"]))], false);
        assert!(results[0].1.is_ok());
        registry.register(node("later"));
        assert_eq!(store.labels_of(&node("later")), set(&["gpu"]));

        store.replace_node_labels(vec![(node("never"), set(&["gpu"]))], false);
        store.replace_node_labels(vec![(node("never"), BTreeSet::new())], false);
        assert!(!store.node_labels.contains_key(&node("never")));
        assert_eq!(store.nodes_with_label("gpu"), BTreeSet::from([node("later")]));
    }

    #[test]
    fn attribute_modes() {
        let store = store_with(&["a"], &[]);
        let a = node("a");

        store.map_attributes(
            vec![(a.clone(), vec![NodeAttribute::new("os", "linux"), NodeAttribute::new("arch", "x86")])],
            AttributeMappingMode::Replace,
        );
        assert_eq!(store.attributes_of(&a).len(), 2);

        store.map_attributes(
            vec![(a.clone(), vec![NodeAttribute::new("arch", "arm64"), NodeAttribute::new("rack", "r1")])],
            AttributeMappingMode::Add,
        );
        let attrs = store.attributes_of(&a);
        assert_eq!(attrs.len(), 3);
        assert!(attrs.iter().any(|x| x.name == "arch" && x.value == "arm64"));
        assert!(attrs.iter().any(|x| x.name == "os" && x.value == "linux"));

        store.map_attributes(
            vec![(a.clone(), vec![NodeAttribute::new("os", "")])],
            AttributeMappingMode::Remove,
        );
        let names: Vec<String> = store.attributes_of(&a).into_iter().map(|x| x.name).collect();
        assert_eq!(names, vec!["arch", "rack"]);

        store.map_attributes(
            vec![(a.clone(), vec![NodeAttribute::new("gpu", "a100")])],
            AttributeMappingMode::Replace,
        );
        let names: Vec<String> = store.attributes_of(&a).into_iter().map(|x| x.name).collect();
        assert_eq!(names, vec!["gpu"]);
    }

    #[test]
    fn attributes_with_same_name_and_different_prefix_coexist() {
        let store = store_with(&["a"], &[]);
        let mut nm = NodeAttribute::new("hostname", "a1");
        nm.prefix = "nm.yarn.io".to_string();
        store.map_attributes(
            vec![(node("a"), vec![NodeAttribute::new("hostname", "a2"), nm])],
            AttributeMappingMode::Add,
        );
        assert_eq!(store.attributes_of(&node("a")).len(), 2);
    }

    #[test]
    fn invalid_attribute_rejects_whole_node() {
        let store = store_with(&["a"], &[]);
        store.map_attributes(
            vec![(node("a"), vec![NodeAttribute::new("os", "linux")])],
            AttributeMappingMode::Replace,
        );

        let results = store.map_attributes(
            vec![(node("a"), vec![NodeAttribute::new("arch", "x86"), NodeAttribute::new("bad name", "x")])],
            AttributeMappingMode::Replace,
        );
        assert!(matches!(results[0].1, Err(NodeError::InvalidAttribute(_))));
        let names: Vec<String> = store.attributes_of(&node("a")).into_iter().map(|x| x.name).collect();
        assert_eq!(names, vec!["os"]);
    }

    #[test]
    fn attributes_require_known_node() {
        let store = store_with(&[], &[]);
        let results = store.map_attributes(
            vec![(node("ghost"), vec![NodeAttribute::new("os", "linux")])],
            AttributeMappingMode::Add,
        );
        assert!(matches!(results[0].1, Err(NodeError::UnknownNode(_))));
    }

    #[test]
    fn forget_node_drops_state() {
        let store = store_with(&["a"], &["gpu"]);
        store.replace_node_labels(vec![(node("a"), set(&["gpu"]))], false);
        store.forget_node(&node("a"));
        assert!(store.labels_of(&node("a")).is_empty());
    }

    #[test]
    fn attribute_json_defaults() {
        let attr: NodeAttribute = serde_json::from_str(r#"{"name":"os","value":"linux"}"#).unwrap();
        assert_eq!(attr.prefix, CENTRALIZED_PREFIX);
        assert_eq!(attr.attribute_type, AttributeType::String);
    }
}
