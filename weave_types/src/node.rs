use serde::{Deserialize, Serialize};

/// A data node capable of serving `/chunk2/{offset}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub name: String,
    pub url: String,
}

impl NodeCandidate {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Failover candidates for one range fetch, consumed tail-first so that a
/// randomized or preference-ordered list degrades gracefully under repeated
/// failure. The stack only shrinks.
#[derive(Debug, Clone, Default)]
pub struct NodeStack {
    nodes: Vec<NodeCandidate>,
}

impl NodeStack {
    pub fn new(nodes: Vec<NodeCandidate>) -> Self {
        Self { nodes }
    }

    /// Take the next candidate off the tail. `None` means exhaustion.
    pub fn pop(&mut self) -> Option<NodeCandidate> {
        self.nodes.pop()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl From<Vec<NodeCandidate>> for NodeStack {
    fn from(nodes: Vec<NodeCandidate>) -> Self {
        Self::new(nodes)
    }
}
