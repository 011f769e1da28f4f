//! The local side's identity material.

use std::sync::Arc;

use nodegate_core::{NodeName, WireError};
use nodegate_crypto::{Identity, Modulus};

/// Group, node name and long-term keys of the local gateway.
///
/// `previous` is the key this node held before its last rotation. A peer
/// that still trusts that key asks for a `CONFIRM_OLD` signed with it.
#[derive(Clone)]
pub struct LocalIdentity {
    group: NodeName,
    node: NodeName,
    identity: Arc<dyn Identity>,
    previous: Option<Arc<dyn Identity>>,
}

impl LocalIdentity {
    pub fn new(group: NodeName, node: NodeName, identity: Arc<dyn Identity>) -> Self {
        Self {
            group,
            node,
            identity,
            previous: None,
        }
    }

    /// Build from string names.
    pub fn named(group: &str, node: &str, identity: Arc<dyn Identity>) -> Result<Self, WireError> {
        Ok(Self::new(NodeName::new(group)?, NodeName::new(node)?, identity))
    }

    /// Attach the pre-rotation key.
    pub fn with_previous(mut self, previous: Arc<dyn Identity>) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn group(&self) -> NodeName {
        self.group
    }

    pub fn node(&self) -> NodeName {
        self.node
    }

    pub fn identity(&self) -> &dyn Identity {
        self.identity.as_ref()
    }

    pub fn previous(&self) -> Option<&dyn Identity> {
        self.previous.as_deref()
    }

    pub fn modulus(&self) -> &Modulus {
        self.identity.modulus()
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("group", &self.group)
            .field("node", &self.node)
            .field("modulus", self.modulus())
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}
