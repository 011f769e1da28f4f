//! Fixed-width group and node name fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::WireError;

/// Width of a name field on the wire.
pub const NAME_LEN: usize = 16;

/// A group or node name, zero padded to [`NAME_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeName([u8; NAME_LEN]);

impl NodeName {
    /// Build a name from a string of 1 to [`NAME_LEN`] bytes.
    pub fn new(name: &str) -> Result<Self, WireError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() {
            return Err(WireError::EmptyName);
        }
        if bytes.len() > NAME_LEN {
            return Err(WireError::NameTooLong(bytes.len(), NAME_LEN));
        }

        let mut field = [0u8; NAME_LEN];
        field[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(field))
    }

    /// Wrap a raw wire field.
    pub fn from_field(field: [u8; NAME_LEN]) -> Self {
        Self(field)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeName({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_displays() {
        let name = NodeName::new("node-a").unwrap();
        assert_eq!(&name.as_bytes()[..6], b"node-a");
        assert!(name.as_bytes()[6..].iter().all(|b| *b == 0));
        assert_eq!(name.to_string(), "node-a");
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(NodeName::new(""), Err(WireError::EmptyName));
        assert_eq!(
            NodeName::new("seventeen-bytes!!"),
            Err(WireError::NameTooLong(17, NAME_LEN))
        );
        assert!(NodeName::new("exactly-16-bytes").is_ok());
    }
}
