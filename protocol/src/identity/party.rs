//! Who is on the other side of a record or a session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::PublicKey;

/// A well-known participant: a stable name bound to its legal identity key.
///
/// Only a `Party` can be resolved to a network host. Sessions are always
/// opened with a `Party`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }

    /// Strip the name, keeping only the key.
    pub fn anonymise(&self) -> AbstractParty {
        AbstractParty::new(self.owning_key)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Party({}, {})", self.name, self.owning_key.short())
    }
}

/// A holder known only by its key.
///
/// Records name their holders this way. The key may be a host's legal
/// identity key or a fresh pseudonymous key that only the host (and
/// whoever it chose to tell) can link back to it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbstractParty {
    pub owning_key: PublicKey,
}

impl AbstractParty {
    pub fn new(owning_key: PublicKey) -> Self {
        Self { owning_key }
    }
}

impl From<&Party> for AbstractParty {
    fn from(party: &Party) -> Self {
        party.anonymise()
    }
}

impl From<PublicKey> for AbstractParty {
    fn from(owning_key: PublicKey) -> Self {
        Self { owning_key }
    }
}

impl fmt::Display for AbstractParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anonymous({})", self.owning_key.short())
    }
}

impl fmt::Debug for AbstractParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
