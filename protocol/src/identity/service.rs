//! Key custody and key-to-host resolution.
//!
//! Three pieces, from most to least shared:
//!
//! - [`NetworkMap`]: the well-known parties of the network. Shared by every
//!   node, written once when a node joins.
//! - [`IdentityService`]: one per node. Resolves any key the node has heard
//!   of to the host that owns it, falling back to the network map.
//! - [`KeyManager`]: one per node. Holds private keys and signs with them.
//!
//! Pseudonymous keys become resolvable on another node only through a
//! [`KeyOwnershipProof`], in which the key itself signs its binding to a
//! host.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

use super::party::Party;
use crate::crypto::{
    domain_separated_hash, DigitalSignature, KeyError, KeyPair, PublicKey, SecureHash,
    TransactionSignature,
};

const KEY_BINDING_CONTEXT: &str = "accord 2026 key-to-host binding v1";

/// Errors raised while resolving identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no known host for key {0}")]
    UnknownKey(String),

    #[error("no well-known party named {0}")]
    UnknownParty(String),

    /// A key ownership proof did not verify or named the wrong host.
    #[error("invalid ownership proof for key {0}")]
    InvalidProof(String),
}

// ---------------------------------------------------------------------------
// NetworkMap
// ---------------------------------------------------------------------------

/// Well-known parties, addressable by name or legal identity key.
#[derive(Debug, Default)]
pub struct NetworkMap {
    by_name: DashMap<String, Party>,
    by_key: DashMap<PublicKey, Party>,
}

impl NetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, party: Party) {
        self.by_key.insert(party.owning_key, party.clone());
        self.by_name.insert(party.name.clone(), party);
    }

    pub fn party_by_name(&self, name: &str) -> Option<Party> {
        self.by_name.get(name).map(|p| p.value().clone())
    }

    pub fn party_by_key(&self, key: &PublicKey) -> Option<Party> {
        self.by_key.get(key).map(|p| p.value().clone())
    }

    pub fn parties(&self) -> Vec<Party> {
        let mut all: Vec<Party> = self.by_name.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

// ---------------------------------------------------------------------------
// KeyManager
// ---------------------------------------------------------------------------

/// A node's private keys.
#[derive(Debug, Default)]
pub struct KeyManager {
    keys: RwLock<HashMap<PublicKey, KeyPair>>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take custody of an existing keypair (the legal identity key).
    pub fn insert(&self, keypair: KeyPair) -> PublicKey {
        let public = keypair.public_key();
        self.keys.write().insert(public, keypair);
        public
    }

    /// Generate and keep a fresh pseudonymous key.
    pub fn fresh_key(&self) -> PublicKey {
        self.insert(KeyPair::generate())
    }

    pub fn is_mine(&self, key: &PublicKey) -> bool {
        self.keys.read().contains_key(key)
    }

    /// The subset of `keys` this node holds.
    pub fn filter_mine<'a>(&self, keys: impl IntoIterator<Item = &'a PublicKey>) -> BTreeSet<PublicKey> {
        let held = self.keys.read();
        keys.into_iter()
            .filter(|k| held.contains_key(k))
            .copied()
            .collect()
    }

    pub fn sign(&self, key: &PublicKey, tx_id: &SecureHash) -> Result<TransactionSignature, KeyError> {
        let held = self.keys.read();
        let keypair = held
            .get(key)
            .ok_or_else(|| KeyError::UnknownKey(key.short()))?;
        Ok(TransactionSignature::sign(keypair, tx_id))
    }

    /// Sign an arbitrary message, used for ownership proofs.
    fn sign_raw(&self, key: &PublicKey, message: &[u8]) -> Result<DigitalSignature, KeyError> {
        let held = self.keys.read();
        let keypair = held
            .get(key)
            .ok_or_else(|| KeyError::UnknownKey(key.short()))?;
        Ok(keypair.sign(message))
    }
}

// ---------------------------------------------------------------------------
// Key ownership proofs
// ---------------------------------------------------------------------------

/// A statement, signed by `key`, that `host` controls it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOwnershipProof {
    pub key: PublicKey,
    pub host: Party,
    pub signature: DigitalSignature,
}

impl KeyOwnershipProof {
    fn binding(key: &PublicKey, host: &Party) -> [u8; 32] {
        let mut material = Vec::with_capacity(64 + host.name.len());
        material.extend_from_slice(key.as_bytes());
        material.extend_from_slice(host.owning_key.as_bytes());
        material.extend_from_slice(host.name.as_bytes());
        domain_separated_hash(KEY_BINDING_CONTEXT, &material)
    }

    /// Produce a proof for one of `keys`' own keys.
    pub fn create(keys: &KeyManager, key: &PublicKey, host: &Party) -> Result<Self, KeyError> {
        let signature = keys.sign_raw(key, &Self::binding(key, host))?;
        Ok(Self {
            key: *key,
            host: host.clone(),
            signature,
        })
    }

    pub fn verify(&self) -> bool {
        self.key
            .verify(&Self::binding(&self.key, &self.host), &self.signature)
    }
}

// ---------------------------------------------------------------------------
// IdentityService
// ---------------------------------------------------------------------------

/// Resolves keys to the hosts that control them.
#[derive(Debug)]
pub struct IdentityService {
    network_map: std::sync::Arc<NetworkMap>,
    anonymous: DashMap<PublicKey, Party>,
}

impl IdentityService {
    pub fn new(network_map: std::sync::Arc<NetworkMap>) -> Self {
        Self {
            network_map,
            anonymous: DashMap::new(),
        }
    }

    pub fn network_map(&self) -> &NetworkMap {
        &self.network_map
    }

    /// Record that `host` controls `key`. Used for our own fresh keys.
    pub fn register_key(&self, key: PublicKey, host: Party) {
        self.anonymous.insert(key, host);
    }

    /// Accept a mapping learned from a peer, after checking its proof.
    pub fn register_proof(&self, proof: &KeyOwnershipProof) -> Result<(), IdentityError> {
        if !proof.verify() {
            return Err(IdentityError::InvalidProof(proof.key.short()));
        }
        debug!(key = %proof.key.short(), host = %proof.host, "learned key mapping");
        self.anonymous.insert(proof.key, proof.host.clone());
        Ok(())
    }

    pub fn well_known_party_from_key(&self, key: &PublicKey) -> Option<Party> {
        self.network_map
            .party_by_key(key)
            .or_else(|| self.anonymous.get(key).map(|p| p.value().clone()))
    }

    pub fn require_host(&self, key: &PublicKey) -> Result<Party, IdentityError> {
        self.well_known_party_from_key(key)
            .ok_or_else(|| IdentityError::UnknownKey(key.short()))
    }

    pub fn party_by_name(&self, name: &str) -> Result<Party, IdentityError> {
        self.network_map
            .party_by_name(name)
            .ok_or_else(|| IdentityError::UnknownParty(name.to_string()))
    }

    /// Keys from `keys` this node cannot resolve.
    pub fn unknown_keys<'a>(&self, keys: impl IntoIterator<Item = &'a PublicKey>) -> Vec<PublicKey> {
        let mut missing: Vec<PublicKey> = keys
            .into_iter()
            .filter(|k| self.well_known_party_from_key(k).is_none())
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}
