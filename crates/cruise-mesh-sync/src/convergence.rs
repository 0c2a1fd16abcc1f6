//! Convergence verification for the sync protocol.
//!
//! Two replicas have converged when they hold the same id set. Comparing
//! digests is cheap; comparing the sets themselves tells you what is missing
//! on which side.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use cruise_mesh_core::MessageId;
use cruise_mesh_store::MessageStore;

use crate::error::Result;

const DIGEST_DOMAIN: &[u8] = b"cruise-mesh-state-v0:";

/// Blake3 digest of a replica's id set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest(pub [u8; 32]);

impl StateDigest {
    /// Hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest an id set. Order-independent.
///
/// Ids are hashed in sorted order, each prefixed by its byte length.
pub fn digest_ids<'a>(ids: impl IntoIterator<Item = &'a MessageId>) -> StateDigest {
    let sorted: BTreeSet<&MessageId> = ids.into_iter().collect();

    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    for id in sorted {
        let bytes = id.as_str().as_bytes();
        hasher.update(&(bytes.len() as u32).to_le_bytes());
        hasher.update(bytes);
    }

    StateDigest(*hasher.finalize().as_bytes())
}

/// Digest everything a store holds.
pub async fn compute_state_digest<S: MessageStore + ?Sized>(store: &S) -> Result<StateDigest> {
    let ids = store.all_ids().await?;
    Ok(digest_ids(&ids))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas hold the same ids.
    Converged,
    /// The replicas differ.
    Diverged {
        /// Ids only the local replica holds.
        local_only: BTreeSet<MessageId>,
        /// Ids only the remote replica holds.
        remote_only: BTreeSet<MessageId>,
    },
}

impl ConvergenceResult {
    /// Check if the replicas have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two id sets.
pub fn compare(local: &HashSet<MessageId>, remote: &HashSet<MessageId>) -> ConvergenceResult {
    let local_only: BTreeSet<MessageId> = local.difference(remote).cloned().collect();
    let remote_only: BTreeSet<MessageId> = remote.difference(local).cloned().collect();

    if local_only.is_empty() && remote_only.is_empty() {
        ConvergenceResult::Converged
    } else {
        ConvergenceResult::Diverged {
            local_only,
            remote_only,
        }
    }
}

/// Verify a local store against a remote replica's id set.
pub async fn verify_convergence<S: MessageStore + ?Sized>(
    local: &S,
    remote_ids: &HashSet<MessageId>,
) -> Result<ConvergenceResult> {
    let local_ids = local.all_ids().await?;
    Ok(compare(&local_ids, remote_ids))
}
