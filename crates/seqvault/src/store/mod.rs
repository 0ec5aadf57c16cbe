pub mod crypto;
pub mod meta;
pub mod object_store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use crypto::{derive_key, key_fingerprint, sha256_hex, CipherAlgorithm, KEY_LEN};
pub use object_store::{proof_digest, ObjectStore};

/// Reference to a stored, encrypted artifact. `content_hash` is the SHA-256
/// of the plaintext; `key_fingerprint` is the SHA-256 of the key material,
/// never the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub content_hash: String,
    pub ciphertext_path: PathBuf,
    pub original_size: u64,
    pub stored_size: u64,
    pub algorithm_tag: String,
    pub key_fingerprint: String,
}

/// Evidence that an artifact was deleted at a specific time. The digest is
/// keyed with a server secret, so a holder can later have the server verify
/// it while nobody else can forge one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionProof {
    pub job_id: Uuid,
    pub artifact_content_hash: String,
    pub deletion_timestamp: DateTime<Utc>,
    pub proof_digest: String,
}

/// Derives the deletion-proof signing secret from the master key.
pub fn deletion_secret(master_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    derive_key(master_key, b"deletion-proof")
}
