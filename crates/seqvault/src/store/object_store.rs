//! Content-addressed encrypted blob store with deletion proofs.
//!
//! Ciphertext lands under `blobs/<hh>/<rest-of-hash>` via a temporary
//! sibling and an atomic rename, so concurrent writers of the same content
//! both succeed and a crash never leaves a partially visible blob.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{Event, EventBus};
use crate::sanitize::short_hash;

use super::crypto::{
    hex_encode, key_fingerprint, sha256_hex, CipherAlgorithm, CryptoError, KEY_LEN,
};
use super::meta::{ArtifactRow, DeletionRow, MetaStore};
use super::{ArtifactRef, DeletionProof};

/// Ciphertext write granularity; the interrupt guard is polled between
/// chunks so cancellation never starts a new I/O batch.
const WRITE_CHUNK: usize = 256 * 1024;

pub struct ObjectStore {
    blobs_dir: PathBuf,
    meta: MetaStore,
    algorithm: CipherAlgorithm,
    secret: [u8; KEY_LEN],
    events: EventBus,
}

impl ObjectStore {
    /// Opens (creating as needed) the store rooted at `data_dir`. The
    /// `secret` keys deletion proofs and never leaves this struct.
    pub fn open(
        data_dir: &Path,
        algorithm: CipherAlgorithm,
        secret: [u8; KEY_LEN],
        events: EventBus,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Write {
            path: data_dir.to_path_buf(),
            source: e,
        })?;
        let blobs_dir = data_dir.join("blobs");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| StoreError::Write {
            path: blobs_dir.clone(),
            source: e,
        })?;
        let meta = MetaStore::open(&data_dir.join("meta.db"))?;

        Ok(Self {
            blobs_dir,
            meta,
            algorithm,
            secret,
            events,
        })
    }

    /// Encrypts and stores `plaintext`, returning the artifact reference.
    ///
    /// `abort` is polled before each write batch and before the metadata
    /// insert; when it returns true the partial file is removed and the put
    /// fails with `Interrupted`.
    pub fn put(
        &self,
        job_id: Uuid,
        plaintext: &[u8],
        key: &[u8; KEY_LEN],
        abort: &dyn Fn() -> bool,
    ) -> Result<ArtifactRef, StoreError> {
        let content_hash = sha256_hex(plaintext);
        let shard_dir = self.blobs_dir.join(&content_hash[..2]);
        std::fs::create_dir_all(&shard_dir).map_err(|e| StoreError::Write {
            path: shard_dir.clone(),
            source: e,
        })?;
        let final_path = shard_dir.join(&content_hash[2..]);

        let sealed = self
            .algorithm
            .seal(key, plaintext)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        self.write_atomic(&shard_dir, &final_path, &sealed, abort)?;

        if abort() {
            self.remove_unreferenced(&content_hash, &final_path);
            return Err(StoreError::Interrupted);
        }

        let row = ArtifactRow {
            job_id,
            content_hash: content_hash.clone(),
            ciphertext_path: final_path.to_string_lossy().into_owned(),
            algorithm_tag: self.algorithm.tag().to_string(),
            key_fingerprint: key_fingerprint(key),
            original_size: plaintext.len() as u64,
            stored_size: sealed.len() as u64,
            created_at_ms: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.meta.insert_artifact(&row) {
            error!("Metadata insert failed for {}: {e}", short_hash(&content_hash));
            self.remove_unreferenced(&content_hash, &final_path);
            return Err(e);
        }

        debug!(
            "Stored artifact {} ({} -> {} bytes, {})",
            short_hash(&content_hash),
            plaintext.len(),
            sealed.len(),
            self.algorithm.tag()
        );
        self.events.emit(Event::ArtifactWritten {
            job_id,
            size: sealed.len() as u64,
        });

        Ok(ArtifactRef {
            content_hash,
            ciphertext_path: final_path,
            original_size: plaintext.len() as u64,
            stored_size: sealed.len() as u64,
            algorithm_tag: self.algorithm.tag().to_string(),
            key_fingerprint: row.key_fingerprint,
        })
    }

    /// Unlinks a just-written blob unless some other job's metadata still
    /// points at the same content.
    fn remove_unreferenced(&self, content_hash: &str, path: &Path) {
        match self.meta.hash_still_referenced(content_hash) {
            Ok(false) => {
                let _ = std::fs::remove_file(path);
            }
            Ok(true) => {}
            Err(e) => warn!("Could not check references for {}: {e}", short_hash(content_hash)),
        }
    }

    fn write_atomic(
        &self,
        shard_dir: &Path,
        final_path: &Path,
        sealed: &[u8],
        abort: &dyn Fn() -> bool,
    ) -> Result<(), StoreError> {
        let tmp_path = shard_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = (|| {
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp_path).map_err(|e| StoreError::Write {
                path: tmp_path.clone(),
                source: e,
            })?;

            for chunk in sealed.chunks(WRITE_CHUNK) {
                if abort() {
                    return Err(StoreError::Interrupted);
                }
                file.write_all(chunk).map_err(|e| StoreError::Write {
                    path: tmp_path.clone(),
                    source: e,
                })?;
            }
            file.sync_all().map_err(|e| StoreError::Write {
                path: tmp_path.clone(),
                source: e,
            })?;
            drop(file);

            std::fs::rename(&tmp_path, final_path).map_err(|e| StoreError::Write {
                path: final_path.to_path_buf(),
                source: e,
            })
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    /// Reads and decrypts an artifact. Integrity is always verified; the
    /// store never trusts its own disk.
    pub fn get(&self, content_hash: &str, key: &[u8; KEY_LEN]) -> Result<Vec<u8>, StoreError> {
        let row = self
            .meta
            .artifact_by_hash(content_hash)?
            .ok_or_else(|| StoreError::NotFound(content_hash.to_string()))?;

        if key_fingerprint(key) != row.key_fingerprint {
            warn!("Key fingerprint mismatch for {}", short_hash(content_hash));
            self.events.emit(Event::IntegrityFailure {
                content_hash: content_hash.to_string(),
            });
            return Err(StoreError::Integrity(content_hash.to_string()));
        }

        let algorithm = CipherAlgorithm::from_tag(&row.algorithm_tag)
            .ok_or_else(|| StoreError::Crypto(format!("unknown algorithm {}", row.algorithm_tag)))?;

        let path = PathBuf::from(&row.ciphertext_path);
        let sealed = std::fs::read(&path).map_err(|e| StoreError::Read { path, source: e })?;

        match algorithm.open(key, &sealed) {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::Integrity) | Err(CryptoError::Malformed) => {
                warn!("Integrity failure reading {}", short_hash(content_hash));
                self.events.emit(Event::IntegrityFailure {
                    content_hash: content_hash.to_string(),
                });
                Err(StoreError::Integrity(content_hash.to_string()))
            }
            Err(e) => Err(StoreError::Crypto(e.to_string())),
        }
    }

    /// Removes ciphertext and metadata, recording a keyed deletion proof.
    /// Calling again returns the already-logged proof with the same
    /// timestamp.
    pub fn delete(
        &self,
        job_id: Uuid,
        artifact: &ArtifactRef,
    ) -> Result<DeletionProof, StoreError> {
        if let Some(existing) = self.meta.deletion_by_job(job_id)? {
            return Ok(proof_from_row(&existing));
        }

        // Another job may still reference the same bytes; only unlink the
        // ciphertext once this row is the last reference.
        self.meta.remove_artifact(job_id)?;
        if !self.meta.hash_still_referenced(&artifact.content_hash)? {
            match std::fs::remove_file(&artifact.ciphertext_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Write {
                        path: artifact.ciphertext_path.clone(),
                        source: e,
                    });
                }
            }
        }

        let deletion_ts_ms = Utc::now().timestamp_millis();
        let digest = proof_digest(job_id, &artifact.content_hash, deletion_ts_ms, &self.secret);
        let row = DeletionRow {
            job_id,
            content_hash: artifact.content_hash.clone(),
            deletion_ts_ms,
            proof_digest: digest,
        };
        self.meta.insert_deletion(&row)?;

        info!(
            "Deleted artifact {} for job {job_id}",
            short_hash(&artifact.content_hash)
        );
        self.events.emit(Event::ArtifactDeleted { job_id });

        Ok(proof_from_row(&row))
    }

    /// The deletion proof for a job, or `NotFound` when no deletion has
    /// occurred.
    pub fn proof(&self, job_id: Uuid) -> Result<DeletionProof, StoreError> {
        let row = self
            .meta
            .deletion_by_job(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        Ok(proof_from_row(&row))
    }

    pub fn artifact_for_job(&self, job_id: Uuid) -> Result<Option<ArtifactRef>, StoreError> {
        Ok(self.meta.artifact_by_job(job_id)?.map(|row| ArtifactRef {
            content_hash: row.content_hash,
            ciphertext_path: PathBuf::from(row.ciphertext_path),
            original_size: row.original_size,
            stored_size: row.stored_size,
            algorithm_tag: row.algorithm_tag,
            key_fingerprint: row.key_fingerprint,
        }))
    }
}

fn proof_from_row(row: &DeletionRow) -> DeletionProof {
    DeletionProof {
        job_id: row.job_id,
        artifact_content_hash: row.content_hash.clone(),
        deletion_timestamp: DateTime::from_timestamp_millis(row.deletion_ts_ms)
            .unwrap_or_else(Utc::now),
        proof_digest: row.proof_digest.clone(),
    }
}

/// SHA256(job_id ‖ content_hash ‖ deletion_ts_ms ‖ server_secret), hex.
/// The timestamp enters as its decimal millisecond rendering.
pub fn proof_digest(
    job_id: Uuid,
    content_hash: &str,
    deletion_ts_ms: i64,
    secret: &[u8; KEY_LEN],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_id.to_string().as_bytes());
    hasher.update(content_hash.as_bytes());
    hasher.update(deletion_ts_ms.to_string().as_bytes());
    hasher.update(secret);
    hex_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: [u8; KEY_LEN] = [3u8; KEY_LEN];
    const SECRET: [u8; KEY_LEN] = [9u8; KEY_LEN];

    fn open_store(dir: &Path) -> ObjectStore {
        ObjectStore::open(dir, CipherAlgorithm::Aes256Gcm, SECRET, EventBus::new(16)).unwrap()
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let job_id = Uuid::new_v4();

        let artifact = store.put(job_id, b">h\nACGT\n", &KEY, &never).unwrap();
        assert_eq!(artifact.original_size, 8);
        assert!(artifact.ciphertext_path.exists());
        assert_eq!(artifact.algorithm_tag, "aes256-gcm");

        let plaintext = store.get(&artifact.content_hash, &KEY).unwrap();
        assert_eq!(plaintext, b">h\nACGT\n");
        assert_eq!(sha256_hex(&plaintext), artifact.content_hash);
    }

    #[test]
    fn test_reput_same_content_same_hash() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());

        let a = store.put(Uuid::new_v4(), b"payload", &KEY, &never).unwrap();
        let b = store.put(Uuid::new_v4(), b"payload", &KEY, &never).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.ciphertext_path, b.ciphertext_path);
    }

    #[test]
    fn test_get_unknown_hash_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        assert!(matches!(
            store.get("0000", &KEY),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let artifact = store.put(Uuid::new_v4(), b"data", &KEY, &never).unwrap();

        let wrong = [8u8; KEY_LEN];
        assert!(matches!(
            store.get(&artifact.content_hash, &wrong),
            Err(StoreError::Integrity(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_emits_integrity_failure() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let mut events = store.events.subscribe();
        let artifact = store.put(Uuid::new_v4(), b"data", &KEY, &never).unwrap();
        let _ = events.try_recv(); // artifact_written

        let mut bytes = std::fs::read(&artifact.ciphertext_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&artifact.ciphertext_path, &bytes).unwrap();

        assert!(matches!(
            store.get(&artifact.content_hash, &KEY),
            Err(StoreError::Integrity(_))
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::IntegrityFailure { .. }
        ));
    }

    #[test]
    fn test_delete_yields_recomputable_proof_and_not_found_get() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let job_id = Uuid::new_v4();
        let artifact = store.put(job_id, b"data", &KEY, &never).unwrap();

        let proof = store.delete(job_id, &artifact).unwrap();
        assert_eq!(proof.job_id, job_id);
        assert_eq!(proof.artifact_content_hash, artifact.content_hash);
        let expected = proof_digest(
            job_id,
            &artifact.content_hash,
            proof.deletion_timestamp.timestamp_millis(),
            &SECRET,
        );
        assert_eq!(proof.proof_digest, expected);

        assert!(!artifact.ciphertext_path.exists());
        assert!(matches!(
            store.get(&artifact.content_hash, &KEY),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_twice_returns_same_proof() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let job_id = Uuid::new_v4();
        let artifact = store.put(job_id, b"data", &KEY, &never).unwrap();

        let first = store.delete(job_id, &artifact).unwrap();
        let second = store.delete(job_id, &artifact).unwrap();
        assert_eq!(first.deletion_timestamp, second.deletion_timestamp);
        assert_eq!(first.proof_digest, second.proof_digest);
    }

    #[test]
    fn test_delete_tolerates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let job_id = Uuid::new_v4();
        let artifact = store.put(job_id, b"data", &KEY, &never).unwrap();

        std::fs::remove_file(&artifact.ciphertext_path).unwrap();
        assert!(store.delete(job_id, &artifact).is_ok());
    }

    #[test]
    fn test_delete_keeps_shared_content_alive() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let artifact_a = store.put(a, b"shared", &KEY, &never).unwrap();
        let _artifact_b = store.put(b, b"shared", &KEY, &never).unwrap();

        store.delete(a, &artifact_a).unwrap();
        // Job b still references the content; the blob and its row survive.
        assert_eq!(store.get(&artifact_a.content_hash, &KEY).unwrap(), b"shared");
    }

    #[test]
    fn test_proof_before_deletion_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        assert!(matches!(
            store.proof(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_aborted_put_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let job_id = Uuid::new_v4();

        let result = store.put(job_id, b"payload", &KEY, &|| true);
        assert!(matches!(result, Err(StoreError::Interrupted)));
        assert!(store.artifact_for_job(job_id).unwrap().is_none());

        // No stray files under blobs/.
        let leftovers: Vec<_> = walk_files(&tmp.path().join("blobs"));
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    #[test]
    fn test_xor_fallback_algorithm_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ObjectStore::open(
            tmp.path(),
            CipherAlgorithm::XorHmacSha256,
            SECRET,
            EventBus::new(16),
        )
        .unwrap();
        let artifact = store.put(Uuid::new_v4(), b"payload", &KEY, &never).unwrap();
        assert_eq!(artifact.algorithm_tag, "xor-hmac-sha256");
        assert_eq!(store.get(&artifact.content_hash, &KEY).unwrap(), b"payload");
    }

    fn walk_files(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    out.extend(walk_files(&path));
                } else {
                    out.push(path);
                }
            }
        }
        out
    }
}
