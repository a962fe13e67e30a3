//! Rotating TURN secret ring.
//!
//! Holds the current shared secret plus an ordered list of grace-period
//! secrets. Validation dominates rotation, so readers take a shared lock
//! just long enough to clone a snapshot out and do all crypto lock-free.
//! The ring is created once at startup and shared by the API handlers,
//! the signaling hub, and the TURN authenticator, so rotation is observed
//! everywhere without a restart.

use std::sync::RwLock;

use tracing::info;

/// Point-in-time view of the secret ring.
#[derive(Debug, Clone)]
pub struct SecretSnapshot {
    pub current: String,
    pub olds: Vec<String>,
    pub ttl_secs: u64,
}

impl SecretSnapshot {
    /// Candidate secrets in validation order: current first, then each
    /// grace secret. Empty entries are skipped.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.current.as_str())
            .chain(self.olds.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
    }
}

/// Thread-safe holder of the current and grace-period TURN secrets.
pub struct SecretRing {
    inner: RwLock<SecretSnapshot>,
}

impl SecretRing {
    pub fn new(current: String, olds: Vec<String>, ttl_secs: u64) -> Self {
        Self {
            inner: RwLock::new(SecretSnapshot {
                current,
                olds,
                ttl_secs,
            }),
        }
    }

    /// Consistent point-in-time copy of the ring.
    pub fn snapshot(&self) -> SecretSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the current secret, the grace list, and the TTL.
    pub fn rotate(&self, current: String, olds: Vec<String>, ttl_secs: u64) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.current = current;
        guard.olds = olds;
        guard.ttl_secs = ttl_secs;
        info!(
            grace_secrets = guard.olds.len(),
            ttl_secs, "TURN secrets rotated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_returns_current_then_olds() {
        let ring = SecretRing::new("a".into(), vec!["b".into(), "c".into()], 60);
        let snap = ring.snapshot();
        let candidates: Vec<_> = snap.candidates().collect();
        assert_eq!(candidates, vec!["a", "b", "c"]);
        assert_eq!(snap.ttl_secs, 60);
    }

    #[test]
    fn rotate_replaces_both_atomically() {
        let ring = SecretRing::new("a".into(), vec![], 60);
        ring.rotate("b".into(), vec!["a".into()], 120);

        let snap = ring.snapshot();
        assert_eq!(snap.current, "b");
        assert_eq!(snap.olds, vec!["a".to_string()]);
        assert_eq!(snap.ttl_secs, 120);
    }

    #[test]
    fn candidates_skip_empty_secrets() {
        let ring = SecretRing::new(String::new(), vec!["x".into(), String::new()], 60);
        let snap = ring.snapshot();
        assert_eq!(snap.candidates().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn concurrent_snapshots_and_rotations() {
        use std::sync::Arc;

        let ring = Arc::new(SecretRing::new("s0".into(), vec![], 60));
        let mut handles = Vec::new();

        for i in 0..4 {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    if i == 0 {
                        ring.rotate(format!("s{j}"), vec!["old".into()], 60);
                    } else {
                        let snap = ring.snapshot();
                        assert!(!snap.current.is_empty());
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
