//! Tracks in-flight response-generation and TTS tasks by target id, with
//! targeted and global cancellation plus staleness reaping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;

/// Suggested default threshold for `CleanupStaleGenerations`/`CleanupStaleTts`.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

struct ActiveEntry {
    cancel: CancellationToken,
    started_at: Instant,
}

/// Two parallel cancellation registries (response generation and speech
/// synthesis), each keyed by target id and independently locked.
#[derive(Default)]
pub struct GenerationRegistry {
    generations: Mutex<HashMap<String, ActiveEntry>>,
    tts: Mutex<HashMap<String, ActiveEntry>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_generation(&self, target_id: impl Into<String>, cancel: CancellationToken) {
        register(&self.generations, target_id.into(), cancel).await;
    }

    pub async fn unregister_generation(&self, target_id: &str) {
        self.generations.lock().await.remove(target_id);
    }

    pub async fn cancel_generation(&self, target_id: &str) -> Result<(), RegistryError> {
        cancel(&self.generations, target_id).await
    }

    pub async fn register_tts(&self, target_id: impl Into<String>, cancel: CancellationToken) {
        register(&self.tts, target_id.into(), cancel).await;
    }

    pub async fn unregister_tts(&self, target_id: &str) {
        self.tts.lock().await.remove(target_id);
    }

    pub async fn cancel_tts(&self, target_id: &str) -> Result<(), RegistryError> {
        cancel(&self.tts, target_id).await
    }

    /// Cancel and remove every generation entry older than `threshold`.
    /// Returns the number of entries removed.
    pub async fn cleanup_stale_generations(&self, threshold: Duration) -> usize {
        cleanup_stale(&self.generations, threshold).await
    }

    /// Cancel and remove every TTS entry older than `threshold`.
    pub async fn cleanup_stale_tts(&self, threshold: Duration) -> usize {
        cleanup_stale(&self.tts, threshold).await
    }
}

async fn register(map: &Mutex<HashMap<String, ActiveEntry>>, target_id: String, cancel: CancellationToken) {
    let mut guard = map.lock().await;
    if let Some(prior) = guard.remove(&target_id) {
        prior.cancel.cancel();
    }
    guard.insert(
        target_id,
        ActiveEntry {
            cancel,
            started_at: Instant::now(),
        },
    );
}

async fn cancel(map: &Mutex<HashMap<String, ActiveEntry>>, target_id: &str) -> Result<(), RegistryError> {
    let mut guard = map.lock().await;
    if target_id.is_empty() {
        for (_, entry) in guard.drain() {
            entry.cancel.cancel();
        }
        return Ok(());
    }
    match guard.remove(target_id) {
        Some(entry) => {
            entry.cancel.cancel();
            Ok(())
        }
        None => Err(RegistryError::NotFound(target_id.to_owned())),
    }
}

async fn cleanup_stale(map: &Mutex<HashMap<String, ActiveEntry>>, threshold: Duration) -> usize {
    let mut guard = map.lock().await;
    let stale: Vec<String> = guard
        .iter()
        .filter(|(_, entry)| entry.started_at.elapsed() > threshold)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        if let Some(entry) = guard.remove(id) {
            entry.cancel.cancel();
        }
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_empty_target_cancels_and_clears_everything() {
        let registry = GenerationRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.register_generation("msg-1", a.clone()).await;
        registry.register_generation("msg-2", b.clone()).await;

        registry.cancel_generation("").await.expect("cancel all");

        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(registry.cancel_generation("msg-1").await.is_err());
    }

    #[tokio::test]
    async fn cancel_missing_single_target_is_not_found() {
        let registry = GenerationRegistry::new();
        let err = registry.cancel_generation("missing").await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".to_owned()));
    }

    #[tokio::test]
    async fn cancel_empty_registry_is_success() {
        let registry = GenerationRegistry::new();
        registry.cancel_generation("").await.expect("empty map is not an error");
    }

    #[tokio::test]
    async fn reregistering_same_target_cancels_and_replaces_prior() {
        let registry = GenerationRegistry::new();
        let first = CancellationToken::new();
        registry.register_generation("msg-1", first.clone()).await;

        let second = CancellationToken::new();
        registry.register_generation("msg-1", second.clone()).await;

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        registry.cancel_generation("msg-1").await.expect("cancel current");
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn generations_and_tts_are_independent_registries() {
        let registry = GenerationRegistry::new();
        let gen_token = CancellationToken::new();
        let tts_token = CancellationToken::new();
        registry.register_generation("target", gen_token.clone()).await;
        registry.register_tts("target", tts_token.clone()).await;

        registry.cancel_generation("target").await.expect("cancel generation");

        assert!(gen_token.is_cancelled());
        assert!(!tts_token.is_cancelled());
    }

    #[tokio::test]
    async fn cleanup_stale_generations_removes_only_entries_past_threshold() {
        let registry = GenerationRegistry::new();
        let old = CancellationToken::new();
        registry.register_generation("old", old.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = CancellationToken::new();
        registry.register_generation("fresh", fresh.clone()).await;

        let removed = registry
            .cleanup_stale_generations(Duration::from_millis(10))
            .await;

        assert_eq!(removed, 1);
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
    }
}
