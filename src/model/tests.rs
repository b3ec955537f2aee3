//! Tests for the model cache and text encoder

use std::time::Duration;

use proptest::prelude::*;

use super::*;
use crate::core::config::ModelConfig;

fn test_config(ttl_secs: u64) -> ModelConfig {
    ModelConfig {
        cache_ttl_secs: ttl_secs,
        embedding_dimension: 64,
    }
}

#[test]
fn encoder_rejects_zero_dimension() {
    let err = TextEncoder::load(0);
    assert!(matches!(err, Err(ModelError::InvalidDimension { dimension: 0 })));
}

#[test]
fn embeddings_are_deterministic_and_normalized() {
    let encoder = TextEncoder::load(64).expect("load encoder");

    let a = encoder.embed("how do I submit module three");
    let b = encoder.embed("how do I submit module three");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);

    let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4, "expected unit norm, got {norm}");
}

#[test]
fn empty_text_embeds_to_zero_vector() {
    let encoder = TextEncoder::load(64).expect("load encoder");
    let v = encoder.embed("  ...  ");
    assert!(v.iter().all(|&x| x == 0.0));
}

#[test]
fn similar_texts_outrank_unrelated_ones() {
    let encoder = TextEncoder::load(256).expect("load encoder");

    let candidates = vec![
        "how do I submit my module assignment".to_string(),
        "the weather in lagos is warm today".to_string(),
    ];
    let (index, score) = encoder
        .rank("how to submit a module assignment", &candidates)
        .expect("rank");

    assert_eq!(index, 0);
    assert!(score > 0.0);
}

#[test]
fn rank_returns_none_without_candidates() {
    let encoder = TextEncoder::load(64).expect("load encoder");
    assert!(encoder.rank("anything", &[]).is_none());
}

#[test]
fn cosine_of_identical_vectors_is_one() {
    let encoder = TextEncoder::load(64).expect("load encoder");
    let v = encoder.embed("weekly study tips");
    assert!((TextEncoder::cosine(&v, &v) - 1.0).abs() < 1e-4);
    assert_eq!(TextEncoder::cosine(&v, &vec![0.0; 64]), 0.0);
}

#[test]
fn cache_loads_on_first_use_only() {
    let cache = ModelCache::new(test_config(300));
    assert_eq!(cache.loaded_count(), 0);
    assert!(!cache.is_loaded(ModelId::TextEncoder));

    {
        let guard = cache.acquire(ModelId::TextEncoder).expect("acquire");
        assert_eq!(guard.dimension(), 64);
    }
    assert_eq!(cache.loaded_count(), 1);

    // Second acquire reuses the entry
    let _guard = cache.acquire(ModelId::TextEncoder).expect("acquire");
    assert_eq!(cache.loaded_count(), 1);

    let info = cache.loaded_models();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].use_count, 2);
}

#[test]
fn idle_entries_are_evicted_after_ttl() {
    // Zero TTL: anything not actively held is idle
    let cache = ModelCache::new(test_config(0));
    drop(cache.acquire(ModelId::TextEncoder).expect("acquire"));

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(cache.evict_idle(), 1);
    assert_eq!(cache.loaded_count(), 0);
}

#[test]
fn fresh_entries_survive_idle_eviction() {
    let cache = ModelCache::new(test_config(300));
    drop(cache.acquire(ModelId::TextEncoder).expect("acquire"));

    assert_eq!(cache.evict_idle(), 0);
    assert_eq!(cache.loaded_count(), 1);

    assert_eq!(cache.evict_all(), 1);
    assert_eq!(cache.loaded_count(), 0);
}

#[test]
fn guard_keeps_encoder_usable_across_eviction() {
    let cache = ModelCache::new(test_config(300));
    let guard = cache.acquire(ModelId::TextEncoder).expect("acquire");

    // Eviction while the guard is live must not invalidate it
    assert_eq!(cache.evict_all(), 1);
    let v = guard.embed("still works after eviction");
    assert_eq!(v.len(), 64);
    drop(guard);

    // Next acquire reloads from scratch
    let _guard = cache.acquire(ModelId::TextEncoder).expect("reacquire");
    assert_eq!(cache.loaded_count(), 1);
}

proptest! {
    #[test]
    fn embed_dimension_matches_config(text in ".{0,200}") {
        let encoder = TextEncoder::load(32).expect("load encoder");
        let v = encoder.embed(&text);
        prop_assert_eq!(v.len(), 32);
        // Norm is 0 (no tokens) or ~1
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        prop_assert!(norm < 1.0 + 1e-3);
    }

    #[test]
    fn cosine_is_symmetric(a in ".{1,80}", b in ".{1,80}") {
        let encoder = TextEncoder::load(32).expect("load encoder");
        let va = encoder.embed(&a);
        let vb = encoder.embed(&b);
        let ab = TextEncoder::cosine(&va, &vb);
        let ba = TextEncoder::cosine(&vb, &va);
        prop_assert!((ab - ba).abs() < 1e-5);
    }
}
