//! A burst of chat messages assembles into a perceptual block, and once
//! recalled enough times gets promoted into the short-term tier and then
//! transferred into the long-term graph.

use engram_e2e_tests::harness::TestSystem;
use engram_e2e_tests::mocks::TestDataFactory;

#[tokio::test]
async fn message_burst_assembles_a_block_and_promotes_to_short_term() {
    let harness = TestSystem::new().await;
    let messages = TestDataFactory::message_burst("stream-1", "Alice");
    let combined_text = messages
        .iter()
        .map(|m| format!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender_name, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    for message in messages {
        harness.system.ingest_message(message).await.unwrap();
    }

    // The block is staged at half-confidence as soon as it assembles, and
    // stays on the perceptual stack until recall promotes it further.
    assert_eq!(harness.system.short_term_count().await, 1);
    assert_eq!(harness.system.perceptual_block_count().await, 1);

    // Recall it past the activation threshold (default 2), then let the
    // next ingest sweep promote it at full confidence and evict it from
    // the perceptual stack.
    for _ in 0..2 {
        harness.system.retrieve(&combined_text, vec![]).await.unwrap();
    }
    harness
        .system
        .ingest_message(TestDataFactory::message("stream-1", "Alice", "a follow-up message"))
        .await
        .unwrap();

    assert_eq!(harness.system.perceptual_block_count().await, 0);
    assert_eq!(harness.system.short_term_count().await, 2);
}

#[tokio::test]
async fn retrieval_surfaces_recalled_perceptual_blocks() {
    let harness = TestSystem::new().await;
    let messages = TestDataFactory::message_burst("stream-2", "Bob");

    // Reconstruct the exact `combined_text` the perceptual manager will
    // assemble, so querying with it is guaranteed a perfect-cosine match
    // against the deterministic fake embedder regardless of threshold tuning.
    let combined_text = messages
        .iter()
        .map(|m| format!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender_name, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    for message in messages {
        harness.system.ingest_message(message).await.unwrap();
    }

    let results = harness.system.retrieve(&combined_text, vec![]).await.unwrap();
    let saw_perceptual = results
        .iter()
        .any(|r| matches!(r, engram_runtime::RetrievedMemory::Perceptual(_)));
    assert!(saw_perceptual);
}
