//! Consolidation merges near-duplicate memories (same subject/topic/object
//! text, hence identical `FakeEmbedder` vectors) into one, within one
//! manual consolidation pass.

use engram_e2e_tests::harness::TestSystem;
use engram_e2e_tests::mocks::TestDataFactory;

#[tokio::test]
async fn duplicate_memories_merge_on_consolidation() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "likes", "coffee", 0.8))
        .await
        .unwrap();
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "likes", "coffee", 0.8))
        .await
        .unwrap();
    assert_eq!(harness.system.memory_count().await, 2);

    let merged = harness.system.run_consolidation().await.unwrap();
    assert_eq!(merged, 1);
    assert_eq!(harness.system.memory_count().await, 1);
}

#[tokio::test]
async fn distinct_memories_are_not_merged() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "likes", "coffee", 0.8))
        .await
        .unwrap();
    harness
        .system
        .create_memory(TestDataFactory::fact("Bob", "hates", "mushrooms", 0.8))
        .await
        .unwrap();

    let merged = harness.system.run_consolidation().await.unwrap();
    assert_eq!(merged, 0);
    assert_eq!(harness.system.memory_count().await, 2);
}
