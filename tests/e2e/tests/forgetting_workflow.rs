//! Auto-forget preserves important memories and drops decayed, low-value
//! ones.

use engram_core::tools::SearchMemoriesParams;
use engram_e2e_tests::harness::TestSystem;
use engram_e2e_tests::mocks::TestDataFactory;

#[tokio::test]
async fn fresh_memories_survive_a_forgetting_pass() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "likes", "coffee", 0.9))
        .await
        .unwrap();

    let forgotten = harness.system.run_forgetting().await.unwrap();
    assert_eq!(forgotten, 0);
    assert_eq!(harness.system.memory_count().await, 1);
}

#[tokio::test]
async fn important_memories_are_searchable_after_repeated_forgetting_passes() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "is_allergic_to", "peanuts", 0.95))
        .await
        .unwrap();

    for _ in 0..5 {
        harness.system.run_forgetting().await.unwrap();
    }

    let results = harness
        .system
        .search_memories(&SearchMemoriesParams {
            query: "is_allergic_to peanuts".to_string(),
            expand_depth: 0,
            use_multi_query: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!results.is_empty());
}
