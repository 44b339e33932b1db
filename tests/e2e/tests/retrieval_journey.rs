//! Create-then-retrieve journey: memories created through the public API
//! are findable by `search_memories` once committed, and `link_memories`
//! connects two existing memories by subject.

use engram_core::tools::SearchMemoriesParams;
use engram_e2e_tests::harness::TestSystem;
use engram_e2e_tests::mocks::TestDataFactory;

#[tokio::test]
async fn created_memory_is_immediately_searchable() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "lives_in", "Tokyo", 0.8))
        .await
        .unwrap();

    let results = harness
        .system
        .search_memories(&SearchMemoriesParams {
            query: "lives_in Tokyo".to_string(),
            expand_depth: 0,
            use_multi_query: false,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(harness.system.memory_count().await, 1);
}

#[tokio::test]
async fn link_memories_connects_two_existing_subjects() {
    let harness = TestSystem::new().await;
    harness
        .system
        .create_memory(TestDataFactory::fact("Alice", "works_at", "Acme", 0.7))
        .await
        .unwrap();
    harness
        .system
        .create_memory(TestDataFactory::fact("Bob", "works_at", "Acme", 0.7))
        .await
        .unwrap();

    let edge = harness.system.link_memories("Alice", "Bob", "colleague_of", Some(0.6)).await.unwrap();
    assert_eq!(edge.relation, "colleague_of");
}

#[tokio::test]
async fn search_with_no_memories_returns_empty() {
    let harness = TestSystem::new().await;
    let results = harness
        .system
        .search_memories(&SearchMemoriesParams {
            query: "anything at all".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(results.is_empty());
}
