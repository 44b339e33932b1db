//! Test data factory producing realistic `CreateMemoryParams` and
//! `IncomingMessage` fixtures for the end-to-end suites.

use chrono::Utc;
use engram_core::CreateMemoryParams;
use engram_runtime::IncomingMessage;
use std::collections::BTreeMap;

pub struct TestDataFactory;

impl TestDataFactory {
    pub fn fact(subject: &str, topic: &str, object: &str, importance: f64) -> CreateMemoryParams {
        CreateMemoryParams {
            subject: subject.to_string(),
            memory_type: "FACT".to_string(),
            topic: topic.to_string(),
            object: Some(object.to_string()),
            attributes: BTreeMap::new(),
            importance: Some(importance),
        }
    }

    pub fn message(stream_id: &str, sender: &str, content: &str) -> IncomingMessage {
        IncomingMessage {
            content: content.to_string(),
            sender_id: format!("{sender}-id"),
            sender_name: sender.to_string(),
            timestamp: Utc::now(),
            stream_id: stream_id.to_string(),
        }
    }

    /// A short burst of messages on one stream, enough to fill a perceptual
    /// block at the default `block_size` of 5.
    pub fn message_burst(stream_id: &str, sender: &str) -> Vec<IncomingMessage> {
        (0..5)
            .map(|i| Self::message(stream_id, sender, &format!("message number {i} about the quarterly roadmap")))
            .collect()
    }
}
