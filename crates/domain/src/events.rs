//! 生命周期事件
//!
//! 事件通过主题发布，订阅方使用模式匹配：`*` 匹配单个段，
//! `#` 匹配零个或多个段，段之间以 `.` 分隔。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TOPIC_JOB: &str = "job.*";
pub const TOPIC_JOB_COMPLETED: &str = "job.completed";
pub const TOPIC_JOB_FAILED: &str = "job.failed";
pub const TOPIC_JOB_CANCELLED: &str = "job.cancelled";
pub const TOPIC_JOB_RUNNING: &str = "job.running";

/// webhook 事件过滤名
pub const WEBHOOK_JOB_STATE_CHANGE: &str = "job.StateChange";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// 判断主题是否匹配订阅模式
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    segments_match(&pattern, &topic)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((&"#", rest)) => (0..=topic.len()).any(|skip| segments_match(rest, &topic[skip..])),
        Some((&head, rest)) => match topic.split_first() {
            Some((&segment, remaining)) => {
                (head == "*" || head == segment) && segments_match(rest, remaining)
            }
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_topic() {
        assert!(topic_matches("job.completed", "job.completed"));
        assert!(!topic_matches("job.completed", "job.failed"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        assert!(topic_matches(TOPIC_JOB, TOPIC_JOB_COMPLETED));
        assert!(topic_matches(TOPIC_JOB, TOPIC_JOB_FAILED));
        assert!(!topic_matches(TOPIC_JOB, "job"));
        assert!(!topic_matches(TOPIC_JOB, "job.progress.update"));
        assert!(!topic_matches(TOPIC_JOB, "task.completed"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        assert!(topic_matches("#", "job.completed"));
        assert!(topic_matches("job.#", "job"));
        assert!(topic_matches("job.#", "job.progress.update"));
        assert!(!topic_matches("job.#", "node.up"));
    }
}
