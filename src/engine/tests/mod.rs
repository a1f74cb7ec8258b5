use super::DownloadEngine;
use super::test_helpers::*;
use crate::error::{Error, FetchError, TaskError};
use crate::types::{Event, Priority, TaskId, TaskOptions, TaskState};
use std::sync::Arc;
use std::time::Duration;

mod lifecycle;
mod pool;
mod queue;

const URL_A: &str = "https://example.com/watch?v=aaa";
const URL_B: &str = "https://example.com/watch?v=bbb";
const URL_C: &str = "https://example.com/watch?v=ccc";

/// Submit one target at `priority` with default options
async fn submit_one(engine: &DownloadEngine, target: &str, priority: i32) -> TaskId {
    let outcome = engine
        .submit(target, priority, TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.created.len(), 1, "expected a new task for {target}");
    outcome.created[0]
}
