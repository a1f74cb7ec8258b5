use super::*;
use crate::engine::queue::{QueuedTask, TaskQueue};

fn entry(priority: i32, seq: u64) -> QueuedTask {
    QueuedTask {
        id: TaskId::new(),
        priority: Priority::new(priority).unwrap(),
        seq,
    }
}

#[test]
fn test_pop_highest_priority_first() {
    let mut queue = TaskQueue::default();
    let low = entry(1, 0);
    let high = entry(9, 1);
    let mid = entry(5, 2);
    queue.extend([low, high, mid]);

    assert_eq!(queue.pop_highest().unwrap().id, high.id);
    assert_eq!(queue.pop_highest().unwrap().id, mid.id);
    assert_eq!(queue.pop_highest().unwrap().id, low.id);
    assert!(queue.pop_highest().is_none());
}

#[test]
fn test_equal_priority_is_fifo() {
    let mut queue = TaskQueue::default();
    let entries: Vec<_> = (0..5).map(|seq| entry(5, seq)).collect();
    // Push in reverse so heap insertion order can't explain the result
    for e in entries.iter().rev() {
        queue.push(*e);
    }

    let popped: Vec<_> = std::iter::from_fn(|| queue.pop_highest())
        .map(|e| e.seq)
        .collect();
    assert_eq!(popped, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_remove_from_queue() {
    let mut queue = TaskQueue::default();
    let keep = entry(5, 0);
    let removed = entry(7, 1);
    queue.extend([keep, removed]);

    assert!(queue.remove(removed.id));
    assert!(!queue.remove(removed.id));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop_highest().unwrap().id, keep.id);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_dispatch_order_with_single_worker() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());

    // Everything is queued before any worker exists
    submit_one(&t.engine, URL_A, 5).await;
    submit_one(&t.engine, URL_B, 1).await;
    submit_one(&t.engine, URL_C, 5).await;

    t.engine.start().unwrap();
    settle(&t.engine).await;

    assert_eq!(fetcher.targets(), vec![URL_A, URL_C, URL_B]);
}

#[tokio::test]
async fn test_set_priority_reorders_pending_task() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());

    submit_one(&t.engine, URL_A, 3).await;
    submit_one(&t.engine, URL_B, 3).await;
    let c = submit_one(&t.engine, URL_C, 3).await;

    t.engine.set_priority(c, 9).await.unwrap();
    assert_eq!(t.engine.get_status(c).unwrap().priority.get(), 9);
    // Still exactly one queue entry per task
    assert_eq!(t.engine.queue_stats().pending, 3);

    t.engine.start().unwrap();
    settle(&t.engine).await;

    assert_eq!(fetcher.targets(), vec![URL_C, URL_A, URL_B]);
}

#[tokio::test]
async fn test_paused_task_is_not_dispatched() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(ScriptedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());

    let a = submit_one(&t.engine, URL_A, 5).await;
    let b = submit_one(&t.engine, URL_B, 5).await;
    t.engine.pause(a).await.unwrap();

    t.engine.start().unwrap();
    wait_for_terminal(&t.engine, b).await;
    settle(&t.engine).await;

    assert_eq!(fetcher.targets(), vec![URL_B]);
    assert_eq!(t.engine.get_status(a).unwrap().state, TaskState::Paused);
}
