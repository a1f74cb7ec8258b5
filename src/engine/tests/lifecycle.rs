use super::*;
use crate::engine::Collaborators;
use crate::history::MemoryHistory;
use tokio_stream::StreamExt;

#[test]
fn test_new_rejects_invalid_config() {
    let mut config = test_config();
    config.scheduler.max_workers = 0;

    let result = DownloadEngine::new(
        config,
        Collaborators::new(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(MockLister::new(Default::default())),
            Arc::new(MemoryHistory::new()),
        ),
    );

    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let mut config = test_config();
    config.scheduler.max_workers = 2;
    let fetcher = Arc::new(GatedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());

    t.engine.start().unwrap();
    t.engine.start().unwrap();

    for n in 1..=5 {
        submit_one(&t.engine, &member_url(n), 5).await;
    }
    wait_until(|| fetcher.running() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A second start must not have doubled the pool
    assert_eq!(fetcher.max_running(), 2);
    fetcher.open();
    settle(&t.engine).await;
}

#[tokio::test]
async fn test_shutdown_pauses_running_tasks() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(GatedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().unwrap();

    let running = submit_one(&t.engine, URL_A, 5).await;
    let pending = submit_one(&t.engine, URL_B, 5).await;
    wait_for_state(&t.engine, running, TaskState::Running).await;

    t.engine.shutdown().await.unwrap();

    let status = t.engine.get_status(running).unwrap();
    assert_eq!(status.state, TaskState::Paused);
    assert_eq!(status.attempt, 0);
    assert_eq!(t.engine.get_status(pending).unwrap().state, TaskState::Pending);
    assert_eq!(fetcher.started(), vec![URL_A]);

    let events = drain_events(&mut events);
    assert_eq!(events.last(), Some(&Event::Shutdown));
    assert!(events.contains(&Event::Paused { id: running }));

    // The stranded pending task does not hold up an idle wait
    settle(&t.engine).await;
    assert_eq!(t.engine.get_status(pending).unwrap().state, TaskState::Pending);
}

#[tokio::test]
async fn test_shutdown_keeps_requested_cancel() {
    let fetcher = Arc::new(GatedFetcher::new());
    let t = create_test_engine(test_config(), fetcher.clone());
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;
    wait_for_state(&t.engine, id, TaskState::Running).await;

    t.engine.cancel(id).await.unwrap();
    t.engine.shutdown().await.unwrap();

    assert_eq!(t.engine.get_status(id).unwrap().state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));
    t.engine.start().unwrap();

    t.engine.shutdown().await.unwrap();
    assert!(t.engine.is_shutting_down());

    let submit = t.engine.submit(URL_A, 5, TaskOptions::default()).await;
    assert!(matches!(submit, Err(Error::ShuttingDown)));

    let batch = t
        .engine
        .submit_batch(URL_B, 5, TaskOptions::default(), None)
        .await;
    assert!(matches!(batch, Err(Error::ShuttingDown)));

    assert!(matches!(t.engine.start(), Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));
    let mut events = t.engine.subscribe();
    t.engine.start().unwrap();

    t.engine.shutdown().await.unwrap();
    t.engine.shutdown().await.unwrap();

    let shutdowns = drain_events(&mut events)
        .into_iter()
        .filter(|event| *event == Event::Shutdown)
        .count();
    assert_eq!(shutdowns, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_retry_timers() {
    let mut config = test_config();
    config.retry.initial_delay = Duration::from_millis(200);
    config.retry.max_delay = Duration::from_millis(200);
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.always_fail(URL_A, FetchError::Transient("connection reset".to_string()));
    let t = create_test_engine(config, fetcher.clone());
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;
    wait_until(|| t.engine.queue_stats().retry_scheduled == 1).await;

    t.engine.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Timer never fired: still waiting, never re-queued
    let status = t.engine.get_status(id).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.attempt, 0);
    assert_eq!(fetcher.calls().len(), 1);

    // A cancelled timer is not outstanding work
    settle(&t.engine).await;
}

#[tokio::test]
async fn test_wait_for_idle_ignores_paused_tasks() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));

    let paused = submit_one(&t.engine, URL_A, 5).await;
    t.engine.pause(paused).await.unwrap();
    submit_one(&t.engine, URL_B, 5).await;
    t.engine.start().unwrap();

    settle(&t.engine).await;
    assert_eq!(t.engine.queue_stats().paused, 1);
    assert_eq!(t.history.len(), 1);
}

#[tokio::test]
async fn test_event_stream_delivers_events() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));
    let mut stream = t.engine.event_stream();
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;

    let mut seen = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(5), stream.next()).await
    {
        let done = matches!(event, Event::Succeeded { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(seen.first(), Some(Event::Queued { id: queued, .. }) if *queued == id));
    assert!(matches!(seen.last(), Some(Event::Succeeded { id: done, .. }) if *done == id));
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_engine() {
    let mut config = test_config();
    config.scheduler.event_buffer = 2;
    let t = create_test_engine(config, Arc::new(ScriptedFetcher::new()));
    // Never read
    let _lagging = t.engine.subscribe();
    t.engine.start().unwrap();

    for n in 1..=10 {
        submit_one(&t.engine, &member_url(n), 5).await;
    }
    settle(&t.engine).await;

    assert_eq!(t.history.len(), 10);
}

#[tokio::test]
async fn test_engine_clones_share_state() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));
    let other: DownloadEngine = t.engine.clone();

    let id = submit_one(&t.engine, URL_A, 5).await;

    assert_eq!(other.get_status(id).unwrap().target, URL_A);
    assert_eq!(other.get_config().scheduler.max_workers, 2);
}
