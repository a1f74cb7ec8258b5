use super::*;

fn urls(count: usize) -> Vec<String> {
    (1..=count).map(member_url).collect()
}

#[tokio::test]
async fn test_running_never_exceeds_worker_count() {
    let mut config = test_config();
    config.scheduler.max_workers = 3;
    let fetcher = Arc::new(GatedFetcher::new());
    let t = create_test_engine(config, fetcher.clone());
    t.engine.start().unwrap();

    for url in urls(10) {
        submit_one(&t.engine, &url, 5).await;
    }

    wait_until(|| fetcher.running() == 3).await;
    // Give a fourth worker every chance to show up
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fetcher.running(), 3);

    let stats = t.engine.queue_stats();
    assert_eq!(stats.running, 3);
    assert_eq!(stats.pending, 7);
    assert_eq!(stats.workers, 3);

    fetcher.open();
    settle(&t.engine).await;

    assert_eq!(fetcher.max_running(), 3);
    assert_eq!(fetcher.completed().len(), 10);
    assert!(!fetcher.saw_overlap());
}

#[tokio::test]
async fn test_single_worker_runs_tasks_one_at_a_time() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(GatedFetcher::new());
    fetcher.open();
    let t = create_test_engine(config, fetcher.clone());
    t.engine.start().unwrap();

    for url in urls(5) {
        submit_one(&t.engine, &url, 5).await;
    }
    settle(&t.engine).await;

    assert_eq!(fetcher.max_running(), 1);
    assert_eq!(fetcher.completed().len(), 5);
}

#[tokio::test]
async fn test_each_task_runs_exactly_once() {
    let mut config = test_config();
    config.scheduler.max_workers = 4;
    let fetcher = Arc::new(ScriptedFetcher::new().with_delay(Duration::from_millis(5)));
    let t = create_test_engine(config, fetcher.clone());
    t.engine.start().unwrap();

    let mut ids = Vec::new();
    for (n, url) in urls(20).iter().enumerate() {
        let priority = 1 + (n % 10) as i32;
        ids.push(submit_one(&t.engine, url, priority).await);
    }
    settle(&t.engine).await;

    let mut targets = fetcher.targets();
    targets.sort();
    let mut expected = urls(20);
    expected.sort();
    assert_eq!(targets, expected);

    for id in ids {
        assert_eq!(t.engine.get_status(id).unwrap().state, TaskState::Succeeded);
    }
    assert_eq!(t.history.len(), 20);
}

#[tokio::test]
async fn test_resubmitting_in_flight_target_coalesces() {
    let fetcher = Arc::new(GatedFetcher::new());
    let t = create_test_engine(test_config(), fetcher.clone());
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;
    wait_for_state(&t.engine, id, TaskState::Running).await;

    let outcome = t
        .engine
        .submit(URL_A, 9, TaskOptions::default())
        .await
        .unwrap();
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.coalesced, vec![id]);

    fetcher.open();
    settle(&t.engine).await;
    assert_eq!(fetcher.started(), vec![URL_A]);
    assert!(!fetcher.saw_overlap());
}

#[tokio::test]
async fn test_panicking_fetcher_fails_task_and_worker_survives() {
    let mut config = test_config();
    config.scheduler.max_workers = 1;
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.panic_on(URL_A);
    let t = create_test_engine(config, fetcher.clone());
    t.engine.start().unwrap();

    let a = submit_one(&t.engine, URL_A, 9).await;
    let failed = wait_for_terminal(&t.engine, a).await;
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.last_error.unwrap().contains("panicked"));

    // Same single worker keeps serving the queue
    let b = submit_one(&t.engine, URL_B, 5).await;
    let ok = wait_for_terminal(&t.engine, b).await;
    assert_eq!(ok.state, TaskState::Succeeded);
}

#[tokio::test]
async fn test_progress_is_reported_and_monotonic() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_progress(vec![0.2, 0.5, 0.4, 1.0]));
    let t = create_test_engine(test_config(), fetcher.clone());
    let mut events = t.engine.subscribe();
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;
    let status = wait_for_terminal(&t.engine, id).await;
    assert_eq!(status.state, TaskState::Succeeded);
    assert_eq!(status.progress, 1.0);
    assert!(status.output_path.is_some());

    let progress: Vec<f64> = drain_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            Event::Progress {
                id: event_id,
                progress,
                ..
            } if event_id == id => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
}

#[tokio::test]
async fn test_event_order_for_successful_task() {
    let t = create_test_engine(test_config(), Arc::new(ScriptedFetcher::new()));
    let mut events = t.engine.subscribe();
    t.engine.start().unwrap();

    let id = submit_one(&t.engine, URL_A, 5).await;
    wait_for_terminal(&t.engine, id).await;

    let kinds: Vec<&str> = drain_events(&mut events)
        .iter()
        .map(|event| match event {
            Event::Queued { .. } => "queued",
            Event::Started { .. } => "started",
            Event::Succeeded { .. } => "succeeded",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["queued", "started", "succeeded"]);
}
