use std::sync::Arc;
use std::time::{Duration, Instant};

use mule::dispatch::{Dispatcher, Notice};
use mule::handler::mock::MockHandler;

#[tokio::test]
async fn handles_items_in_submission_order() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());
    dispatcher.start().unwrap();

    dispatcher.submit("a".to_string(), 1).unwrap();
    dispatcher.submit("b".to_string(), 2).unwrap();
    dispatcher.submit("c".to_string(), 3).unwrap();

    for _ in 0..3 {
        notices.recv().await.unwrap();
    }

    assert_eq!(handler.handled(), vec!["a", "b", "c"]);
    dispatcher.stop();
}

#[tokio::test]
async fn completion_notices_fire_once_per_item_in_order() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());
    dispatcher.start().unwrap();

    dispatcher.submit("a".to_string(), 10).unwrap();
    dispatcher.submit("b".to_string(), 20).unwrap();
    dispatcher.submit("c".to_string(), 30).unwrap();

    let mut tokens = Vec::new();
    for _ in 0..3 {
        match notices.recv().await.unwrap() {
            Notice::Completed { token } => tokens.push(token),
            Notice::Faulted { token, error } => panic!("item {token} faulted: {error}"),
        }
    }
    assert_eq!(tokens, vec![10, 20, 30]);

    // Nothing else is pending.
    assert!(notices.try_recv().is_err());
    dispatcher.stop();
}

#[tokio::test]
async fn concurrent_submitters_never_overlap_and_keep_per_caller_order() {
    let handler = Arc::new(MockHandler::new().delayed(Duration::from_millis(2)));
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());
    dispatcher.start().unwrap();
    let dispatcher = Arc::new(dispatcher);

    let mut joins = Vec::new();
    for caller in 0..4u64 {
        let dispatcher = Arc::clone(&dispatcher);
        joins.push(tokio::spawn(async move {
            for seq in 0..5u64 {
                dispatcher
                    .submit(format!("{caller}-{seq}"), caller * 5 + seq + 1)
                    .unwrap();
            }
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    for _ in 0..20 {
        notices.recv().await.unwrap();
    }

    let handled = handler.handled();
    assert_eq!(handled.len(), 20);
    assert_eq!(handler.max_concurrency(), 1);

    // Items from the same caller come out in the order that caller
    // submitted them.
    for caller in 0..4u64 {
        let prefix = format!("{caller}-");
        let mine: Vec<&String> = handled.iter().filter(|p| p.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..5).map(|seq| format!("{caller}-{seq}")).collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
    dispatcher.stop();
}

#[tokio::test]
async fn submit_does_not_block_on_a_slow_handler() {
    let handler = Arc::new(MockHandler::new().delayed(Duration::from_millis(200)));
    let (dispatcher, _notices) = Dispatcher::new("test", handler);
    dispatcher.start().unwrap();

    // Occupy the worker, then hammer the queue.
    dispatcher.submit("slow".to_string(), 1).unwrap();
    let started_at = Instant::now();
    for i in 2..=101u64 {
        dispatcher.submit(format!("queued-{i}"), i).unwrap();
    }
    assert!(
        started_at.elapsed() < Duration::from_millis(100),
        "submit should be independent of queue depth and handler speed"
    );
    dispatcher.stop();
}

#[tokio::test]
async fn stop_discards_queued_items() {
    let handler = Arc::new(MockHandler::new().delayed(Duration::from_millis(100)));
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());
    dispatcher.start().unwrap();

    for (i, payload) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        dispatcher.submit(payload.to_string(), i as u64 + 1).unwrap();
    }

    // Let the first item finish, then pull the plug.
    match notices.recv().await.unwrap() {
        Notice::Completed { token } => assert_eq!(token, 1),
        Notice::Faulted { token, error } => panic!("item {token} faulted: {error}"),
    }
    dispatcher.stop();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let handled = handler.handled();
    assert!(handled.contains(&"a".to_string()));
    assert!(handled.len() <= 2, "at most the in-flight item may slip through");
    for never_started in ["c", "d", "e"] {
        assert!(
            !handled.contains(&never_started.to_string()),
            "queued item {never_started:?} ran after stop()"
        );
    }

    // No completions arrive for discarded items.
    while let Ok(notice) = notices.try_recv() {
        match notice {
            Notice::Completed { token } => assert!(token <= 2),
            Notice::Faulted { token, error } => panic!("item {token} faulted: {error}"),
        }
    }
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());

    dispatcher.stop();
    assert!(!dispatcher.is_started());

    // Still usable: stop on a never-started dispatcher has no effect.
    dispatcher.start().unwrap();
    dispatcher.submit("late".to_string(), 1).unwrap();
    notices.recv().await.unwrap();
    assert_eq!(handler.handled(), vec!["late"]);
    dispatcher.stop();
}

#[tokio::test]
async fn submit_before_start_errors() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, _notices) = Dispatcher::new("test", handler);

    let err = dispatcher.submit("early".to_string(), 1).unwrap_err();
    assert!(err.to_string().contains("not started"));
}

#[tokio::test]
async fn start_is_idempotent() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());

    dispatcher.start().unwrap();
    dispatcher.start().unwrap();

    dispatcher.submit("once".to_string(), 1).unwrap();
    notices.recv().await.unwrap();

    // One worker, one invocation: a second start must not double anything.
    assert_eq!(handler.handled(), vec!["once"]);
    dispatcher.stop();
}

#[tokio::test]
async fn restart_after_stop_is_rejected() {
    let handler = Arc::new(MockHandler::new());
    let (dispatcher, _notices) = Dispatcher::new("test", handler);

    dispatcher.start().unwrap();
    dispatcher.stop();

    let err = dispatcher.start().unwrap_err();
    assert!(err.to_string().contains("stopped"));
    assert!(dispatcher.submit("dead".to_string(), 1).is_err());
}

#[tokio::test]
async fn handler_fault_terminates_the_worker() {
    let handler = Arc::new(MockHandler::new().failing_on("boom"));
    let (dispatcher, mut notices) = Dispatcher::new("test", handler.clone());
    dispatcher.start().unwrap();

    dispatcher.submit("fine".to_string(), 1).unwrap();
    dispatcher.submit("boom".to_string(), 2).unwrap();
    dispatcher.submit("after".to_string(), 3).unwrap();

    match notices.recv().await.unwrap() {
        Notice::Completed { token } => assert_eq!(token, 1),
        Notice::Faulted { token, error } => panic!("item {token} faulted early: {error}"),
    }
    match notices.recv().await.unwrap() {
        Notice::Faulted { token, error } => {
            assert_eq!(token, 2);
            assert!(error.to_string().contains("scripted failure"));
        }
        Notice::Completed { token } => panic!("item {token} should have faulted"),
    }

    // The item queued behind the fault never runs, and the worker is gone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.handled(), vec!["fine"]);
    assert!(dispatcher.submit("too late".to_string(), 4).is_err());
}
