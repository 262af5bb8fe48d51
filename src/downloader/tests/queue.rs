use super::*;

#[tokio::test]
async fn test_enqueue_creates_pending_job() {
    let h = Harness::new().await;
    let mut events = h.downloader.subscribe();

    let id = h
        .downloader
        .enqueue(
            "  https://files.example.com/media/talk.mp4  ",
            "owner-1",
            JobOptions {
                title: Some("Conference Talk".to_string()),
                priority: 3,
            },
        )
        .await
        .unwrap();

    let job = h.downloader.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Pending);
    assert_eq!(job.source_ref, "https://files.example.com/media/talk.mp4");
    assert_eq!(job.owner_channel, "owner-1");
    assert_eq!(job.title.as_deref(), Some("Conference Talk"));
    assert_eq!(job.priority, 3);
    assert_eq!(job.retry_count, 0);
    assert!(job.strategy.is_none());

    let events = drain(&mut events);
    assert!(matches!(
        events.as_slice(),
        [Event::Queued { id: queued, source_ref }]
            if *queued == id && source_ref == "https://files.example.com/media/talk.mp4"
    ));
}

#[tokio::test]
async fn test_enqueue_blank_title_is_ignored() {
    let h = Harness::new().await;

    let id = h
        .downloader
        .enqueue(
            "https://files.example.com/media/a.mp4",
            "owner-1",
            JobOptions {
                title: Some("   ".to_string()),
                priority: 0,
            },
        )
        .await
        .unwrap();

    assert!(h.downloader.get_job(id).await.unwrap().unwrap().title.is_none());
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_url() {
    let h = Harness::new().await;

    for bad in ["not a url", "ftp://files.example.com/a.mp4", ""] {
        let result = h
            .downloader
            .enqueue(bad, "owner-1", JobOptions::default())
            .await;
        assert!(
            matches!(result, Err(Error::InvalidUrl(_))),
            "{:?} should be rejected, got {:?}",
            bad,
            result
        );
    }

    assert!(h.downloader.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enqueue_accepts_magnet_links() {
    let h = Harness::new().await;

    let id = h
        .downloader
        .enqueue(
            "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=show",
            "owner-1",
            JobOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(h.status(id).await, Status::Pending);
}

#[tokio::test]
async fn test_enqueue_refused_after_shutdown() {
    let h = Harness::new().await;
    h.downloader.shutdown().await.unwrap();

    let result = h
        .downloader
        .enqueue("https://files.example.com/a.mp4", "owner-1", JobOptions::default())
        .await;
    assert!(matches!(result, Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn test_queue_position_follows_priority_then_age() {
    let h = Harness::new().await;

    let j1 = h
        .downloader
        .enqueue("https://example.com/1.mp4", "owner-1", JobOptions { title: None, priority: 5 })
        .await
        .unwrap();
    let j2 = h
        .downloader
        .enqueue("https://example.com/2.mp4", "owner-1", JobOptions { title: None, priority: 5 })
        .await
        .unwrap();
    let j3 = h
        .downloader
        .enqueue("https://example.com/3.mp4", "owner-1", JobOptions { title: None, priority: 10 })
        .await
        .unwrap();

    assert_eq!(h.downloader.queue_position(j3).await.unwrap(), Some(1));
    assert_eq!(h.downloader.queue_position(j1).await.unwrap(), Some(2));
    assert_eq!(h.downloader.queue_position(j2).await.unwrap(), Some(3));

    let next = h.downloader.db.next_eligible().await.unwrap().unwrap();
    assert_eq!(next.id, j3);
}

#[tokio::test]
async fn test_reorder_moves_job_to_front() {
    let h = Harness::new().await;
    let mut events = h.downloader.subscribe();

    let _a = h.enqueue("a").await;
    let _b = h.enqueue("b").await;
    let j = h.enqueue("j").await;
    assert_eq!(h.downloader.queue_position(j).await.unwrap(), Some(3));

    h.downloader.reorder(j, 999).await.unwrap();

    assert_eq!(h.downloader.queue_position(j).await.unwrap(), Some(1));
    let next = h.downloader.db.next_eligible().await.unwrap().unwrap();
    assert_eq!(next.id, j);
    assert_eq!(next.priority, 999);

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        Event::Reordered { id, priority: 999 } if *id == j
    )));
}

#[tokio::test]
async fn test_reorder_unknown_job() {
    let h = Harness::new().await;

    let result = h.downloader.reorder(JobId(404), 1).await;
    assert!(matches!(
        result,
        Err(Error::Job(JobError::NotFound { id: 404 }))
    ));
}

#[tokio::test]
async fn test_summary_and_most_recent_job() {
    let h = Harness::new().await;

    let a = h.enqueue("a").await;
    let b = h.enqueue("b").await;
    let other = h
        .downloader
        .enqueue("https://example.com/c.mp4", "owner-2", JobOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    h.downloader.pause(a, None).await.unwrap();
    h.downloader.cancel(other).await.unwrap();

    let summary = h.downloader.queue_summary().await.unwrap();
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.paused, 1);
    assert_eq!(summary.in_progress(), 2);

    // Pausing touched `a` after `b` was created
    let recent = h.downloader.most_recent_job("owner-1").await.unwrap().unwrap();
    assert_eq!(recent.id, a);
    assert_ne!(recent.id, b);
    assert!(h.downloader.most_recent_job("nobody").await.unwrap().is_none());
}
