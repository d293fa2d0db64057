use std::time::Duration;

use super::*;

#[tokio::test(start_paused = true)]
async fn test_push_reports_full_batch() {
    let mut buffer = BatchBuffer::new(3, Duration::from_millis(10));

    assert_eq!(buffer.push(1), None);
    assert_eq!(buffer.push(2), None);
    assert_eq!(buffer.push(3), Some(3));
    assert_eq!(buffer.take(), vec![1, 2, 3]);
    assert!(buffer.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_should_flush_after_timeout() {
    let mut buffer = BatchBuffer::new(100, Duration::from_millis(10));
    assert!(!buffer.should_flush());

    buffer.push("a");
    assert!(!buffer.should_flush());

    tokio::time::advance(Duration::from_millis(11)).await;
    assert!(buffer.should_flush());
    assert_eq!(buffer.len(), 1);

    buffer.take();
    assert!(!buffer.should_flush());
}
