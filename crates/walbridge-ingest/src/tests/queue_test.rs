use crate::IngestQueue;

#[test]
fn test_overflow_drops_exactly_the_excess() {
    let (queue, _lines) = IngestQueue::bounded(8);
    let accepted = (0..11)
        .filter(|i| queue.enqueue(format!("t v={}i\n", i)))
        .count();
    assert_eq!(accepted, 8);
    assert_eq!(queue.dropped(), 3);
    assert_eq!(queue.len(), 8);
    assert_eq!(queue.capacity(), 8);
}

#[tokio::test]
async fn test_fifo_order_and_len() {
    let (queue, mut lines) = IngestQueue::bounded(4);
    assert!(queue.is_empty());
    queue.enqueue("a\n".to_string());
    queue.enqueue("b\n".to_string());
    assert_eq!(queue.len(), 2);
    assert_eq!(lines.recv().await.unwrap(), "a\n");
    assert_eq!(lines.recv().await.unwrap(), "b\n");
    assert!(queue.is_empty());
}

#[test]
fn test_closed_queue_counts_drops() {
    let (queue, lines) = IngestQueue::bounded(4);
    drop(lines);
    assert!(!queue.enqueue("a\n".to_string()));
    assert_eq!(queue.dropped(), 1);
}
