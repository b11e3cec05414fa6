//! Unit tests for the access log queue: bounding, ordering, delivery
//! acknowledgment.

use access_node::events::{CredentialKind, LogEntry, LogQueue, LOG_QUEUE_MAX};

fn entry(n: usize) -> LogEntry {
    LogEntry {
        timestamp: format!("{}", n),
        door: 1,
        principal: format!("user-{}", n),
        credential: "30 33993".into(),
        credential_type: CredentialKind::Card,
        granted: true,
        reason: "Access granted".into(),
    }
}

// ============================================================================
// Bounding
// ============================================================================

#[test]
fn queue_never_exceeds_capacity() {
    let mut q = LogQueue::new();
    for n in 0..LOG_QUEUE_MAX + 50 {
        q.push(entry(n));
        assert!(q.len() <= LOG_QUEUE_MAX);
    }
    assert_eq!(q.len(), LOG_QUEUE_MAX);
}

#[test]
fn overflow_drops_oldest() {
    let mut q = LogQueue::new();
    for n in 0..LOG_QUEUE_MAX {
        q.push(entry(n));
    }
    // Entry 501 evicts entry 1 (index 0)
    q.push(entry(LOG_QUEUE_MAX));
    let (_, head) = q.peek().unwrap();
    assert_eq!(head.principal, "user-1");
}

// ============================================================================
// Ordering and delivery
// ============================================================================

#[test]
fn entries_deliver_in_insertion_order() {
    let mut q = LogQueue::new();
    for n in 0..5 {
        q.push(entry(n));
    }
    for n in 0..5 {
        let (seq, head) = q.peek().unwrap();
        assert_eq!(head.principal, format!("user-{}", n));
        q.acknowledge(seq);
    }
    assert!(q.is_empty());
}

#[test]
fn delivery_of_n_entries_shrinks_queue_by_n() {
    let mut q = LogQueue::new();
    for n in 0..10 {
        q.push(entry(n));
    }
    for _ in 0..4 {
        let (seq, _) = q.peek().unwrap();
        q.acknowledge(seq);
    }
    assert_eq!(q.len(), 6);
}

#[test]
fn peek_does_not_remove() {
    let mut q = LogQueue::new();
    q.push(entry(0));
    assert!(q.peek().is_some());
    assert!(q.peek().is_some());
    assert_eq!(q.len(), 1);
}

#[test]
fn failed_delivery_keeps_entry() {
    let mut q = LogQueue::new();
    q.push(entry(0));
    let (_seq, head) = q.peek().unwrap();
    assert_eq!(head.principal, "user-0");
    // No acknowledge: the entry stays for the next retry.
    assert_eq!(q.len(), 1);
    let (_, head) = q.peek().unwrap();
    assert_eq!(head.principal, "user-0");
}

#[test]
fn stale_acknowledge_after_overflow_is_a_no_op() {
    let mut q = LogQueue::new();
    for n in 0..LOG_QUEUE_MAX {
        q.push(entry(n));
    }
    let (seq, _) = q.peek().unwrap();

    // While the POST was in flight the queue overflowed and evicted the
    // peeked entry.
    q.push(entry(LOG_QUEUE_MAX));
    q.acknowledge(seq);

    // The acknowledge must not remove the entry that replaced it.
    assert_eq!(q.len(), LOG_QUEUE_MAX);
    let (_, head) = q.peek().unwrap();
    assert_eq!(head.principal, "user-1");
}

#[test]
fn acknowledge_only_matches_head() {
    let mut q = LogQueue::new();
    q.push(entry(0));
    q.push(entry(1));
    let (seq0, _) = q.peek().unwrap();
    q.acknowledge(seq0);
    // Re-acknowledging the same token must not eat the next entry.
    q.acknowledge(seq0);
    assert_eq!(q.len(), 1);
    assert_eq!(q.peek().unwrap().1.principal, "user-1");
}

// ============================================================================
// Offline scenario
// ============================================================================

#[test]
fn offline_attempts_queue_in_order_then_drain() {
    let mut q = LogQueue::new();

    // Link down: five attempts queue up.
    for n in 0..5 {
        q.push(entry(n));
    }
    assert_eq!(q.len(), 5);

    // Link restored: FIFO drain, empty at the end.
    let mut delivered = Vec::new();
    while let Some((seq, head)) = q.peek() {
        delivered.push(head.principal.clone());
        q.acknowledge(seq);
    }
    assert_eq!(
        delivered,
        vec!["user-0", "user-1", "user-2", "user-3", "user-4"]
    );
    assert!(q.is_empty());
}
