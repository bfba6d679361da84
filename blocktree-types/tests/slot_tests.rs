use blocktree_types::{Disposable, ErrorChannel, Slot};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |v: &T| sink.lock().push(v.clone()))
}

// ── Slot ─────────────────────────────────────────────────────────

#[test]
fn emit_reaches_every_listener_in_order() {
    let slot = Slot::new();
    let (seen, listener) = recorder::<u32>();
    let _a = slot.subscribe(listener);
    let (seen_b, listener_b) = recorder::<u32>();
    let _b = slot.subscribe(listener_b);

    slot.emit(&1);
    slot.emit(&2);

    assert_eq!(*seen.lock(), vec![1, 2]);
    assert_eq!(*seen_b.lock(), vec![1, 2]);
}

#[test]
fn disposed_subscription_stops_receiving() {
    let slot = Slot::new();
    let (seen, listener) = recorder::<&'static str>();
    let sub = slot.subscribe(listener);
    slot.emit(&"before");
    sub.dispose();
    sub.dispose();
    slot.emit(&"after");
    assert_eq!(*seen.lock(), vec!["before"]);
    assert!(sub.is_disposed());
}

#[test]
fn dropping_a_disposable_keeps_the_listener() {
    let slot = Slot::new();
    let (seen, listener) = recorder::<u8>();
    drop(slot.subscribe(listener));
    slot.emit(&9);
    assert_eq!(*seen.lock(), vec![9]);
}

#[test]
fn disposed_slot_ignores_emit_and_subscribe() {
    let slot = Slot::new();
    let (seen, listener) = recorder::<u8>();
    let _sub = slot.subscribe(listener);
    slot.dispose();
    slot.emit(&1);
    let (late, late_listener) = recorder::<u8>();
    let _late = slot.subscribe(late_listener);
    slot.emit(&2);
    assert!(seen.lock().is_empty());
    assert!(late.lock().is_empty());
    assert_eq!(slot.listener_count(), 0);
}

#[test]
fn listener_can_emit_on_the_same_slot() {
    let slot: Slot<u32> = Slot::new();
    let count = Arc::new(AtomicUsize::new(0));
    let inner_slot = slot.clone();
    let c = Arc::clone(&count);
    let _sub = slot.subscribe(move |n| {
        c.fetch_add(1, Ordering::SeqCst);
        if *n > 0 {
            inner_slot.emit(&(n - 1));
        }
    });
    slot.emit(&3);
    assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[test]
fn disposable_runs_its_action_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    let d = Disposable::new(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    d.dispose();
    d.dispose();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(Disposable::noop().is_disposed());
}

// ── ErrorChannel ─────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("boom {0}")]
struct Boom(u32);

#[test]
fn error_channel_delivers_to_subscribers() {
    let channel: ErrorChannel<Boom> = ErrorChannel::new("test");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = channel.subscribe(move |e| s.lock().push(e.to_string()));
    channel.report(Boom(1));
    assert_eq!(*seen.lock(), vec!["boom 1".to_string()]);
}

#[test]
fn error_channel_without_subscribers_does_not_panic() {
    let channel: ErrorChannel<Boom> = ErrorChannel::new("test");
    channel.report(Boom(2));
}
