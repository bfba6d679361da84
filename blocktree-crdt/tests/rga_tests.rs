use blocktree_crdt::{ElementId, RGA};
use blocktree_types::{HybridTimestamp, PeerId};
use pretty_assertions::assert_eq;

fn peer(n: u8) -> PeerId {
    PeerId::from_uuid(uuid::Uuid::from_bytes([
        n, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]))
}

fn eid(wall: u64, p: u8, seq: u32) -> ElementId {
    ElementId::new(HybridTimestamp::new(wall, 0), peer(p), seq)
}

/// Appends `s` one character after another, minting ids from `wall`.
fn typed(s: &str, p: u8, wall: u64) -> RGA<char> {
    let mut rga = RGA::new();
    let mut origin = ElementId::root();
    for (i, c) in s.chars().enumerate() {
        let id = eid(wall + i as u64, p, i as u32 + 1);
        rga.insert_with_id(id, origin, c);
        origin = id;
    }
    rga
}

// ── ElementId ────────────────────────────────────────────────────

#[test]
fn root_is_recognized() {
    assert!(ElementId::root().is_root());
    assert!(!eid(1, 1, 1).is_root());
}

#[test]
fn element_id_string_form_keeps_logical_counter() {
    let id = ElementId::new(HybridTimestamp::new(12_345, 9), peer(3), 7);
    let parsed: ElementId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn element_id_rejects_garbage() {
    assert!("bad".parse::<ElementId>().is_err());
    assert!("1.0:nope:3".parse::<ElementId>().is_err());
    assert!("1:00000000-0000-0000-0000-000000000000:0".parse::<ElementId>().is_err());
}

#[test]
fn element_ids_order_by_time_then_peer_then_seq() {
    assert!(eid(1, 9, 9) < eid(2, 0, 0));
    assert!(eid(5, 1, 9) < eid(5, 2, 0));
    assert!(eid(5, 1, 1) < eid(5, 1, 2));
}

// ── Sequencing ───────────────────────────────────────────────────

#[test]
fn chained_inserts_read_in_order() {
    let rga = typed("hello", 1, 10);
    assert_eq!(rga.as_string(), "hello");
    assert_eq!(rga.len(), 5);
    assert_eq!(rga.get(1), Some(&'e'));
}

#[test]
fn later_insert_at_same_origin_comes_first() {
    let mut rga = RGA::new();
    rga.insert_with_id(eid(1, 1, 1), ElementId::root(), 'a');
    rga.insert_with_id(eid(2, 1, 2), ElementId::root(), 'b');
    assert_eq!(rga.as_string(), "ba");
}

#[test]
fn origin_for_index_anchors_head_and_tail() {
    let rga = typed("abc", 1, 10);
    assert!(rga.origin_for_index(0).is_root());
    assert_eq!(rga.origin_for_index(1), rga.element_id_at(0).unwrap());
    assert_eq!(rga.origin_for_index(3), rga.element_id_at(2).unwrap());
    assert_eq!(rga.origin_for_index(99), rga.element_id_at(2).unwrap());
}

#[test]
fn delete_leaves_a_tombstone() {
    let mut rga = typed("abc", 1, 10);
    let b = rga.element_id_at(1).unwrap();
    assert_eq!(rga.delete_by_id(&b), Some('b'));
    assert_eq!(rga.delete_by_id(&b), None);
    assert_eq!(rga.as_string(), "ac");
    assert!(rga.is_tombstoned(&b));
    assert!(rga.contains_element(&b));
    assert_eq!(rga.index_of(&b), None);
    assert_eq!(rga.element_ids_in_order().len(), 3);
}

#[test]
fn insert_after_tombstone_restores_position() {
    let mut rga = typed("abc", 1, 10);
    let b = rga.element_id_at(1).unwrap();
    rga.delete_by_id(&b);
    rga.insert_with_id(eid(100, 1, 50), b, 'B');
    assert_eq!(rga.as_string(), "aBc");
}

#[test]
fn duplicate_insert_is_ignored() {
    let mut rga = RGA::new();
    let id = eid(1, 1, 1);
    rga.insert_with_id(id, ElementId::root(), 'x');
    rga.insert_with_id(id, ElementId::root(), 'y');
    assert_eq!(rga.as_string(), "x");
}

#[test]
fn find_locates_values() {
    let mut rga = RGA::new();
    rga.insert_with_id(eid(1, 1, 1), ElementId::root(), "n1".to_string());
    let p1 = eid(2, 1, 2);
    rga.insert_with_id(p1, eid(1, 1, 1), "p1".to_string());
    assert_eq!(rga.find(&"p1".to_string()), Some(p1));
    assert_eq!(rga.find(&"zz".to_string()), None);
}

// ── Merge ────────────────────────────────────────────────────────

#[test]
fn concurrent_appends_converge() {
    let base = typed("ab", 1, 10);
    let tail = base.element_id_at(1).unwrap();

    let mut left = base.clone();
    left.insert_with_id(eid(50, 2, 1), tail, 'X');
    let mut right = base.clone();
    right.insert_with_id(eid(50, 3, 1), tail, 'Y');

    let mut lr = left.clone();
    lr.merge(&right);
    let mut rl = right.clone();
    rl.merge(&left);

    assert_eq!(lr.as_string(), rl.as_string());
    assert_eq!(lr.as_string(), "abYX");
}

#[test]
fn merge_propagates_deletes() {
    let base = typed("abc", 1, 10);
    let mut left = base.clone();
    left.delete_by_id(&base.element_id_at(0).unwrap());
    let mut right = base.clone();
    right.merge(&left);
    assert_eq!(right.as_string(), "bc");
}

#[test]
fn json_round_trip_preserves_order_and_tombstones() {
    let mut rga = typed("abc", 1, 10);
    rga.delete_by_id(&rga.element_id_at(1).unwrap());
    let json = serde_json::to_string(&rga).unwrap();
    let back: RGA<char> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rga);
    assert_eq!(back.as_string(), "ac");
}
