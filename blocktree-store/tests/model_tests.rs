use blocktree_schema::affine::{self, NOTE, PAGE, PARAGRAPH};
use blocktree_store::{Doc, PropsUpdated, Store, StoreError, StoreOptions};
use blocktree_sync::DocReplica;
use blocktree_types::{AutoIncrementIdGenerator, BlockId, PeerScopedIdGenerator};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn id(s: &str) -> BlockId {
    BlockId::from(s)
}

/// page "0" -> note "1" -> paragraph "2" ("hi")
fn seeded() -> Store {
    let doc = Doc::builder("doc", Arc::new(affine::schema().unwrap()))
        .id_generator(Arc::new(AutoIncrementIdGenerator::new()))
        .build();
    doc.load().unwrap();
    let store = doc.get_store(StoreOptions::default()).unwrap();
    let page = store.add_block(PAGE, json!({}), None, None).unwrap();
    let note = store.add_block(NOTE, json!({}), Some(&page), None).unwrap();
    store
        .add_block(PARAGRAPH, json!({ "text": "hi" }), Some(&note), None)
        .unwrap();
    store
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&()) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    (count, move |_: &()| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn props_updated_names_the_changed_key() {
    let store = seeded();
    let para = store.get_model(&id("2")).unwrap();
    let keys = Arc::new(Mutex::new(Vec::new()));
    let sink = keys.clone();
    let _sub = para
        .props_updated()
        .subscribe(move |u: &PropsUpdated| sink.lock().push(u.key.clone()));

    store.update_block(&id("2"), json!({ "type": "quote" })).unwrap();
    // Writing the current value is not a change.
    store.update_block(&id("2"), json!({ "type": "quote" })).unwrap();

    assert_eq!(*keys.lock(), vec!["type".to_owned()]);
    assert_eq!(para.prop("type").unwrap(), Some(json!("quote")));
}

#[test]
fn children_updated_fires_and_refreshes_the_cache() {
    let store = seeded();
    let note = store.get_model(&id("1")).unwrap();
    assert_eq!(note.child_ids(), vec![id("2")]);
    let (fired, listener) = counter();
    let _sub = note.children_updated().subscribe(listener);

    let added = store
        .add_block(PARAGRAPH, json!({}), Some(&id("1")), None)
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(note.child_ids(), vec![id("2"), added.clone()]);
    assert_eq!(note.child_index(&added), Some(1));
    assert_eq!(note.first_child().unwrap().id(), &id("2"));
}

#[test]
fn text_updated_fires_on_text_edits() {
    let store = seeded();
    let para = store.get_model(&id("2")).unwrap();
    let (fired, listener) = counter();
    let _sub = para.text_updated().subscribe(listener);

    store.insert_text(&id("2"), 2, "!").unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(para.text().unwrap().as_deref(), Some("hi!"));
}

#[test]
fn deleted_fires_once_then_the_model_is_detached() {
    let store = seeded();
    let para = store.get_model(&id("2")).unwrap();
    let (fired, listener) = counter();
    let _sub = para.deleted().subscribe(listener);

    store.capture_sync();
    store.delete_block(&id("2")).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!para.is_attached());
    assert!(para.deleted().is_disposed());
    assert!(matches!(para.props(), Err(StoreError::Detached(_))));
    assert!(matches!(para.text(), Err(StoreError::Detached(_))));

    // Undo brings the block back under a fresh model.
    store.undo().unwrap();
    let back = store.get_model(&id("2")).unwrap();
    assert!(!Arc::ptr_eq(&para, &back));
    assert!(back.is_attached());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn created_fires_when_a_model_is_attached() {
    let store = seeded();
    let created = Arc::new(AtomicUsize::new(0));
    let seen = created.clone();
    let models = store.clone();
    let _sub = store.block_updated().subscribe(move |update| {
        if let Some(model) = models.get_model(&update.id) {
            // Already attached by the time the store reports the add.
            assert!(model.is_attached());
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    store.add_block(PARAGRAPH, json!({}), Some(&id("1")), None).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn tree_navigation() {
    let store = seeded();
    let page = store.root().unwrap();
    let para = store.get_model(&id("2")).unwrap();

    assert_eq!(page.last_child().id(), &id("2"));
    assert!(Arc::ptr_eq(&para.last_child(), &para));
    assert!(para.is_empty());
    assert!(!page.is_empty());
    assert!(page.parent().is_none());
    assert_eq!(para.parent().unwrap().parent().unwrap().id(), &id("0"));
}

#[test]
fn typed_props_reject_mismatched_types() {
    let store = seeded();
    let para = store.get_model(&id("2")).unwrap();
    assert!(matches!(
        para.props_as::<affine::NoteProps>(),
        Err(StoreError::Props { .. })
    ));
}

// ── Replicas ─────────────────────────────────────────────────────

fn replica(client: u64) -> Arc<Doc> {
    let doc = Doc::builder("shared", Arc::new(affine::schema().unwrap()))
        .id_generator(Arc::new(PeerScopedIdGenerator::new(client)))
        .build();
    doc.load().unwrap();
    doc
}

fn exchange(from: &Doc, to: &Doc) {
    for update in from.updates_since(&to.state_vector()) {
        to.apply_remote(update);
    }
}

#[test]
fn replicas_converge_and_update_their_stores() {
    let left = replica(1);
    let right = replica(2);
    let left_store = left.get_store(StoreOptions::default()).unwrap();
    let right_store = right.get_store(StoreOptions::default()).unwrap();

    let page = left_store.add_block(PAGE, json!({}), None, None).unwrap();
    let note = left_store
        .add_block(NOTE, json!({}), Some(&page), None)
        .unwrap();
    exchange(&left, &right);

    assert_eq!(right_store.root().unwrap().id(), &page);
    let para = right_store
        .add_block(PARAGRAPH, json!({ "text": "from right" }), Some(&note), None)
        .unwrap();
    left_store
        .add_block(PARAGRAPH, json!({ "text": "from left" }), Some(&note), None)
        .unwrap();
    exchange(&left, &right);
    exchange(&right, &left);

    let left_children = left_store.get_model(&note).unwrap().child_ids();
    let right_children = right_store.get_model(&note).unwrap().child_ids();
    assert_eq!(left_children.len(), 2);
    assert_eq!(left_children, right_children);
    assert_eq!(
        left_store.get_model(&para).unwrap().text().unwrap().as_deref(),
        Some("from right")
    );
    assert_eq!(left_store.block_count(), right_store.block_count());
}

#[test]
fn remote_changes_stay_out_of_the_undo_history() {
    let left = replica(1);
    let right = replica(2);
    let left_store = left.get_store(StoreOptions::default()).unwrap();
    left_store.add_block(PAGE, json!({}), None, None).unwrap();
    exchange(&left, &right);

    let right_store = right.get_store(StoreOptions::default()).unwrap();
    assert_eq!(right_store.block_count(), 1);
    assert!(!right.can_undo());
    assert!(!right.undo().unwrap());
    assert_eq!(right_store.block_count(), 1);
}

#[test]
fn disposed_replicas_ignore_remote_updates() {
    let left = replica(1);
    let right = replica(2);
    left.get_store(StoreOptions::default())
        .unwrap()
        .add_block(PAGE, json!({}), None, None)
        .unwrap();
    right.dispose();
    exchange(&left, &right);
    assert!(right.with_space(|s| s.is_empty()));
}

/// Every listed child names its lister as parent, no block is listed
/// twice, and walking up from any block ends.
fn assert_single_parent_tree(store: &Store) {
    let blocks = store.blocks();
    let mut listed = std::collections::HashSet::new();
    for block in &blocks {
        let model = store.get_model(block.id()).unwrap();
        for child in model.child_ids() {
            assert!(listed.insert(child.clone()), "{child} listed twice");
            assert_eq!(store.get_parent(&child).unwrap().id(), block.id());
        }
        let mut current = model.clone();
        for _ in 0..=blocks.len() {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        assert!(current.parent().is_none(), "{} sits on a parent cycle", block.id());
        let _ = model.last_child();
    }
}

/// page -> note -> three paragraphs, created on `left` and shared with
/// `right`. Returns the paragraph ids.
fn shared_note(left: &Arc<Doc>, right: &Arc<Doc>) -> (BlockId, Vec<BlockId>) {
    let store = left.get_store(StoreOptions::default()).unwrap();
    let page = store.add_block(PAGE, json!({}), None, None).unwrap();
    let note = store.add_block(NOTE, json!({}), Some(&page), None).unwrap();
    let paragraphs = (0..3)
        .map(|_| store.add_block(PARAGRAPH, json!({}), Some(&note), None).unwrap())
        .collect();
    exchange(left, right);
    (note, paragraphs)
}

#[test]
fn concurrent_moves_to_different_parents_keep_one_parent() {
    let left = replica(1);
    let right = replica(2);
    let (note, paragraphs) = shared_note(&left, &right);
    let (p1, p2, x) = (&paragraphs[0], &paragraphs[1], &paragraphs[2]);
    let left_store = left.get_store(StoreOptions::default()).unwrap();
    let right_store = right.get_store(StoreOptions::default()).unwrap();

    left_store.move_blocks(std::slice::from_ref(x), p1, None).unwrap();
    right_store.move_blocks(std::slice::from_ref(x), p2, None).unwrap();
    assert_eq!(right_store.get_model(p2).unwrap().child_ids(), vec![x.clone()]);
    exchange(&left, &right);
    exchange(&right, &left);

    for store in [&left_store, &right_store] {
        assert_eq!(store.get_parent(x).unwrap().id(), p1);
        assert_eq!(store.get_model(p1).unwrap().child_ids(), vec![x.clone()]);
        assert!(store.get_model(p2).unwrap().child_ids().is_empty());
        assert_eq!(
            store.get_model(&note).unwrap().child_ids(),
            vec![p1.clone(), p2.clone()]
        );
        assert_single_parent_tree(store);
    }

    // Indices keep referring to what the models show.
    right_store
        .add_block(PARAGRAPH, json!({}), Some(p2), Some(0))
        .unwrap();
    assert_eq!(right_store.get_model(p2).unwrap().child_ids().len(), 1);
    right_store.move_blocks(std::slice::from_ref(x), p2, Some(1)).unwrap();
    assert_eq!(right_store.get_model(p2).unwrap().child_ids()[1], *x);
    assert!(right_store.get_model(p1).unwrap().child_ids().is_empty());
    assert_single_parent_tree(&right_store);
}

#[test]
fn crossing_moves_do_not_leave_a_cycle() {
    let left = replica(1);
    let right = replica(2);
    let (note, paragraphs) = shared_note(&left, &right);
    let (a, b) = (&paragraphs[0], &paragraphs[1]);
    let left_store = left.get_store(StoreOptions::default()).unwrap();
    let right_store = right.get_store(StoreOptions::default()).unwrap();

    left_store.move_blocks(std::slice::from_ref(a), b, None).unwrap();
    right_store.move_blocks(std::slice::from_ref(b), a, None).unwrap();
    exchange(&left, &right);
    exchange(&right, &left);

    for store in [&left_store, &right_store] {
        // The smaller block of the cycle returns to where it was taken from.
        assert_eq!(store.get_parent(a).unwrap().id(), &note);
        assert_eq!(store.get_parent(b).unwrap().id(), a);
        assert_eq!(
            store.get_model(&note).unwrap().child_ids(),
            vec![a.clone(), paragraphs[2].clone()]
        );
        assert_eq!(store.get_model(&note).unwrap().last_child().id(), &paragraphs[2]);
        assert_eq!(store.get_model(a).unwrap().last_child().id(), b);
        assert_single_parent_tree(store);
    }
}
