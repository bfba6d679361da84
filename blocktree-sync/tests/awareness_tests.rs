use blocktree_sync::{
    AwarenessEngine, AwarenessEventKind, AwarenessStore, Flags, LocalAwarenessHub, UserInfo,
};
use blocktree_types::{DocId, PeerId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn store() -> Arc<AwarenessStore> {
    Arc::new(AwarenessStore::new(PeerId::new(), Flags::default()))
}

// ── Flags ────────────────────────────────────────────────────────

#[test]
fn default_flags_match_the_preset() {
    let flags = Flags::default();
    assert!(flags.enable_edgeless_text);
    assert!(!flags.enable_block_query);
    assert!(flags.readonly.is_empty());
}

#[test]
fn partial_flags_deserialize_with_defaults() {
    let flags: Flags = serde_json::from_value(json!({ "enable_lasso_tool": true })).unwrap();
    assert!(flags.enable_lasso_tool);
    assert!(flags.enable_edgeless_text);
}

#[test]
fn flags_are_read_and_written_by_name() {
    let store = store();
    assert_eq!(store.get_flag("enable_pie_menu"), Some(json!(false)));

    store.set_flag("enable_pie_menu", json!(true)).unwrap();
    assert_eq!(store.get_flag("enable_pie_menu"), Some(json!(true)));
    assert!(store.flags().enable_pie_menu);
}

#[test]
fn unknown_or_mistyped_flags_are_rejected() {
    let store = store();
    assert!(store.set_flag("enable_teleport", json!(true)).is_err());
    assert!(store.set_flag("enable_pie_menu", json!("yes")).is_err());
    assert_eq!(store.flags(), Flags::default());
}

#[test]
fn readonly_is_tracked_per_doc() {
    let store = store();
    let a = DocId::from("a");
    let b = DocId::from("b");

    assert!(!store.is_readonly(&a));
    store.set_readonly(&a, true);
    assert!(store.is_readonly(&a));
    assert!(!store.is_readonly(&b));

    store.set_readonly(&a, false);
    assert!(!store.is_readonly(&a));
}

#[test]
fn local_selection_is_kept_per_manager() {
    let store = store();
    assert!(store.get_local_selection("editor").is_empty());

    store.set_local_selection("editor", vec![json!({ "type": "block", "id": "p1" })]);
    store.set_local_selection("surface", vec![json!({ "id": "shape" })]);

    assert_eq!(
        store.get_local_selection("editor"),
        vec![json!({ "type": "block", "id": "p1" })]
    );
    assert_eq!(store.local_state().selection.len(), 2);
}

// ── Events ───────────────────────────────────────────────────────

#[test]
fn remote_states_emit_add_update_remove() {
    let store = store();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    let _sub = store.update().subscribe(move |event| sink.lock().push(event.kind));

    let peer = PeerId::new();
    let mut state = store.local_state();
    store.apply_remote(peer, Some(state.clone()));
    state.color = Some("#ff0000".into());
    store.apply_remote(peer, Some(state.clone()));
    // Identical state: no event.
    store.apply_remote(peer, Some(state));
    store.apply_remote(peer, None);
    store.apply_remote(peer, None);

    assert_eq!(
        *kinds.lock(),
        vec![
            AwarenessEventKind::Add,
            AwarenessEventKind::Update,
            AwarenessEventKind::Remove
        ]
    );
}

#[test]
fn states_claiming_the_local_client_are_ignored() {
    let store = store();
    let mut forged = store.local_state();
    forged.color = Some("forged".into());
    store.apply_remote(store.client_id(), Some(forged));
    assert_eq!(store.local_state().color, None);
}

// ── Local hub ────────────────────────────────────────────────────

#[test]
fn hub_relays_states_between_stores() {
    let hub = LocalAwarenessHub::new();
    let left = store();
    let right = store();
    let left_engine = AwarenessEngine::new(left.clone(), vec![hub.source()]);
    let right_engine = AwarenessEngine::new(right.clone(), vec![hub.source()]);

    left.set_user(UserInfo {
        name: "left".into(),
    });
    left_engine.connect();
    right_engine.connect();
    assert_eq!(hub.peer_count(), 2);

    let seen_by_right = right.states();
    assert_eq!(seen_by_right.len(), 2);
    assert_eq!(
        seen_by_right[&left.client_id()].user,
        Some(UserInfo {
            name: "left".into()
        })
    );
    assert!(left.states().contains_key(&right.client_id()));

    right.set_color("#00ff00");
    assert_eq!(
        left.states()[&right.client_id()].color.as_deref(),
        Some("#00ff00")
    );

    right_engine.disconnect();
    assert_eq!(hub.peer_count(), 1);
    assert!(!left.states().contains_key(&right.client_id()));
    assert_eq!(right.states().len(), 1);

    left_engine.disconnect();
    assert_eq!(hub.peer_count(), 0);
}
