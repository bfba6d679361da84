use blocktree_command::std_commands::{
    CanIndentBlock, DedentBlock, DeleteBlocks, GetBlockIndex, GetNextBlock, GetPrevBlock,
    GetSelectedBlocks, IndentBlock, InsertBlock, MoveBlocks,
};
use blocktree_command::{BlockStdScope, CommandError, Context, Selection, keys};
use blocktree_schema::affine::{self, NOTE, PAGE, PARAGRAPH};
use blocktree_store::{
    CreateDocOptions, Doc, Query, QueryMatch, Store, StoreOptions, ViewType, Workspace,
};
use blocktree_sync::AwarenessState;
use blocktree_types::{AutoIncrementIdGenerator, BlockId, PeerId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn id(s: &str) -> BlockId {
    BlockId::from(s)
}

/// page "0" -> note "1" -> paragraphs "2", "3", "4"
fn doc() -> Arc<Doc> {
    let doc = Doc::builder("doc", Arc::new(affine::schema().unwrap()))
        .id_generator(Arc::new(AutoIncrementIdGenerator::new()))
        .capture_timeout(Duration::ZERO)
        .build();
    doc.load_with(|tx| {
        let page = tx.add_block(PAGE, json!({}), None, None)?;
        let note = tx.add_block(NOTE, json!({}), Some(&page), None)?;
        for _ in 0..3 {
            tx.add_block(PARAGRAPH, json!({}), Some(&note), None)?;
        }
        Ok(())
    })
    .unwrap();
    doc
}

fn scope() -> BlockStdScope {
    BlockStdScope::new(doc().get_store(StoreOptions::default()).unwrap())
}

fn on(block: &str) -> Context {
    Context::new().with(&keys::BLOCK_ID, id(block))
}

fn children(store: &Store, parent: &str) -> Vec<BlockId> {
    store.get_model(&id(parent)).unwrap().child_ids()
}

fn ids(list: &[&str]) -> Vec<BlockId> {
    list.iter().map(|s| id(s)).collect()
}

fn collect_errors(std: &BlockStdScope) -> Arc<Mutex<Vec<String>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let _ = std
        .command()
        .errors()
        .subscribe(move |e: &Arc<CommandError>| sink.lock().push(e.command().to_owned()));
    errors
}

// ── lookups ──────────────────────────────────────────────────────

#[test]
fn runs_carry_the_std_scope() {
    let std = scope();
    let (ok, ctx) = std.command().chain().run();
    assert!(ok);
    assert_eq!(ctx.std().unwrap().store().id(), std.store().id());
}

#[test]
fn get_block_index() {
    let std = scope();
    let (ok, ctx) = std.command().exec(GetBlockIndex, Some(on("3")));
    assert!(ok);
    assert_eq!(ctx.get(&keys::BLOCK_INDEX), Some(&1));
    assert_eq!(ctx.get(&keys::PARENT_BLOCK).unwrap().id(), &id("1"));

    let (ok, _) = std.command().exec(GetBlockIndex, Some(on("0")));
    assert!(!ok);
}

#[test]
fn get_prev_and_next_block() {
    let std = scope();
    let (ok, ctx) = std
        .command()
        .chain()
        .with(on("3"))
        .pipe(GetPrevBlock)
        .pipe(GetNextBlock)
        .run();
    assert!(ok);
    assert_eq!(ctx.get(&keys::PREV_BLOCK).unwrap().id(), &id("2"));
    assert_eq!(ctx.get(&keys::NEXT_BLOCK).unwrap().id(), &id("4"));

    assert!(!std.command().exec(GetPrevBlock, Some(on("2"))).0);
    assert!(!std.command().exec(GetNextBlock, Some(on("4"))).0);
}

#[test]
fn missing_inputs_fail_the_run() {
    let std = scope();
    let errors = collect_errors(&std);
    let (ok, _) = std.command().exec(GetPrevBlock, None);
    assert!(!ok);
    assert_eq!(*errors.lock(), vec!["get_prev_block".to_owned()]);
}

#[test]
fn get_selected_blocks() {
    let std = scope();
    assert!(!std.command().exec(GetSelectedBlocks, None).0);

    std.selection()
        .set(vec![Selection::block("4"), Selection::block("2")]);
    let (ok, ctx) = std.command().exec(GetSelectedBlocks, None);
    assert!(ok);
    let selected: Vec<BlockId> = ctx
        .get(&keys::SELECTED_BLOCKS)
        .unwrap()
        .iter()
        .map(|m| m.id().clone())
        .collect();
    assert_eq!(selected, ids(&["4", "2"]));

    std.selection().set(vec![Selection::text("3", 0, 0)]);
    let (ok, ctx) = std.command().exec(GetSelectedBlocks, None);
    assert!(ok);
    assert_eq!(ctx.get(&keys::SELECTED_BLOCKS).unwrap()[0].id(), &id("3"));
}

// ── mutations ────────────────────────────────────────────────────

#[test]
fn insert_block_under_a_parent() {
    let std = scope();
    let input = Context::new()
        .with(&keys::FLAVOUR, PARAGRAPH.to_owned())
        .with(&keys::PROPS, json!({ "type": "h1" }))
        .with(&keys::PARENT_ID, id("1"))
        .with(&keys::INDEX, 0);
    let (ok, ctx) = std.command().exec(InsertBlock, Some(input));
    assert!(ok);

    let inserted = ctx.get(&keys::INSERTED_ID).unwrap().clone();
    assert_eq!(children(std.store(), "1")[0], inserted);
    let model = std.store().get_model(&inserted).unwrap();
    assert_eq!(model.prop("type").unwrap(), Some(json!("h1")));
}

#[test]
fn insert_block_after_a_sibling() {
    let std = scope();
    let input = on("2").with(&keys::FLAVOUR, PARAGRAPH.to_owned());
    let (ok, ctx) = std.command().exec(InsertBlock, Some(input));
    assert!(ok);
    let inserted = ctx.get(&keys::INSERTED_ID).unwrap().clone();
    assert_eq!(
        children(std.store(), "1"),
        vec![id("2"), inserted, id("3"), id("4")]
    );
}

#[test]
fn invalid_inserts_fail_without_changes() {
    let std = scope();
    let errors = collect_errors(&std);

    // A paragraph cannot sit under the page.
    let input = Context::new()
        .with(&keys::FLAVOUR, PARAGRAPH.to_owned())
        .with(&keys::PARENT_ID, id("0"));
    assert!(!std.command().exec(InsertBlock, Some(input)).0);

    // Neither a parent nor a sibling.
    let input = Context::new().with(&keys::FLAVOUR, PARAGRAPH.to_owned());
    assert!(!std.command().exec(InsertBlock, Some(input)).0);

    assert_eq!(std.store().block_count(), 5);
    assert_eq!(errors.lock().len(), 2);
}

#[test]
fn readonly_stores_reject_commands() {
    let doc = doc();
    let std = BlockStdScope::new(doc.get_store(StoreOptions::readonly()).unwrap());
    let input = on("4").with(&keys::FLAVOUR, PARAGRAPH.to_owned());
    assert!(!std.command().exec(InsertBlock, Some(input)).0);
    assert_eq!(std.store().block_count(), 5);
}

#[test]
fn delete_selected_blocks_in_one_step() {
    let std = scope();
    let nested = std
        .store()
        .add_block(PARAGRAPH, json!({}), Some(&id("2")), None)
        .unwrap();
    std.store().capture_sync();
    std.selection().set(vec![
        Selection::block("2"),
        Selection::block(nested.clone()),
        Selection::text("4", 0, 1),
    ]);

    let (ok, _) = std
        .command()
        .chain()
        .pipe(GetSelectedBlocks)
        .pipe(DeleteBlocks)
        .run();
    assert!(ok);
    assert_eq!(children(std.store(), "1"), ids(&["3", "4"]));
    assert!(!std.store().has_block(&nested));
    // Only the selection on a surviving block is kept.
    assert_eq!(std.selection().value(), vec![Selection::text("4", 0, 1)]);

    std.store().undo().unwrap();
    assert_eq!(children(std.store(), "1"), ids(&["2", "3", "4"]));
    assert!(std.store().has_block(&nested));
}

#[test]
fn delete_blocks_needs_something_to_delete() {
    let std = scope();
    assert!(!std.command().exec(DeleteBlocks, None).0);
}

#[test]
fn move_blocks() {
    let std = scope();
    let input = Context::new()
        .with(&keys::BLOCK_IDS, ids(&["4"]))
        .with(&keys::PARENT_ID, id("1"))
        .with(&keys::INDEX, 0);
    assert!(std.command().exec(MoveBlocks, Some(input)).0);
    assert_eq!(children(std.store(), "1"), ids(&["4", "2", "3"]));

    let cyclic = Context::new()
        .with(&keys::BLOCK_IDS, ids(&["1"]))
        .with(&keys::PARENT_ID, id("2"));
    assert!(!std.command().exec(MoveBlocks, Some(cyclic)).0);
}

#[test]
fn indent_into_the_previous_sibling() {
    let std = scope();
    assert!(!std.command().exec(CanIndentBlock, Some(on("2"))).0);

    let (ok, ctx) = std
        .command()
        .chain()
        .with(on("3"))
        .pipe(CanIndentBlock)
        .pipe(IndentBlock)
        .run();
    assert!(ok);
    assert_eq!(ctx.get(&keys::INDENT_TARGET), Some(&id("2")));
    assert_eq!(children(std.store(), "1"), ids(&["2", "4"]));
    assert_eq!(children(std.store(), "2"), ids(&["3"]));

    // Without a resolved target the command finds it itself.
    assert!(std.command().exec(IndentBlock, Some(on("4"))).0);
    assert_eq!(children(std.store(), "2"), ids(&["3", "4"]));
}

#[test]
fn dedent_takes_the_following_siblings_along() {
    let std = scope();
    std.store()
        .move_blocks(&ids(&["3", "4"]), &id("2"), None)
        .unwrap();

    assert!(std.command().exec(DedentBlock, Some(on("3"))).0);
    assert_eq!(children(std.store(), "1"), ids(&["2", "3"]));
    assert_eq!(children(std.store(), "2"), Vec::<BlockId>::new());
    assert_eq!(children(std.store(), "3"), ids(&["4"]));
}

#[test]
fn dedent_stops_where_the_schema_forbids_it() {
    let std = scope();
    // The paragraph would end up under the page.
    assert!(!std.command().exec(DedentBlock, Some(on("2"))).0);
    assert_eq!(children(std.store(), "1"), ids(&["2", "3", "4"]));
}

#[test]
fn try_any_falls_back_to_the_next_strategy() {
    let std = scope();
    // The first paragraph cannot be indented, so the chain inserts a
    // sibling instead.
    let (ok, ctx) = std
        .command()
        .chain()
        .with(on("2"))
        .try_any(|cmd| {
            vec![
                cmd.chain().pipe(CanIndentBlock).pipe(IndentBlock),
                cmd.chain().pipe_with(
                    InsertBlock,
                    Context::new().with(&keys::FLAVOUR, PARAGRAPH.to_owned()),
                ),
            ]
        })
        .run();

    assert!(ok);
    assert!(!ctx.contains(&keys::INDENT_TARGET));
    let inserted = ctx.get(&keys::INSERTED_ID).unwrap();
    assert_eq!(children(std.store(), "1")[1], *inserted);
}

#[test]
fn consecutive_chains_see_each_others_effects() {
    let std = scope();
    let (ok, ctx) = std.command().exec(
        InsertBlock,
        Some(on("4").with(&keys::FLAVOUR, PARAGRAPH.to_owned())),
    );
    assert!(ok);
    let inserted = ctx.get(&keys::INSERTED_ID).unwrap().clone();

    let (ok, ctx) = std.command().exec(
        GetBlockIndex,
        Some(Context::new().with(&keys::BLOCK_ID, inserted)),
    );
    assert!(ok);
    assert_eq!(ctx.get(&keys::BLOCK_INDEX), Some(&3));
}

// ── selection ────────────────────────────────────────────────────

#[test]
fn selections_are_published_through_awareness() {
    let ws = Workspace::new(affine::schema().unwrap());
    let store = ws.create_doc(CreateDocOptions::with_id("a")).unwrap();
    let page = store.add_block(PAGE, json!({}), None, None).unwrap();
    let std = BlockStdScope::new(store);

    let changes = Arc::new(Mutex::new(0));
    let seen = changes.clone();
    let _sub = std.selection().changed().subscribe(move |_| *seen.lock() += 1);

    std.selection().set(vec![Selection::block(page.clone())]);
    assert_eq!(*changes.lock(), 1);
    let published = ws.awareness().get_local_selection(std.selection().id());
    assert_eq!(
        published,
        vec![json!({ "type": "block", "blockId": page.as_str() })]
    );

    let peer = PeerId::new();
    let mut state = AwarenessState::default();
    state.selection.insert(
        std.selection().id().to_owned(),
        vec![json!({ "type": "text", "from": { "blockId": page.as_str(), "index": 1, "length": 2 } })],
    );
    ws.awareness().apply_remote(peer, Some(state));

    let remote = std.selection().remote();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[&peer], vec![Selection::text(page.clone(), 1, 2)]);

    std.selection().clear();
    assert!(ws.awareness().get_local_selection(std.selection().id()).is_empty());
}

// ── filtered stores ──────────────────────────────────────────────

/// A scope over `doc` whose store shows only `shown`.
fn filtered(doc: &Arc<Doc>, shown: &[&str]) -> BlockStdScope {
    let query = Query::strict(
        shown
            .iter()
            .map(|s| QueryMatch::id(*s, ViewType::Display))
            .collect(),
    );
    BlockStdScope::new(doc.get_store(StoreOptions::with_query(query)).unwrap())
}

fn doc_children(doc: &Doc, parent: &str) -> Vec<BlockId> {
    doc.with_space(|space| space.children_of(&id(parent)))
}

#[test]
fn insert_after_a_block_counts_hidden_siblings() {
    let doc = doc();
    let std = filtered(&doc, &["0", "1", "2", "4"]);
    let input = on("4").with(&keys::FLAVOUR, PARAGRAPH.to_owned());

    let (ok, ctx) = std.command().exec(InsertBlock, Some(input));

    assert!(ok);
    assert_eq!(ctx.get(&keys::INSERTED_ID), Some(&id("5")));
    assert_eq!(doc_children(&doc, "1"), ids(&["2", "3", "4", "5"]));
}

#[test]
fn dedent_lands_after_the_parent_past_hidden_siblings() {
    let doc = doc();
    doc.get_store(StoreOptions::default())
        .unwrap()
        .add_block(PARAGRAPH, json!({}), Some(&id("3")), None)
        .unwrap();
    let std = filtered(&doc, &["0", "1", "3", "4", "5"]);

    let (ok, _) = std.command().exec(DedentBlock, Some(on("5")));

    assert!(ok);
    assert_eq!(doc_children(&doc, "1"), ids(&["2", "3", "5", "4"]));
    assert!(doc_children(&doc, "3").is_empty());
}
