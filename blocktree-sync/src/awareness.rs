//! Awareness: ephemeral per-peer presence state.
//!
//! Each peer publishes one [`AwarenessState`] (user, color, feature flags,
//! selections). States are not part of document history and are replaced
//! wholesale on every change. [`AwarenessSource`]s relay the local state to
//! other peers and feed theirs back into the [`AwarenessStore`].

use crate::error::SyncResult;
use blocktree_types::{Disposable, DocId, PeerId, Slot};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Editor feature flags. Unknown fields are rejected; missing ones take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Flags {
    pub enable_synced_doc_block: bool,
    pub enable_pie_menu: bool,
    pub enable_database_number_formatting: bool,
    pub enable_database_attachment_note: bool,
    pub enable_database_full_width: bool,
    pub enable_block_query: bool,
    pub enable_lasso_tool: bool,
    pub enable_edgeless_text: bool,
    pub enable_ai_onboarding: bool,
    pub enable_ai_chat_block: bool,
    pub enable_color_picker: bool,
    pub enable_mind_map_import: bool,
    pub enable_advanced_block_visibility: bool,
    pub enable_shape_shadow_blur: bool,
    pub enable_mobile_keyboard_toolbar: bool,
    pub enable_mobile_linked_doc_menu: bool,
    /// Per-doc readonly switch, keyed by doc id.
    pub readonly: BTreeMap<String, bool>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            enable_synced_doc_block: false,
            enable_pie_menu: false,
            enable_database_number_formatting: false,
            enable_database_attachment_note: false,
            enable_database_full_width: false,
            enable_block_query: false,
            enable_lasso_tool: false,
            enable_edgeless_text: true,
            enable_ai_onboarding: false,
            enable_ai_chat_block: false,
            enable_color_picker: false,
            enable_mind_map_import: false,
            enable_advanced_block_visibility: false,
            enable_shape_shadow_blur: false,
            enable_mobile_keyboard_toolbar: false,
            enable_mobile_linked_doc_menu: false,
            readonly: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
}

/// What one peer publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub flags: Flags,
    /// Selections keyed by selection-manager id.
    #[serde(default)]
    pub selection: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwarenessEventKind {
    Add,
    Update,
    Remove,
}

/// Emitted on [`AwarenessStore::update`] for every state change, local or
/// remote.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEvent {
    pub client: PeerId,
    pub kind: AwarenessEventKind,
    /// The new state; `None` for removals.
    pub state: Option<AwarenessState>,
}

/// Local and remote awareness states of one workspace.
pub struct AwarenessStore {
    client: PeerId,
    local: Mutex<AwarenessState>,
    remote: Mutex<BTreeMap<PeerId, AwarenessState>>,
    update: Slot<AwarenessEvent>,
}

impl fmt::Debug for AwarenessStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwarenessStore")
            .field("client", &self.client)
            .field("remote_peers", &self.remote.lock().len())
            .finish()
    }
}

impl AwarenessStore {
    pub fn new(client: PeerId, flags: Flags) -> Self {
        Self {
            client,
            local: Mutex::new(AwarenessState {
                flags,
                ..AwarenessState::default()
            }),
            remote: Mutex::new(BTreeMap::new()),
            update: Slot::new(),
        }
    }

    pub fn client_id(&self) -> PeerId {
        self.client
    }

    /// Fires on every local or remote state change.
    pub fn update(&self) -> &Slot<AwarenessEvent> {
        &self.update
    }

    pub fn local_state(&self) -> AwarenessState {
        self.local.lock().clone()
    }

    /// All known states, the local one included.
    pub fn states(&self) -> BTreeMap<PeerId, AwarenessState> {
        let mut states = self.remote.lock().clone();
        states.insert(self.client, self.local_state());
        states
    }

    fn modify_local(&self, f: impl FnOnce(&mut AwarenessState)) {
        let state = {
            let mut local = self.local.lock();
            f(&mut local);
            local.clone()
        };
        self.update.emit(&AwarenessEvent {
            client: self.client,
            kind: AwarenessEventKind::Update,
            state: Some(state),
        });
    }

    pub fn set_user(&self, user: UserInfo) {
        self.modify_local(|s| s.user = Some(user));
    }

    pub fn set_color(&self, color: impl Into<String>) {
        let color = color.into();
        self.modify_local(|s| s.color = Some(color));
    }

    pub fn flags(&self) -> Flags {
        self.local.lock().flags.clone()
    }

    /// A flag by field name, as JSON.
    pub fn get_flag(&self, name: &str) -> Option<Value> {
        serde_json::to_value(self.flags())
            .ok()
            .and_then(|v| v.get(name).cloned())
    }

    /// Sets a flag by field name. Fails if the name is unknown or the value
    /// has the wrong type.
    pub fn set_flag(&self, name: &str, value: Value) -> SyncResult<()> {
        let mut raw = serde_json::to_value(self.flags())?;
        if let Value::Object(map) = &mut raw {
            map.insert(name.to_owned(), value);
        }
        let flags: Flags = serde_json::from_value(raw)?;
        self.modify_local(|s| s.flags = flags);
        Ok(())
    }

    pub fn is_readonly(&self, doc: &DocId) -> bool {
        self.local
            .lock()
            .flags
            .readonly
            .get(doc.as_str())
            .copied()
            .unwrap_or(false)
    }

    pub fn set_readonly(&self, doc: &DocId, readonly: bool) {
        let key = doc.as_str().to_owned();
        self.modify_local(|s| {
            s.flags.readonly.insert(key, readonly);
        });
    }

    pub fn get_local_selection(&self, manager: &str) -> Vec<Value> {
        self.local
            .lock()
            .selection
            .get(manager)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_local_selection(&self, manager: &str, selection: Vec<Value>) {
        let manager = manager.to_owned();
        self.modify_local(|s| {
            s.selection.insert(manager, selection);
        });
    }

    /// Integrates a state relayed from another peer; `None` removes it.
    /// States claiming to be the local client are ignored.
    pub fn apply_remote(&self, client: PeerId, state: Option<AwarenessState>) {
        if client == self.client {
            return;
        }
        let event = {
            let mut remote = self.remote.lock();
            match state {
                Some(state) => {
                    if remote.get(&client) == Some(&state) {
                        return;
                    }
                    let kind = if remote.insert(client, state.clone()).is_some() {
                        AwarenessEventKind::Update
                    } else {
                        AwarenessEventKind::Add
                    };
                    AwarenessEvent {
                        client,
                        kind,
                        state: Some(state),
                    }
                }
                None => {
                    if remote.remove(&client).is_none() {
                        return;
                    }
                    AwarenessEvent {
                        client,
                        kind: AwarenessEventKind::Remove,
                        state: None,
                    }
                }
            }
        };
        self.update.emit(&event);
    }

    /// Drops every listener.
    pub fn destroy(&self) {
        self.update.dispose();
    }
}

/// Relays a local [`AwarenessStore`] to other peers.
pub trait AwarenessSource: Send + Sync {
    fn connect(&self, store: &Arc<AwarenessStore>);

    fn disconnect(&self);
}

/// Connects an [`AwarenessStore`] to all of its sources.
pub struct AwarenessEngine {
    store: Arc<AwarenessStore>,
    sources: Vec<Arc<dyn AwarenessSource>>,
}

impl fmt::Debug for AwarenessEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwarenessEngine")
            .field("store", &self.store)
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl AwarenessEngine {
    pub fn new(store: Arc<AwarenessStore>, sources: Vec<Arc<dyn AwarenessSource>>) -> Self {
        Self { store, sources }
    }

    pub fn store(&self) -> &Arc<AwarenessStore> {
        &self.store
    }

    pub fn connect(&self) {
        for source in &self.sources {
            source.connect(&self.store);
        }
    }

    pub fn disconnect(&self) {
        for source in &self.sources {
            source.disconnect();
        }
    }
}

/// An in-process relay between awareness stores, e.g. several workspaces
/// of one test.
#[derive(Default)]
pub struct LocalAwarenessHub {
    peers: Mutex<HashMap<PeerId, Weak<AwarenessStore>>>,
}

impl fmt::Debug for LocalAwarenessHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAwarenessHub")
            .field("peers", &self.peers.lock().len())
            .finish()
    }
}

impl LocalAwarenessHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A source attached to this hub. Each store needs its own source.
    pub fn source(self: &Arc<Self>) -> Arc<dyn AwarenessSource> {
        Arc::new(HubSource {
            hub: self.clone(),
            connection: Mutex::new(None),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    fn others(&self, client: PeerId) -> Vec<Arc<AwarenessStore>> {
        self.peers
            .lock()
            .iter()
            .filter(|(id, _)| **id != client)
            .filter_map(|(_, store)| store.upgrade())
            .collect()
    }

    fn broadcast(&self, client: PeerId, state: Option<AwarenessState>) {
        for peer in self.others(client) {
            peer.apply_remote(client, state.clone());
        }
    }
}

struct HubSource {
    hub: Arc<LocalAwarenessHub>,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    client: PeerId,
    store: Weak<AwarenessStore>,
    subscription: Disposable,
}

impl AwarenessSource for HubSource {
    fn connect(&self, store: &Arc<AwarenessStore>) {
        self.disconnect();
        let client = store.client_id();
        self.hub
            .peers
            .lock()
            .insert(client, Arc::downgrade(store));

        for peer in self.hub.others(client) {
            store.apply_remote(peer.client_id(), Some(peer.local_state()));
        }
        self.hub.broadcast(client, Some(store.local_state()));

        let hub = Arc::downgrade(&self.hub);
        let subscription = store.update().subscribe(move |event| {
            if event.client != client {
                return;
            }
            if let Some(hub) = hub.upgrade() {
                hub.broadcast(client, event.state.clone());
            }
        });
        debug!(%client, "awareness connected to local hub");
        *self.connection.lock() = Some(Connection {
            client,
            store: Arc::downgrade(store),
            subscription,
        });
    }

    fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        let client = connection.client;
        connection.subscription.dispose();
        self.hub.peers.lock().remove(&client);
        self.hub.broadcast(client, None);
        if let Some(store) = connection.store.upgrade() {
            for peer in self.hub.others(client) {
                store.apply_remote(peer.client_id(), None);
            }
        }
        debug!(%client, "awareness disconnected from local hub");
    }
}
