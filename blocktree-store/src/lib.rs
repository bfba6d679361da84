//! Documents, stores and workspaces on top of the blocktree CRDT.
//!
//! - [`Doc`]: one document. It owns the [`BlockSpace`](blocktree_crdt::BlockSpace),
//!   the undo history and the lifecycle, and it is the replica the sync
//!   engine talks to.
//! - [`Store`]: a view of a doc. It materializes [`BlockModel`]s for the
//!   blocks its [`Query`] lets through and exposes the mutation API.
//! - [`StoreTransaction`]: schema-checked mutations of one atomic commit.
//! - [`Workspace`]: the docs of one workspace, their metadata and the doc,
//!   blob and awareness engines.
//!
//! # Example
//!
//! ```
//! use blocktree_schema::affine;
//! use blocktree_store::{CreateDocOptions, Workspace};
//! use serde_json::json;
//!
//! let workspace = Workspace::new(affine::schema().unwrap());
//! let store = workspace.create_doc(CreateDocOptions::default()).unwrap();
//!
//! let page = store.add_block(affine::PAGE, json!({}), None, None).unwrap();
//! let note = store.add_block(affine::NOTE, json!({}), Some(&page), None).unwrap();
//! let para = store
//!     .add_block(affine::PARAGRAPH, json!({ "text": "hi" }), Some(&note), None)
//!     .unwrap();
//!
//! let model = store.get_model(&para).unwrap();
//! assert_eq!(model.text().unwrap().as_deref(), Some("hi"));
//! assert_eq!(model.parent().unwrap().id(), &note);
//! ```

mod block;
mod config;
mod doc;
mod error;
mod history;
mod meta;
mod model;
mod query;
mod store;
mod transaction;
mod workspace;

pub use block::Block;
pub use config::WorkspaceConfig;
pub use doc::{Doc, DocBuilder, DocState};
pub use error::{StoreError, StoreResult};
pub use meta::{DocMeta, DocMetaPatch, WorkspaceMeta};
pub use model::{BlockModel, PropsUpdated};
pub use query::{Query, QueryMatch, QueryMode, ViewType};
pub use store::{BlockUpdate, BlockUpdateKind, Store, StoreOptions};
pub use transaction::{Cascade, DeleteOptions, StoreTransaction, TEXT_PROP};
pub use workspace::{CreateDocOptions, Workspace, WorkspaceBuilder};
