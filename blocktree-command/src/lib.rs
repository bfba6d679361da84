//! Command chains over a blocktree store.
//!
//! A [`Command`] reads the [`Context`], does its work and hands its output
//! to [`Next`]. Not calling `next` stops the chain. A [`Chain`] strings
//! commands together with `pipe`, and branches with `try_any` and
//! `try_all`. `run()` reports whether the chain reached its end.
//!
//! Errors and panics raised by commands do not propagate: the run fails and
//! the error goes to [`CommandManager::errors`].
//!
//! # Example
//!
//! ```
//! use blocktree_command::{BlockStdScope, Context, keys, std_commands::InsertBlock};
//! use blocktree_schema::affine;
//! use blocktree_store::{CreateDocOptions, Workspace};
//! use serde_json::json;
//!
//! let workspace = Workspace::new(affine::schema().unwrap());
//! let store = workspace.create_doc(CreateDocOptions::default()).unwrap();
//! let page = store.add_block(affine::PAGE, json!({}), None, None).unwrap();
//! let note = store.add_block(affine::NOTE, json!({}), Some(&page), None).unwrap();
//!
//! let std = BlockStdScope::new(store.clone());
//! let input = Context::new()
//!     .with(&keys::FLAVOUR, affine::PARAGRAPH.to_owned())
//!     .with(&keys::PARENT_ID, note.clone());
//! let (ok, ctx) = std.command().exec(InsertBlock, Some(input));
//!
//! assert!(ok);
//! let id = ctx.get(&keys::INSERTED_ID).unwrap();
//! assert_eq!(store.get_parent(id).unwrap().id(), &note);
//! ```

mod chain;
mod command;
mod context;
mod error;
mod manager;
mod scope;
mod selection;
pub mod std_commands;

pub use chain::Chain;
pub use command::{Command, FnCommand, Next, from_fn};
pub use context::{Context, CtxKey};
pub use error::CommandError;
pub use manager::CommandManager;
pub use scope::BlockStdScope;
pub use selection::{Selection, SelectionManager, TextRange};
pub use std_commands::keys;
