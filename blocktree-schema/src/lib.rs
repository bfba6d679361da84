//! Block flavour schemas.
//!
//! Every block carries a *flavour* (e.g. `affine:paragraph`). This crate
//! declares what each flavour may contain:
//! - [`FlavourSchema`]: role in the tree, allowed parents and children, the
//!   prop fields with their types and defaults, and whether the block carries
//!   text
//! - [`PropsValidator`]: optional typed validation, usually a serde struct
//!   registered with [`FlavourSchema::typed_props`]
//! - [`Schema`]: the registry the store consults on every write
//!
//! The registry is an explicit value handed to each store; there is no
//! global flavour table.

pub mod affine;
mod error;
mod registry;
mod schema;
mod validator;

pub use error::{SchemaResult, SchemaValidationError};
pub use registry::Schema;
pub use schema::{FieldType, FlavourSchema, PropField, Role};
pub use validator::{PropsValidator, TypedProps};
