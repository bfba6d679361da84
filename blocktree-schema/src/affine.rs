//! The standard editor flavours.

use crate::{FlavourSchema, PropField, Role, Schema, SchemaResult};
use serde::{Deserialize, Serialize};

pub const PAGE: &str = "affine:page";
pub const SURFACE: &str = "affine:surface";
pub const NOTE: &str = "affine:note";
pub const FRAME: &str = "affine:frame";
pub const PARAGRAPH: &str = "affine:paragraph";
pub const LIST: &str = "affine:list";
pub const CODE: &str = "affine:code";
pub const DIVIDER: &str = "affine:divider";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphType {
    Text,
    Quote,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

/// Props of `affine:paragraph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParagraphProps {
    #[serde(rename = "type")]
    pub kind: ParagraphType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Bulleted,
    Numbered,
    Todo,
    Toggle,
}

/// Props of `affine:list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListProps {
    #[serde(rename = "type")]
    pub kind: ListType,
    pub checked: bool,
    pub collapsed: bool,
}

/// Props of `affine:note`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteProps {
    pub xywh: String,
    pub background: String,
    pub index: String,
    pub hidden: bool,
}

const CONTENT_PARENTS: &[&str] = &[NOTE, PARAGRAPH, LIST];

pub fn page() -> FlavourSchema {
    FlavourSchema::new(PAGE, Role::Root)
        .children(&[NOTE, SURFACE])
        .prop(PropField::text("title", ""))
}

pub fn surface() -> FlavourSchema {
    FlavourSchema::new(SURFACE, Role::Hub)
        .parents(&[PAGE])
        .children(&[FRAME, NOTE])
        .prop(PropField::object("elements"))
}

pub fn note() -> FlavourSchema {
    FlavourSchema::new(NOTE, Role::Hub)
        .parents(&[PAGE, SURFACE])
        .prop(PropField::text("xywh", "[0,0,800,95]"))
        .prop(PropField::text("background", "--affine-note-background-white"))
        .prop(PropField::text("index", "a0"))
        .prop(PropField::bool("hidden", false))
        .typed_props::<NoteProps>()
}

pub fn frame() -> FlavourSchema {
    FlavourSchema::new(FRAME, Role::Hub)
        .parents(&[SURFACE])
        .prop(PropField::text("title", ""))
        .prop(PropField::text("xywh", "[0,0,100,100]"))
}

pub fn paragraph() -> FlavourSchema {
    FlavourSchema::new(PARAGRAPH, Role::Content)
        .parents(CONTENT_PARENTS)
        .prop(PropField::enumeration(
            "type",
            &["text", "quote", "h1", "h2", "h3", "h4", "h5", "h6"],
        ))
        .text()
        .typed_props::<ParagraphProps>()
}

pub fn list() -> FlavourSchema {
    FlavourSchema::new(LIST, Role::Content)
        .parents(CONTENT_PARENTS)
        .prop(PropField::enumeration("type", &["bulleted", "numbered", "todo", "toggle"]))
        .prop(PropField::bool("checked", false))
        .prop(PropField::bool("collapsed", false))
        .text()
        .typed_props::<ListProps>()
}

pub fn code() -> FlavourSchema {
    FlavourSchema::new(CODE, Role::Content)
        .parents(&[NOTE])
        .children(&[])
        .prop(PropField::text("language", "plain text"))
        .prop(PropField::bool("wrap", false))
        .text()
}

pub fn divider() -> FlavourSchema {
    FlavourSchema::new(DIVIDER, Role::Content)
        .parents(&[NOTE])
        .children(&[])
}

/// A registry holding every standard flavour.
pub fn schema() -> SchemaResult<Schema> {
    [page(), surface(), note(), frame(), paragraph(), list(), code(), divider()]
        .into_iter()
        .try_fold(Schema::new(), Schema::with)
}
