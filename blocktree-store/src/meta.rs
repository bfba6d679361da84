//! Workspace metadata: the doc list and what is known about each doc.

use blocktree_types::DocId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMeta {
    pub id: DocId,
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub create_date: u64,
    pub tags: Vec<String>,
}

impl DocMeta {
    /// Metadata of a doc created now: empty title, no tags.
    pub fn new(id: DocId) -> Self {
        let create_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            id,
            title: String::new(),
            create_date,
            tags: Vec::new(),
        }
    }
}

/// Partial update of a [`DocMeta`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocMetaPatch {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// In creation order.
    pub docs: Vec<DocMeta>,
}

impl WorkspaceMeta {
    pub fn doc(&self, id: &DocId) -> Option<&DocMeta> {
        self.docs.iter().find(|d| &d.id == id)
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        self.docs.iter().map(|d| d.id.clone()).collect()
    }

    pub(crate) fn add_doc(&mut self, meta: DocMeta) {
        self.docs.push(meta);
    }

    pub(crate) fn remove_doc(&mut self, id: &DocId) -> Option<DocMeta> {
        let index = self.docs.iter().position(|d| &d.id == id)?;
        Some(self.docs.remove(index))
    }

    pub(crate) fn patch_doc(&mut self, id: &DocId, patch: DocMetaPatch) -> bool {
        let Some(meta) = self.docs.iter_mut().find(|d| &d.id == id) else {
            return false;
        };
        if let Some(title) = patch.title {
            meta.title = title;
        }
        if let Some(tags) = patch.tags {
            meta.tags = tags;
        }
        true
    }
}
