//! REST response envelopes.
//!
//! Single objects arrive as `{data: {attributes: {...}}}` (some endpoints
//! omit the `data` wrapper), lists as `{data: [{attributes}], meta: {pagination}}`.

use serde::Deserialize;

/// One `{object, attributes}` item.
#[derive(Debug, Clone, Deserialize)]
pub struct Item<T> {
    #[serde(default)]
    pub object: Option<String>,
    pub attributes: T,
}

/// Envelope for a single object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SingleEnvelope<T> {
    Wrapped { data: Item<T> },
    Bare(Item<T>),
}

impl<T> SingleEnvelope<T> {
    pub fn into_attributes(self) -> T {
        match self {
            SingleEnvelope::Wrapped { data } => data.attributes,
            SingleEnvelope::Bare(item) => item.attributes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub per_page: u64,
    #[serde(default)]
    pub current_page: u64,
    #[serde(default)]
    pub total_pages: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMeta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Envelope for a list of objects.
#[derive(Debug, Clone, Deserialize)]
pub struct ListEnvelope<T> {
    pub data: Vec<Item<T>>,
    #[serde(default)]
    pub meta: Option<ListMeta>,
}

impl<T> ListEnvelope<T> {
    pub fn attributes(&self) -> impl Iterator<Item = &T> {
        self.data.iter().map(|item| &item.attributes)
    }

    pub fn into_attributes(self) -> Vec<T> {
        self.data.into_iter().map(|item| item.attributes).collect()
    }
}
