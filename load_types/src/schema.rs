//! Table schema as seen by the load path.

use crate::IndexId;

/// A column of the table being loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    /// Words of the column's global dictionary, in dictionary order. Empty when the column has
    /// no global dictionary.
    pub global_dict_words: Vec<String>,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            global_dict_words: vec![],
        }
    }

    pub fn with_global_dict(mut self, words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.global_dict_words = words.into_iter().map(Into::into).collect();
        self
    }
}

/// One materialized index of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub index_id: IndexId,
    pub schema_hash: i32,
    /// Names of the columns stored by this index.
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<ColumnDesc>,
    pub indexes: Vec<IndexSchema>,
}

impl Schema {
    pub fn index(&self, index_id: IndexId) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.index_id == index_id)
    }
}
