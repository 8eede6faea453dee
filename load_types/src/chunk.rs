use bytes::Bytes;

/// A batch of encoded rows sent by one sender in one packet.
///
/// The row encoding is owned by the tablet writers; the load path only ever selects rows by
/// their ordinal within the chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    rows: Vec<Bytes>,
}

impl Chunk {
    pub fn new(rows: Vec<Bytes>) -> Self {
        Self { rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&Bytes> {
        self.rows.get(idx)
    }

    /// Returns the rows at `indexes`, in the order given.
    ///
    /// # Panics
    ///
    /// If any index is out of bounds.
    pub fn select<'a>(&'a self, indexes: &'a [u32]) -> impl Iterator<Item = &'a Bytes> + 'a {
        indexes.iter().map(|&i| &self.rows[i as usize])
    }
}

impl FromIterator<Bytes> for Chunk {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
