//! Interned `(tags, args)` records and the deduplicating tables that own them.
//!
//! Every per-instruction fact, variable, expression, memory base/offset and interval travels in
//! this one shape. Tables hand out 1-based indices; index `0` never names a record.

use crate::containers::InsertionOrderedSet;
use crate::error::{malformed, Error, Result};

/// The content of a record, which is what a table deduplicates on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaggedArgs {
    pub tags: Vec<String>,
    pub args: Vec<i64>,
}

impl TaggedArgs {
    pub fn new<S: Into<String>>(tags: impl IntoIterator<Item = S>, args: Vec<i64>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            args,
        }
    }
}

/// A record together with its index in the table it was retrieved from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedRecord {
    pub index: usize,
    pub tags: Vec<String>,
    pub args: Vec<i64>,
}

impl IndexedRecord {
    pub fn new(index: usize, body: TaggedArgs) -> Self {
        Self {
            index,
            tags: body.tags,
            args: body.args,
        }
    }

    /// The first tag, which selects the record's kind. Empty for a record without tags.
    pub fn kind(&self) -> &str {
        self.tags.first().map(|t| t.as_str()).unwrap_or("")
    }

    pub fn tag(&self, table: &str, n: usize) -> Result<&str> {
        self.tags
            .get(n)
            .map(|t| t.as_str())
            .ok_or_else(|| malformed!(table, self.index, "missing tag {}", n))
    }

    pub fn arg(&self, table: &str, n: usize) -> Result<i64> {
        self.args
            .get(n)
            .copied()
            .ok_or_else(|| malformed!(table, self.index, "missing argument {}", n))
    }

    /// Argument `n`, as an index into another table.
    pub fn arg_index(&self, table: &str, n: usize) -> Result<usize> {
        let raw = self.arg(table, n)?;
        usize::try_from(raw)
            .map_err(|_| malformed!(table, self.index, "argument {} is not an index: {}", n, raw))
    }

    /// Check that the record has at least the given number of tags and args.
    pub fn expect_shape(&self, table: &str, tags: usize, args: usize) -> Result<()> {
        if self.tags.len() < tags || self.args.len() < args {
            Err(malformed!(
                table,
                self.index,
                "{} expects {} tags and {} args, found {} and {}",
                self.kind(),
                tags,
                args,
                self.tags.len(),
                self.args.len()
            ))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for IndexedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} | {}",
            self.index,
            self.tags.join(","),
            itertools::join(&self.args, ",")
        )
    }
}

/// A deduplicating, append-only table of records.
#[derive(Clone, Debug)]
pub struct IndexedTable {
    name: String,
    entries: InsertionOrderedSet<TaggedArgs>,
}

impl IndexedTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: InsertionOrderedSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a record, returning its index. Adding a record equal to an existing one returns the
    /// existing index.
    pub fn add(&mut self, body: TaggedArgs) -> usize {
        self.entries.insert(body) + 1
    }

    /// Add a record at a given index, as read back from a persisted table. Indices must arrive
    /// densely and in order; a repeated record still takes its own slot.
    pub fn insert_at(&mut self, index: usize, body: TaggedArgs) -> Result<()> {
        let next = self.entries.len() + 1;
        if index != next {
            return Err(malformed!(
                self.name,
                index,
                "records must be loaded in order (expected index {})",
                next
            ));
        }
        self.entries.push_unchecked(body);
        Ok(())
    }

    /// Index of a record with the given content, if present.
    pub fn find(&self, body: &TaggedArgs) -> Option<usize> {
        self.entries.get_index(body).map(|i| i + 1)
    }

    pub fn get(&self, index: usize) -> Result<IndexedRecord> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|body| IndexedRecord::new(index, body.clone()))
            .ok_or_else(|| Error::IndexOutOfRange {
                table: self.name.clone(),
                index,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, in index order.
    pub fn records(&self) -> impl Iterator<Item = IndexedRecord> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, body)| IndexedRecord::new(i + 1, body.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indices_are_one_based_and_deduplicated() {
        let mut t = IndexedTable::new("xpr");
        let a = t.add(TaggedArgs::new(["c"], vec![1]));
        let b = t.add(TaggedArgs::new(["v"], vec![3]));
        assert_eq!((a, b), (1, 2));
        assert_eq!(t.add(TaggedArgs::new(["c"], vec![1])), 1);
        assert_eq!(t.get(2).unwrap().kind(), "v");
        assert_eq!(
            t.get(0),
            Err(Error::IndexOutOfRange {
                table: "xpr".into(),
                index: 0
            })
        );
        assert!(t.get(3).is_err());
    }

    #[test]
    fn loaded_tables_must_be_dense() {
        let mut t = IndexedTable::new("var");
        t.insert_at(1, TaggedArgs::new(["v"], vec![1])).unwrap();
        t.insert_at(2, TaggedArgs::new(["v"], vec![1])).unwrap();
        assert!(t.insert_at(4, TaggedArgs::new(["v"], vec![2])).is_err());
        assert_eq!(t.len(), 2);
        assert_eq!(t.find(&TaggedArgs::new(["v"], vec![1])), Some(1));
    }

    #[test]
    fn record_accessors_report_malformed_shapes() {
        let r = IndexedRecord::new(5, TaggedArgs::new(["x", "plus"], vec![1, -2]));
        assert_eq!(r.tag("xpr", 1).unwrap(), "plus");
        assert_eq!(r.arg_index("xpr", 0).unwrap(), 1);
        assert!(r.arg_index("xpr", 1).is_err());
        assert!(r.expect_shape("xpr", 2, 3).is_err());
        assert_eq!(r.to_string(), "5: x,plus | 1,-2");
    }
}
