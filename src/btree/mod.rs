//! B-tree page types, cell codec, and cursor (§3.2, §3.3, §4.5, §4.7, §4.8).
//!
//! Organization follows the teacher's split into `header` (page
//! header), `cell` (cell formats), and a traversal module, here named
//! `cursor` rather than the teacher's `table`: the teacher's
//! `table::Iterator` holds a `Vec<EitherIter>` of per-page, pager-
//! borrowing iterators; `cursor::Cursor` generalizes that same
//! left-descend/unwind-on-exhaustion shape into the `Seek`-capable,
//! `Bytes`-owning cursor §4.8 requires. Only table B-trees are
//! implemented; index B-trees remain future work, as in the teacher.

pub mod cell;
pub mod cursor;
pub mod header;
pub mod writer;

pub use header::PageType;

/// SQLite row ids are 64-bit signed integers.
pub type RowId = i64;
