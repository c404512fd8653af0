//! Public, cursor-driven row reader (§4.11, §6.3).
//!
//! Grounded in iteration idiom on the teacher's `stored_table.rs`/
//! `temp_table.rs` (`TableStreamingIterator`, built on the
//! `streaming_iterator` crate) - kept as the ambient "advance, then
//! look at the current row" shape callers already expect from this
//! codebase. **Redesign**: the teacher's iterator decodes every column
//! of every row eagerly into an owned `Row` of `SqlValue`s
//! (allocating a `String`/`Vec<u8>` per text/blob column, every row,
//! whether or not the caller looks at it); §4.11 requires lazy,
//! per-column decode gated by a generation counter. A real
//! self-referential "cached borrowed slice pointing into this same
//! struct's payload field" can't be expressed in safe Rust, so the
//! cache here stores owned [`CachedValue`]s instead of borrowed
//! `ColumnValue`s (allocating once per accessed text/blob column per
//! row, same as the teacher, but now only for columns actually read);
//! the zero-copy borrowed path the spec also calls for is offered
//! separately via `get_utf8_span`/`get_blob_span`, which decode
//! straight from the current row's payload on every call without
//! caching at all. See DESIGN.md.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::btree::cursor::{Cursor, Payload};
use crate::error::{self, Error};
use crate::filter::compile::CompiledFilter;
use crate::pager::PageSource;
use crate::record::{self, ColumnValue};
use crate::schema::Table;

/// An owned copy of one decoded column, cached by ordinal (§4.11).
#[derive(Debug, Clone)]
enum CachedValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CachedValue {
    fn from_column_value(v: ColumnValue) -> CachedValue {
        match v {
            ColumnValue::Null => CachedValue::Null,
            ColumnValue::Int(i) => CachedValue::Int(i),
            ColumnValue::Real(r) => CachedValue::Real(r),
            ColumnValue::Text(b) => CachedValue::Text(String::from_utf8_lossy(b).into_owned()),
            ColumnValue::Blob(b) => CachedValue::Blob(b.to_vec()),
        }
    }
}

struct Slot {
    generation: u64,
    value: CachedValue,
}

/// Wraps a [`Cursor`] with a pre-parsed column list, an optional
/// compiled filter, and the lazy-decode cache (§4.11).
pub struct Reader<'s, S: PageSource> {
    cursor: Cursor<'s, S>,
    table: Arc<Table>,
    filter: Option<CompiledFilter>,
    projection: Option<Vec<usize>>,
    payload: Option<Payload>,
    generation: Cell<u64>,
    slots: RefCell<Vec<Option<Slot>>>,
    cancel: Option<Arc<AtomicBool>>,
    started: bool,
}

impl<'s, S: PageSource> Reader<'s, S> {
    pub fn new(
        cursor: Cursor<'s, S>,
        table: Arc<Table>,
        filter: Option<CompiledFilter>,
        projection: Option<Vec<usize>>,
    ) -> Reader<'s, S> {
        let column_count = table.columns.len();
        Reader {
            cursor,
            table,
            filter,
            projection,
            payload: None,
            generation: Cell::new(0),
            slots: RefCell::new((0..column_count).map(|_| None).collect()),
            cancel: None,
            started: false,
        }
    }

    /// Installs a cooperative cancellation flag, checked between rows
    /// and before each page fetch (§5 "Cancellation / timeouts").
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Number of columns the underlying table has (§6.3 `FieldCount`).
    pub fn field_count(&self) -> usize {
        match &self.projection {
            Some(p) => p.len(),
            None => self.table.columns.len(),
        }
    }

    /// Declared type of the column at ordinal `i`, after projection
    /// (§6.3 `GetColumnType`).
    pub fn get_column_type(&self, i: usize) -> Result<&str, Error> {
        Ok(self.resolve_ordinal(i)?.1.as_str())
    }

    fn resolve_ordinal(&self, i: usize) -> Result<(usize, &str), Error> {
        let ordinal = match &self.projection {
            Some(p) => *p
                .get(i)
                .ok_or_else(|| error::invalid_arg(format!("projected column {i} out of range")))?,
            None => i,
        };
        let column = self
            .table
            .columns
            .get(ordinal)
            .ok_or_else(|| error::invalid_arg(format!("column ordinal {ordinal} out of range")))?;
        Ok((ordinal, &column.declared_type))
    }

    /// Advances to the next row matching the compiled filter (§4.11,
    /// §6.3 `Read`). Returns `false` once the table is exhausted or the
    /// reader was cancelled mid-scan; a cancellation after a partial
    /// row never yields a half-read row (the check happens strictly
    /// between rows, §5).
    pub fn read(&mut self) -> Result<bool, Error> {
        loop {
            if self.is_cancelled() {
                self.payload = None;
                return Ok(false);
            }
            let has_row = if !self.started {
                self.started = true;
                self.cursor.move_first()?
            } else {
                self.cursor.move_next()?
            };
            if !has_row {
                self.payload = None;
                return Ok(false);
            }
            self.generation.set(self.generation.get() + 1);
            self.payload = Some(self.cursor.payload()?);

            let rowid = self
                .cursor
                .current_rowid()
                .ok_or_else(|| error::invalid_arg("cursor advanced but has no current row"))?;
            let matches = match &self.filter {
                Some(f) => f.evaluate(self.payload.as_ref().unwrap().as_slice(), rowid)?,
                None => true,
            };
            if matches {
                return Ok(true);
            }
        }
    }

    fn current_rowid(&self) -> Result<i64, Error> {
        self.cursor
            .current_rowid()
            .ok_or_else(|| error::invalid_arg("reader is not positioned on a row; call read() first"))
    }

    fn current_payload(&self) -> Result<&[u8], Error> {
        Ok(self
            .payload
            .as_ref()
            .ok_or_else(|| error::invalid_arg("reader is not positioned on a row; call read() first"))?
            .as_slice())
    }

    /// Decodes column `ordinal` via the generation cache, re-decoding
    /// only when the slot's generation is stale (§4.11).
    fn cached(&self, ordinal: usize) -> Result<CachedValue, Error> {
        let column = &self.table.columns[ordinal];
        if column.is_rowid_alias {
            return Ok(CachedValue::Int(self.current_rowid()?));
        }

        let mut slots = self.slots.borrow_mut();
        let current_gen = self.generation.get();
        if let Some(slot) = &slots[ordinal] {
            if slot.generation == current_gen {
                return Ok(slot.value.clone());
            }
        }
        let value = record::decode_column(self.current_payload()?, ordinal)?;
        let cached = CachedValue::from_column_value(value);
        slots[ordinal] = Some(Slot {
            generation: current_gen,
            value: cached.clone(),
        });
        Ok(cached)
    }

    pub fn is_null(&self, i: usize) -> Result<bool, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        // The rowid alias is never NULL even though its cell body's
        // serial type is 0 (§4.10 "Special cases").
        if self.table.columns[ordinal].is_rowid_alias {
            return Ok(false);
        }
        Ok(matches!(self.cached(ordinal)?, CachedValue::Null))
    }

    pub fn get_int64(&self, i: usize) -> Result<i64, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        match self.cached(ordinal)? {
            CachedValue::Int(v) => Ok(v),
            CachedValue::Real(v) => Ok(v as i64),
            other => Err(error::invalid_arg(format!("column {i} is not an integer: {other:?}"))),
        }
    }

    pub fn get_double(&self, i: usize) -> Result<f64, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        match self.cached(ordinal)? {
            CachedValue::Real(v) => Ok(v),
            CachedValue::Int(v) => Ok(v as f64),
            other => Err(error::invalid_arg(format!("column {i} is not a double: {other:?}"))),
        }
    }

    /// Owned UTF-8 string (§6.3 `GetString`).
    pub fn get_string(&self, i: usize) -> Result<String, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        match self.cached(ordinal)? {
            CachedValue::Text(s) => Ok(s),
            CachedValue::Null => Ok(String::new()),
            other => Err(error::invalid_arg(format!("column {i} is not text: {other:?}"))),
        }
    }

    /// Owned copy of a blob column.
    pub fn get_blob_owned(&self, i: usize) -> Result<Vec<u8>, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        match self.cached(ordinal)? {
            CachedValue::Blob(b) => Ok(b),
            CachedValue::Null => Ok(Vec::new()),
            other => Err(error::invalid_arg(format!("column {i} is not a blob: {other:?}"))),
        }
    }

    /// Borrowed, zero-allocation UTF-8 view of column `i`, decoded
    /// straight from the current row's payload without touching the
    /// generation cache (§4.11 `GetUtf8Span`). The returned slice must
    /// not outlive the next `read()`.
    pub fn get_utf8_span(&self, i: usize) -> Result<&str, Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        if self.table.columns[ordinal].is_rowid_alias {
            return Err(error::invalid_arg("rowid alias column has no text representation"));
        }
        let value = record::decode_column(self.current_payload()?, ordinal)?;
        match value {
            ColumnValue::Text(b) => {
                std::str::from_utf8(b).map_err(|e| error::corrupt(format!("invalid utf-8 in column {i}: {e}")))
            }
            ColumnValue::Null => Ok(""),
            other => Err(error::invalid_arg(format!("column {i} is not text: {:?}", other.storage_class()))),
        }
    }

    /// Borrowed, zero-allocation view of a blob column (§4.11 `GetBlob`).
    pub fn get_blob_span(&self, i: usize) -> Result<&[u8], Error> {
        let (ordinal, _) = self.resolve_ordinal(i)?;
        let value = record::decode_column(self.current_payload()?, ordinal)?;
        match value {
            ColumnValue::Blob(b) | ColumnValue::Text(b) => Ok(b),
            ColumnValue::Null => Ok(&[]),
            other => Err(error::invalid_arg(format!("column {i} is not a blob: {:?}", other.storage_class()))),
        }
    }

    /// Reassembles a merged GUID column from its `hi`/`lo` physical
    /// ordinals (§3.5, §4.11 `GetGuid`).
    pub fn get_guid(&self, logical_name: &str) -> Result<[u8; 16], Error> {
        let merged = self
            .table
            .merged_columns
            .iter()
            .find(|m| m.logical_name.eq_ignore_ascii_case(logical_name) && m.kind == crate::schema::MergedKind::Guid)
            .ok_or_else(|| error::invalid_arg(format!("no merged GUID column named {logical_name}")))?;
        let hi = self.cached(merged.hi_ordinal)?;
        let lo = self.cached(merged.lo_ordinal)?;
        let (hi, lo) = match (hi, lo) {
            (CachedValue::Int(hi), CachedValue::Int(lo)) => (hi, lo),
            _ => return Err(error::corrupt("merged GUID columns are not both integers")),
        };
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&hi.to_be_bytes());
        bytes[8..16].copy_from_slice(&lo.to_be_bytes());
        Ok(bytes)
    }

    /// Reassembles a merged 128-bit decimal column (§3.5, §4.11
    /// `GetDecimal`) into an `i128` (hi << 64 | lo as u64).
    pub fn get_decimal(&self, logical_name: &str) -> Result<i128, Error> {
        let merged = self
            .table
            .merged_columns
            .iter()
            .find(|m| m.logical_name.eq_ignore_ascii_case(logical_name) && m.kind == crate::schema::MergedKind::Decimal)
            .ok_or_else(|| error::invalid_arg(format!("no merged decimal column named {logical_name}")))?;
        let hi = self.cached(merged.hi_ordinal)?;
        let lo = self.cached(merged.lo_ordinal)?;
        let (hi, lo) = match (hi, lo) {
            (CachedValue::Int(hi), CachedValue::Int(lo)) => (hi, lo),
            _ => return Err(error::corrupt("merged decimal columns are not both integers")),
        };
        Ok(((hi as i128) << 64) | (lo as u64 as i128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::MemoryPageSource;
    use crate::schema::Column;

    fn build_table(rows: &[(i64, Vec<ColumnValue>)]) -> (MemoryPageSource, Table) {
        let page_size = 4096u32;
        let src = MemoryPageSource::new(page_size);
        let mut page = crate::btree::writer::new_empty_leaf_page(page_size, 0);
        for (rowid, values) in rows {
            let mut body = Vec::new();
            record::encode_record(values, &mut body);
            let mut cell = Vec::new();
            crate::btree::cell::build_table_leaf_cell(*rowid, &body, page_size, &mut cell);
            crate::btree::writer::append_cell_to_leaf(&mut page, 0, &cell).unwrap();
        }
        src.write_page(1, &page).unwrap();

        let table = Table {
            name: "widgets".into(),
            root_page: 1,
            sql: "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT)".into(),
            without_rowid: false,
            columns: vec![
                Column {
                    ordinal: 0,
                    name: "id".into(),
                    declared_type: "INTEGER".into(),
                    primary_key: true,
                    not_null: true,
                    has_default: false,
                    is_rowid_alias: true,
                },
                Column {
                    ordinal: 1,
                    name: "name".into(),
                    declared_type: "TEXT".into(),
                    primary_key: false,
                    not_null: false,
                    has_default: false,
                    is_rowid_alias: false,
                },
            ],
            merged_columns: vec![],
        };
        (src, table)
    }

    #[test]
    fn reads_rows_and_caches_decoded_columns_per_generation() {
        let rows = vec![
            (1, vec![ColumnValue::Null, ColumnValue::Text(b"alice")]),
            (2, vec![ColumnValue::Null, ColumnValue::Text(b"bob")]),
        ];
        let (src, table) = build_table(&rows);
        let cursor = Cursor::new(&src, table.root_page, src.page_size());
        let mut reader = Reader::new(cursor, Arc::new(table), None, None);

        assert!(reader.read().unwrap());
        assert_eq!(reader.get_int64(0).unwrap(), 1);
        assert_eq!(reader.get_string(1).unwrap(), "alice");
        assert!(!reader.is_null(0).unwrap());

        assert!(reader.read().unwrap());
        assert_eq!(reader.get_int64(0).unwrap(), 2);
        assert_eq!(reader.get_string(1).unwrap(), "bob");

        assert!(!reader.read().unwrap());
    }

    #[test]
    fn cancellation_flag_stops_iteration_between_rows() {
        let rows = vec![
            (1, vec![ColumnValue::Null, ColumnValue::Text(b"alice")]),
            (2, vec![ColumnValue::Null, ColumnValue::Text(b"bob")]),
        ];
        let (src, table) = build_table(&rows);
        let cursor = Cursor::new(&src, table.root_page, src.page_size());
        let flag = Arc::new(AtomicBool::new(false));
        let mut reader = Reader::new(cursor, Arc::new(table), None, None).with_cancellation(flag.clone());
        assert!(reader.read().unwrap());
        flag.store(true, Ordering::Relaxed);
        assert!(!reader.read().unwrap());
    }
}
