//! Top-level handle tying storage, schema, ledger, and agents together
//! (§6.2, §6.3).
//!
//! **[ADDED — no teacher counterpart]**. The teacher never had a single
//! entry point: `main.rs` opened a `StoredDb` directly and `stored_db.rs`
//! exposed table lookups one call at a time. `Database<S>` is the
//! facade this crate needs instead - generic over [`PageSource`] the
//! same way every other layer here is, so a caller picks the backend
//! (file, memory, mmap, cached) at the call site and gets the same API
//! regardless (§4.3).

use std::sync::Arc;

use crate::agents::{self, Agent, AgentRegistry};
use crate::btree::cursor::Cursor;
use crate::btree::{cell, writer};
use crate::dbheader::{DbHeader, HEADER_LEN};
use crate::error::{self, Error};
use crate::filter::compile::CompiledFilter;
use crate::ledger::{self, IntegrityReport, LedgerEntry, LedgerManager};
use crate::pager::{CachedPageSource, FilePageSource, MemoryPageSource, MmapPageSource, PageSource};
use crate::record::ColumnValue;
use crate::reader::Reader;
use crate::schema::{Schema, Table};
use crate::signer::Signer;
use crate::txn::Transaction;

/// Reads just enough of a file to learn its page size (§4.4) before
/// the real [`PageSource`] is constructed - every variant's `open`
/// takes `page_size` as an explicit parameter rather than discovering
/// it itself, so this has to happen up front.
fn peek_page_size(path: &str) -> Result<u32, Error> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf)?;
    Ok(DbHeader::parse(&buf)?.page_size)
}

/// A handle over one SQLite-format file, generic over its backing
/// [`PageSource`] (§4.3, §6.2).
pub struct Database<S: PageSource> {
    source: S,
    header: DbHeader,
    schema: Schema,
}

impl<S: PageSource> Database<S> {
    fn from_source(source: S) -> Result<Database<S>, Error> {
        let header_bytes = source.get_page(1)?;
        let header = DbHeader::parse(&header_bytes)?;
        let schema = Schema::read(&source, header.usable_page_size())?;
        Ok(Database { source, header, schema })
    }

    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn table(&self, name: &str) -> Result<&Table, Error> {
        self.schema
            .tables
            .get(name)
            .ok_or_else(|| error::invalid_arg(format!("no such table: {name}")))
    }

    /// Opens a read-driven cursor over `table_name` (§6.3 `CreateReader`).
    /// `filter`, when given, is compiled against the table's column
    /// layout (§4.12); `projection` restricts which ordinals
    /// [`Reader::read`] decodes, leaving the rest lazily skipped.
    pub fn create_reader(
        &self,
        table_name: &str,
        filter: Option<&crate::filter::expr::Expr>,
        projection: Option<Vec<usize>>,
    ) -> Result<Reader<'_, S>, Error> {
        let table = self.table(table_name)?;
        let table = Arc::new(table.clone());
        let compiled = match filter {
            Some(expr) => Some(CompiledFilter::compile(expr, &table)?),
            None => None,
        };
        let cursor = Cursor::new(&self.source, table.root_page, self.header.usable_page_size());
        Ok(Reader::new(cursor, table, compiled, projection))
    }

    /// Begins a write transaction (§6.3 `BeginTransaction`). Only one
    /// should be open against a given source at a time; nothing here
    /// enforces that beyond the borrow checker pinning `'_` to `self`.
    pub fn begin_transaction(&self) -> Transaction<'_, S> {
        Transaction::new(&self.source)
    }

    fn ledger_root(&self) -> Result<u32, Error> {
        Ok(self.table(ledger::LEDGER_TABLE_NAME)?.root_page)
    }

    fn agents_root(&self) -> Result<u32, Error> {
        Ok(self.table(agents::AGENTS_TABLE_NAME)?.root_page)
    }

    /// Appends a signed entry to `_sharc_ledger` (§4.13 `Append`).
    pub fn append_ledger_entry(
        &self,
        payload: Vec<u8>,
        agent_id: &str,
        signer: &Signer,
        timestamp_ms: i64,
    ) -> Result<LedgerEntry, Error> {
        let manager = LedgerManager::new(self.ledger_root()?);
        manager.append(&self.source, payload, agent_id, signer, timestamp_ms)
    }

    /// Walks `_sharc_ledger` end to end checking monotonicity, hash
    /// links, and signatures (§4.13 `VerifyIntegrity`).
    pub fn verify_ledger_integrity(&self, registry: &AgentRegistry) -> Result<IntegrityReport, Error> {
        let manager = LedgerManager::new(self.ledger_root()?);
        manager.verify_integrity(&self.source, registry)
    }

    /// Exports every ledger entry from `from_seq` onward as wire bytes
    /// (§4.13 `ExportDeltas`).
    pub fn export_ledger_deltas(&self, from_seq: u64) -> Result<Vec<Vec<u8>>, Error> {
        let manager = LedgerManager::new(self.ledger_root()?);
        manager.export_deltas(&self.source, from_seq)
    }

    /// Applies a batch of exported entries, all-or-nothing per record
    /// (§4.13 `ImportDeltas`).
    pub fn import_ledger_deltas(&self, records: &[Vec<u8>], registry: &AgentRegistry) -> Result<u64, Error> {
        let manager = LedgerManager::new(self.ledger_root()?);
        manager.import_deltas(&self.source, records, registry)
    }

    /// Builds a fresh in-memory index over `_sharc_agents` (§4.15).
    /// Reload whenever `self.header().schema_cookie` changes.
    pub fn load_agent_registry(&self) -> Result<AgentRegistry, Error> {
        let table = self.table(agents::AGENTS_TABLE_NAME)?;
        AgentRegistry::load(&self.source, table)
    }

    /// Registers a new agent, signing its row with `signer` (§4.15).
    pub fn register_agent(&self, registry: &mut AgentRegistry, agent: Agent, signer: &Signer) -> Result<(), Error> {
        let _ = self.agents_root()?;
        registry.register_agent(&self.source, agent, signer)
    }
}

impl Database<FilePageSource> {
    /// Opens an existing file read-only (§6.2 `Open`).
    pub fn open(path: &str) -> Result<Database<FilePageSource>, Error> {
        let page_size = peek_page_size(path)?;
        Database::from_source(FilePageSource::open(path, page_size)?)
    }

    /// Opens an existing file for reads and writes.
    pub fn open_read_write(path: &str) -> Result<Database<FilePageSource>, Error> {
        let page_size = peek_page_size(path)?;
        Database::from_source(FilePageSource::open_read_write(path, page_size)?)
    }

    /// Creates a brand-new file-backed database with the reserved
    /// `_sharc_ledger`/`_sharc_agents` tables already present (§6.2
    /// `Create`). Only `reserved_bytes_per_page == 0` is supported by
    /// this constructor - it hand-builds page 1 rather than going
    /// through a general-purpose page writer.
    pub fn create(path: &str, page_size: u32) -> Result<Database<FilePageSource>, Error> {
        bootstrap_empty(&FilePageSource::open_read_write(path, page_size)?, page_size)?;
        Database::open_read_write(path)
    }
}

impl Database<MemoryPageSource> {
    /// Opens whole-file bytes already held in memory (§6.2 `OpenMemory`).
    pub fn open_memory(data: &[u8], page_size: u32) -> Result<Database<MemoryPageSource>, Error> {
        Database::from_source(MemoryPageSource::from_bytes(data, page_size))
    }

    /// Creates a scratch in-memory database with the reserved tables
    /// already present, useful for tests and ephemeral agent sessions.
    pub fn create_memory(page_size: u32) -> Result<Database<MemoryPageSource>, Error> {
        let source = MemoryPageSource::new(page_size);
        bootstrap_empty(&source, page_size)?;
        Database::from_source(source)
    }
}

impl Database<MmapPageSource> {
    /// Opens an existing file read-only via `mmap` (§4.3 "Mmap" variant).
    pub fn open_mmap(path: &str) -> Result<Database<MmapPageSource>, Error> {
        let page_size = peek_page_size(path)?;
        Database::from_source(MmapPageSource::open(path, page_size)?)
    }
}

impl Database<CachedPageSource<FilePageSource>> {
    /// Opens an existing file behind an LRU page cache of `capacity`
    /// pages (§4.3 "Cached" variant).
    pub fn open_cached(path: &str, capacity: usize) -> Result<Database<CachedPageSource<FilePageSource>>, Error> {
        let page_size = peek_page_size(path)?;
        let inner = FilePageSource::open(path, page_size)?;
        Database::from_source(CachedPageSource::new(inner, capacity))
    }
}

/// Writes page 1 (header + one-row-per-reserved-table `sqlite_schema`
/// leaf) plus one empty leaf page each for `_sharc_agents` and
/// `_sharc_ledger`, at fixed root pages 2 and 3 (§6.2 `Create`).
fn bootstrap_empty<S: PageSource>(source: &S, page_size: u32) -> Result<(), Error> {
    let header = DbHeader::new_default(page_size);

    let mut page1 = writer::new_empty_leaf_page(page_size, HEADER_LEN);
    page1[0..HEADER_LEN].copy_from_slice(&header.to_bytes());

    let agents_row = vec![
        ColumnValue::Text(b"table"),
        ColumnValue::Text(agents::AGENTS_TABLE_NAME.as_bytes()),
        ColumnValue::Text(agents::AGENTS_TABLE_NAME.as_bytes()),
        ColumnValue::Int(2),
        ColumnValue::Text(agents::AGENTS_CREATE_SQL.as_bytes()),
    ];
    append_schema_row(&mut page1, page_size, 1, &agents_row)?;

    let ledger_row = vec![
        ColumnValue::Text(b"table"),
        ColumnValue::Text(ledger::LEDGER_TABLE_NAME.as_bytes()),
        ColumnValue::Text(ledger::LEDGER_TABLE_NAME.as_bytes()),
        ColumnValue::Int(3),
        ColumnValue::Text(ledger::LEDGER_CREATE_SQL.as_bytes()),
    ];
    append_schema_row(&mut page1, page_size, 2, &ledger_row)?;

    source.write_page(1, &page1)?;
    source.write_page(2, &writer::new_empty_leaf_page(page_size, 0))?;
    source.write_page(3, &writer::new_empty_leaf_page(page_size, 0))?;
    Ok(())
}

fn append_schema_row(page: &mut [u8], page_size: u32, rowid: i64, row: &[ColumnValue]) -> Result<(), Error> {
    let mut body = Vec::new();
    crate::record::encode_record(row, &mut body);
    let mut cell_bytes = Vec::new();
    let inline_len = cell::build_table_leaf_cell(rowid, &body, page_size, &mut cell_bytes);
    if inline_len != body.len() {
        return Err(Error::InvalidState("sqlite_schema bootstrap row does not fit inline".into()));
    }
    writer::append_cell_to_leaf(page, HEADER_LEN, &cell_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_memory_then_reopen_exposes_reserved_tables() {
        let db = Database::<MemoryPageSource>::create_memory(4096).unwrap();
        assert!(db.schema().tables.contains_key(agents::AGENTS_TABLE_NAME));
        assert!(db.schema().tables.contains_key(ledger::LEDGER_TABLE_NAME));
        assert_eq!(db.header().page_count, 1);
    }

    #[test]
    fn append_ledger_entry_then_verify_integrity_succeeds() {
        let db = Database::<MemoryPageSource>::create_memory(4096).unwrap();
        let signer = Signer::generate();
        let mut registry = db.load_agent_registry().unwrap();
        let agent = Agent {
            agent_id: "agent-alpha".into(),
            class: agents::AgentClass::Ai,
            public_key_spki: signer.public_key_spki().unwrap(),
            authority_ceiling: 5,
            write_scope: "*".into(),
            read_scope: "*".into(),
            validity_start_ms: 0,
            validity_end_ms: 0,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
        };
        db.register_agent(&mut registry, agent, &signer).unwrap();

        db.append_ledger_entry(b"hello".to_vec(), "agent-alpha", &signer, 1_700_000_000_000)
            .unwrap();

        let report = db.verify_ledger_integrity(&registry).unwrap();
        assert!(matches!(report, IntegrityReport::Valid));
    }

    #[test]
    fn create_reader_over_reserved_table_reads_back_registered_agent() {
        let db = Database::<MemoryPageSource>::create_memory(4096).unwrap();
        let signer = Signer::generate();
        let mut registry = db.load_agent_registry().unwrap();
        let agent = Agent {
            agent_id: "agent-beta".into(),
            class: agents::AgentClass::Human,
            public_key_spki: signer.public_key_spki().unwrap(),
            authority_ceiling: 1,
            write_scope: "orders".into(),
            read_scope: "*".into(),
            validity_start_ms: 0,
            validity_end_ms: 0,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
        };
        db.register_agent(&mut registry, agent, &signer).unwrap();

        let mut reader = db.create_reader(agents::AGENTS_TABLE_NAME, None, None).unwrap();
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_string(0).unwrap(), "agent-beta");
        assert!(!reader.read().unwrap());
    }
}
