//! Sharc: a pure-library reader/writer over the SQLite on-disk file
//! format, extended with a cryptographically verified append-only
//! ledger table and an agent-scoped entitlement layer (§1, §2).
//!
//! Layering follows the file format itself bottom-up: [`pager`] is raw
//! page-addressed storage, [`dbheader`] and [`schema`] parse the
//! 100-byte header and `sqlite_schema`, [`btree`] and [`record`] are
//! the cell codec and record codec, [`filter`] compiles predicates
//! against a table's physical layout, and [`reader`]/[`txn`] are the
//! public read/write surfaces built on top. [`ledger`] and [`agents`]
//! are reserved tables built the same way any other consumer of this
//! stack would build them; [`entitlement`] enforces agent scope in
//! front of both. [`database`] ties all of it together behind one
//! entry point.

mod agents;
mod btree;
mod database;
mod dbheader;
mod entitlement;
pub mod error;
pub mod filter;
mod ledger;
pub mod pager;
mod pool;
mod reader;
pub mod record;
pub mod schema;
mod serial_type;
mod signer;
mod txn;
mod varint;

pub use agents::{Agent, AgentClass, AgentRegistry, AGENTS_TABLE_NAME};
pub use database::Database;
pub use entitlement::{AgentInfo, ColumnRef, Enforcer, IdentityProof, Operation};
pub use error::{Error, Result};
pub use ledger::{IntegrityFailure, IntegrityReport, LedgerEntry, LEDGER_TABLE_NAME};
pub use pager::{CachedPageSource, FilePageSource, MemoryPageSource, MmapPageSource, PageSource};
pub use reader::Reader;
pub use signer::Signer;
pub use txn::Transaction;
