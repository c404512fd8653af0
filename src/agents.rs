//! Agent registry (§3.7, §4.15).
//!
//! **[ADDED — no teacher counterpart]**. Built the way any other
//! consumer of this crate's own reader/cursor would be (the teacher's
//! `stored_table.rs` iterates a table the same way `AgentRegistry`
//! does here), on top of the `_sharc_agents` reserved table (§6.2).
//! Agents carry their own signature (the registration row is signed so
//! tampering is detectable, §4.15) and validity timestamps are
//! epoch-milliseconds uniformly on both write and read - resolving
//! Open Question 1 (§9), which calls out the legacy code's mixed
//! seconds/milliseconds bug as something this crate must not repeat.

use std::collections::HashMap;

use crate::btree::cursor::Cursor;
use crate::error::{self, Error};
use crate::pager::{PageNum, PageSource};
use crate::record::{self, ColumnValue};
use crate::schema::Table;
use crate::signer::{self, Signer};

pub const AGENTS_TABLE_NAME: &str = "_sharc_agents";

/// `_sharc_agents.Class` (§3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentClass {
    Human,
    Ai,
    Service,
}

impl AgentClass {
    fn to_i64(self) -> i64 {
        match self {
            AgentClass::Human => 0,
            AgentClass::Ai => 1,
            AgentClass::Service => 2,
        }
    }

    fn from_i64(v: i64) -> Result<AgentClass, Error> {
        match v {
            0 => Ok(AgentClass::Human),
            1 => Ok(AgentClass::Ai),
            2 => Ok(AgentClass::Service),
            other => Err(error::corrupt(format!("unknown agent class {other}"))),
        }
    }
}

/// One row of `_sharc_agents` (§3.7).
#[derive(Debug, Clone)]
pub struct Agent {
    pub agent_id: String,
    pub class: AgentClass,
    /// DER `SubjectPublicKeyInfo`, P-256 (§4.14).
    pub public_key_spki: Vec<u8>,
    pub authority_ceiling: i64,
    pub write_scope: String,
    pub read_scope: String,
    /// Epoch milliseconds (Open Question 1, §9 - resolved: ms uniformly).
    pub validity_start_ms: i64,
    /// Epoch milliseconds; `0` means no expiry (§3.7).
    pub validity_end_ms: i64,
    pub parent_agent: Option<String>,
    pub co_sign_required: bool,
    pub signature: Vec<u8>,
}

impl Agent {
    /// Bytes the registration signature covers: every field except the
    /// signature itself, in column order. Binding the signature to the
    /// full row (not just the agent id) makes tampering with any field
    /// - scope, validity window, public key - detectable.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.agent_id.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.class.to_i64().to_be_bytes());
        out.extend_from_slice(&self.public_key_spki);
        out.extend_from_slice(&self.authority_ceiling.to_be_bytes());
        out.extend_from_slice(self.write_scope.as_bytes());
        out.push(0);
        out.extend_from_slice(self.read_scope.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.validity_start_ms.to_be_bytes());
        out.extend_from_slice(&self.validity_end_ms.to_be_bytes());
        if let Some(parent) = &self.parent_agent {
            out.extend_from_slice(parent.as_bytes());
        }
        out.push(0);
        out.push(self.co_sign_required as u8);
        out
    }

    /// `registered -> active (within validity window) -> expired`
    /// lifecycle check (§3.7). Revocation is represented out-of-band
    /// (removing or re-registering the row); this only checks the
    /// timestamps carried on the row itself.
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        now_ms >= self.validity_start_ms && (self.validity_end_ms == 0 || now_ms <= self.validity_end_ms)
    }

    fn from_row(values: &[ColumnValue]) -> Result<Agent, Error> {
        let text = |v: &ColumnValue| -> String {
            match v {
                ColumnValue::Text(b) => String::from_utf8_lossy(b).into_owned(),
                _ => String::new(),
            }
        };
        let blob = |v: &ColumnValue| -> Vec<u8> {
            match v {
                ColumnValue::Blob(b) => b.to_vec(),
                _ => Vec::new(),
            }
        };
        let int = |v: &ColumnValue| -> i64 { v.as_i64().unwrap_or(0) };

        if values.len() != 11 {
            return Err(error::corrupt(format!(
                "_sharc_agents row has {} columns, expected 11",
                values.len()
            )));
        }
        let parent_agent = match &values[8] {
            ColumnValue::Text(b) if !b.is_empty() => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        };
        Ok(Agent {
            agent_id: text(&values[0]),
            class: AgentClass::from_i64(int(&values[1]))?,
            public_key_spki: blob(&values[2]),
            authority_ceiling: int(&values[3]),
            write_scope: text(&values[4]),
            read_scope: text(&values[5]),
            validity_start_ms: int(&values[6]),
            validity_end_ms: int(&values[7]),
            parent_agent,
            co_sign_required: int(&values[9]) != 0,
            signature: blob(&values[10]),
        })
    }

    /// Column values in schema order. The table's rowid (the column at
    /// ordinal 0, `AgentId`'s `INTEGER PRIMARY KEY` alias if one
    /// existed) is carried by the B-tree cell itself rather than this
    /// list; `_sharc_agents` keys on `AgentId` text, not rowid, so
    /// every column here is a real stored value.
    fn to_row(&self) -> Vec<ColumnValue<'_>> {
        vec![
            ColumnValue::Text(self.agent_id.as_bytes()),
            ColumnValue::Int(self.class.to_i64()),
            ColumnValue::Blob(&self.public_key_spki),
            ColumnValue::Int(self.authority_ceiling),
            ColumnValue::Text(self.write_scope.as_bytes()),
            ColumnValue::Text(self.read_scope.as_bytes()),
            ColumnValue::Int(self.validity_start_ms),
            ColumnValue::Int(self.validity_end_ms),
            match &self.parent_agent {
                Some(p) => ColumnValue::Text(p.as_bytes()),
                None => ColumnValue::Null,
            },
            ColumnValue::Int(self.co_sign_required as i64),
            ColumnValue::Blob(&self.signature),
        ]
    }
}

/// Builds the `_sharc_agents` schema row definition for a freshly
/// created database (§6.2).
pub const AGENTS_CREATE_SQL: &str = "CREATE TABLE _sharc_agents (\
AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, \
WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, \
ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB)";

/// Builds an immutable, per-snapshot lookup structure over
/// `_sharc_agents` (§5 "immutable per-snapshot lookup structures").
/// Reload with [`AgentRegistry::load`] whenever the underlying
/// database's schema cookie bumps.
pub struct AgentRegistry {
    by_id: HashMap<String, Agent>,
    next_rowid: i64,
    root_page: PageNum,
}

impl AgentRegistry {
    /// Scans the whole `_sharc_agents` table once and builds the
    /// in-memory index (§5). `_sharc_agents` is keyed on the `AgentId`
    /// text column, not the table's autoincrement rowid, so a cursor
    /// seek alone can't answer `get_agent` - the registry trades a
    /// one-time full scan at load time for O(1) lookups afterward.
    pub fn load<S: PageSource>(source: &S, table: &Table) -> Result<AgentRegistry, Error> {
        let mut cursor = Cursor::new(source, table.root_page, source.page_size());
        let mut by_id = HashMap::new();
        let mut max_rowid = 0i64;
        let mut has_row = cursor.move_first()?;
        while has_row {
            let rowid = cursor.current_rowid().unwrap();
            max_rowid = max_rowid.max(rowid);
            let payload = cursor.payload()?;
            let values = record::decode_all(payload.as_slice())?;
            let agent = Agent::from_row(&values)?;
            by_id.insert(agent.agent_id.clone(), agent);
            has_row = cursor.move_next()?;
        }
        Ok(AgentRegistry {
            by_id,
            next_rowid: max_rowid + 1,
            root_page: table.root_page,
        })
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<&Agent> {
        self.by_id.get(agent_id)
    }

    pub fn list_agents(&self) -> impl Iterator<Item = &Agent> {
        self.by_id.values()
    }

    /// Registers `agent`, signing the row with `signer` so tampering
    /// with any field is detectable on reload (§4.15). Appends a
    /// single leaf cell to the `_sharc_agents` root page; only a
    /// single-page table is supported (§1 Non-goals).
    pub fn register_agent<S: PageSource>(
        &mut self,
        source: &S,
        mut agent: Agent,
        signer: &Signer,
    ) -> Result<(), Error> {
        agent.signature = signer.sign(&agent.signing_bytes());

        let rowid = self.next_rowid;
        let row = agent.to_row();
        let mut body = Vec::new();
        record::encode_record(&row, &mut body);

        let usable = source.page_size();
        let mut cell = Vec::new();
        let inline_len = crate::btree::cell::build_table_leaf_cell(rowid, &body, usable, &mut cell);
        if inline_len != body.len() {
            return Err(Error::InvalidState(
                "agent registration payload too large for inline storage; overflow chains for \
                 the registry are not supported"
                    .into(),
            ));
        }

        let mut page = source.get_page(self.root_page)?.to_vec();
        crate::btree::writer::append_cell_to_leaf(&mut page, 0, &cell)?;
        source.write_page(self.root_page, &page)?;

        self.next_rowid += 1;
        self.by_id.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    /// Verifies a registration row's own signature against the
    /// agent's own public key (self-signed registration, §4.15).
    pub fn verify_registration(agent: &Agent) -> Result<bool, Error> {
        signer::verify(&agent.signing_bytes(), &agent.signature, &agent.public_key_spki)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::MemoryPageSource;
    use crate::schema::Column;

    fn empty_agents_table() -> (MemoryPageSource, Table) {
        let page_size = 4096u32;
        let src = MemoryPageSource::new(page_size);
        let page = crate::btree::writer::new_empty_leaf_page(page_size, 0);
        src.write_page(1, &page).unwrap();
        let table = Table {
            name: AGENTS_TABLE_NAME.into(),
            root_page: 1,
            sql: AGENTS_CREATE_SQL.into(),
            without_rowid: false,
            columns: (0..11)
                .map(|i| Column {
                    ordinal: i,
                    name: format!("col{i}"),
                    declared_type: "TEXT".into(),
                    primary_key: i == 0,
                    not_null: false,
                    has_default: false,
                    is_rowid_alias: false,
                })
                .collect(),
            merged_columns: vec![],
        };
        (src, table)
    }

    #[test]
    fn register_then_reload_round_trips() {
        let (src, table) = empty_agents_table();
        let mut registry = AgentRegistry::load(&src, &table).unwrap();
        assert!(registry.get_agent("agent-alpha").is_none());

        let signer = Signer::generate();
        let agent = Agent {
            agent_id: "agent-alpha".into(),
            class: AgentClass::Ai,
            public_key_spki: signer.public_key_spki().unwrap(),
            authority_ceiling: 5,
            write_scope: "orders".into(),
            read_scope: "*".into(),
            validity_start_ms: 1_700_000_000_000,
            validity_end_ms: 0,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
        };
        registry.register_agent(&src, agent, &signer).unwrap();

        let reloaded = AgentRegistry::load(&src, &table).unwrap();
        let got = reloaded.get_agent("agent-alpha").unwrap();
        assert_eq!(got.authority_ceiling, 5);
        assert!(AgentRegistry::verify_registration(got).unwrap());
        assert!(got.is_active_at(1_800_000_000_000));
    }
}
