//! Entitlement enforcer (§3.7, §4.16).
//!
//! **[ADDED — no teacher counterpart]**. Sits directly on top of
//! [`crate::agents::AgentRegistry`] the same way the teacher layers
//! `stored_table.rs` on top of `stored_db.rs` - a thin rule-checking
//! pass over data the layer below already knows how to fetch. Scope
//! strings are parsed once per call and not cached across calls: scope
//! strings are short and parsing them is cheap compared to the B-tree
//! walk an actual read or write does, so there is no teacher-grounded
//! precedent here for adding a cache the way `AgentRegistry` caches
//! rows.

use std::collections::HashSet;

use crate::agents::{Agent, AgentRegistry};
use crate::error::Error;
use crate::signer;

/// How a caller's claimed [`AgentInfo`] is authenticated before its
/// scopes are trusted (§4.16 step 1, Open Question 2 - resolved here:
/// both modes are supported, `RegistryOnly` for trusted in-process
/// callers and `SignedToken` for untrusted call boundaries, rather
/// than picking one and dropping the other).
///
/// `RegistryOnly` trusts that the caller's `agent_id` is who it claims
/// to be (suitable only when the caller itself is already
/// authenticated by an outer layer, e.g. an in-process embedding).
/// `SignedToken` additionally requires a signature over `message`
/// (typically a nonce or timestamp the host issued) verifiable against
/// the agent's own registered public key, so a caller cannot simply
/// claim someone else's `agent_id`.
pub enum IdentityProof<'a> {
    RegistryOnly,
    SignedToken { message: &'a [u8], signature: &'a [u8] },
}

/// A caller's claimed identity plus how to verify it (§4.16 step 1).
pub struct AgentInfo<'a> {
    pub agent_id: String,
    pub proof: IdentityProof<'a>,
}

/// One table/column reference inspected during a read (§4.16 step 3:
/// "columns referenced anywhere in the query - predicates, order,
/// group, join-on, projection").
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    pub table: &'a str,
    pub column: &'a str,
}

/// The operation an [`Enforcer`] is asked to authorize. Callers collect
/// every table and column reference across the whole query shape
/// (projection, predicate, join-on, order, group) into one `Operation`
/// before calling `check_read` - enforcement itself does not walk a
/// query tree, it only checks the references it's handed (Open
/// Question 3, resolved: the caller is responsible for exhaustively
/// collecting referenced columns from every clause kind; the enforcer
/// trusts that collection is complete and fails closed on anything
/// not listed).
pub enum Operation<'a> {
    Read {
        tables: &'a [&'a str],
        columns: &'a [ColumnRef<'a>],
    },
    Write {
        table: &'a str,
        columns: &'a [&'a str],
    },
}

/// A table's scope as named in a `WriteScope`/`ReadScope` string:
/// either the whole table, or a specific column of it. `*` alone
/// grants every table and every column (§3.7 "the token `*` grants all
/// tables").
enum ScopeEntry {
    Wildcard,
    Table(String),
    Column(String, String),
}

fn parse_scope(scope: &str) -> Vec<ScopeEntry> {
    scope
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            if token == "*" {
                ScopeEntry::Wildcard
            } else if let Some((table, column)) = token.split_once('.') {
                ScopeEntry::Column(table.to_string(), column.to_string())
            } else {
                ScopeEntry::Table(token.to_string())
            }
        })
        .collect()
}

struct ParsedScope {
    wildcard: bool,
    tables: HashSet<String>,
    columns: HashSet<(String, String)>,
}

impl ParsedScope {
    fn parse(scope: &str) -> ParsedScope {
        let mut wildcard = false;
        let mut tables = HashSet::new();
        let mut columns = HashSet::new();
        for entry in parse_scope(scope) {
            match entry {
                ScopeEntry::Wildcard => wildcard = true,
                ScopeEntry::Table(t) => {
                    tables.insert(t.to_ascii_lowercase());
                }
                ScopeEntry::Column(t, c) => {
                    columns.insert((t.to_ascii_lowercase(), c.to_ascii_lowercase()));
                }
            }
        }
        ParsedScope { wildcard, tables, columns }
    }

    /// True only if the whole table is granted (wildcard or a bare
    /// table entry) - not if merely some column of it is named.
    fn table_wholly_granted(&self, table: &str) -> bool {
        self.wildcard || self.tables.contains(&table.to_ascii_lowercase())
    }

    /// The per-table gate a reference to this table must pass before
    /// its columns are checked individually: the whole table is
    /// granted, or the scope names at least one of its columns
    /// (a column-only grant still reaches `allows_column` to gate the
    /// rest of that table's columns one at a time).
    fn allows_table(&self, table: &str) -> bool {
        let table = table.to_ascii_lowercase();
        self.table_wholly_granted(&table) || self.columns.iter().any(|(t, _)| t == &table)
    }

    /// A column is in scope if the whole table is in scope, or the
    /// specific `table.column` pair was named.
    fn allows_column(&self, table: &str, column: &str) -> bool {
        self.table_wholly_granted(table)
            || self.columns.contains(&(table.to_ascii_lowercase(), column.to_ascii_lowercase()))
    }
}

/// Checks caller-supplied operations against the agent registry
/// (§4.16). Every path fails closed: a missing agent, an expired
/// validity window, an unverifiable identity proof, or a scope that
/// doesn't name the table/column all produce `PermissionDenied`.
pub struct Enforcer<'r> {
    registry: &'r AgentRegistry,
}

/// Builds a `PermissionDenied` error, logging the denial at WARN level
/// on the way out (§9 "Logging events": "entitlement denial").
fn denied(msg: String) -> Error {
    log::warn!("entitlement denied: {msg}");
    Error::PermissionDenied(msg)
}

impl<'r> Enforcer<'r> {
    pub fn new(registry: &'r AgentRegistry) -> Enforcer<'r> {
        Enforcer { registry }
    }

    /// Resolves `info` to a registered, currently-active [`Agent`],
    /// verifying its identity proof along the way (§4.16 steps 1-2).
    fn authenticate(&self, info: &AgentInfo, now_ms: i64) -> Result<&Agent, Error> {
        let agent = self
            .registry
            .get_agent(&info.agent_id)
            .ok_or_else(|| denied(format!("unknown agent {}", info.agent_id)))?;

        match &info.proof {
            IdentityProof::RegistryOnly => {}
            IdentityProof::SignedToken { message, signature } => {
                let ok = signer::verify(message, signature, &agent.public_key_spki)?;
                if !ok {
                    return Err(denied(format!(
                        "identity proof for agent {} did not verify",
                        info.agent_id
                    )));
                }
            }
        }

        if !agent.is_active_at(now_ms) {
            return Err(denied(format!(
                "agent {} is outside its validity window",
                info.agent_id
            )));
        }
        Ok(agent)
    }

    /// Authorizes a read (§4.16 step 3): every referenced table must
    /// lie in `ReadScope`, and every referenced column must lie in the
    /// per-column read scope when that table isn't scoped wholesale.
    pub fn check_read(&self, info: &AgentInfo, op: &Operation, now_ms: i64) -> Result<(), Error> {
        let agent = self.authenticate(info, now_ms)?;
        let scope = ParsedScope::parse(&agent.read_scope);

        let Operation::Read { tables, columns } = op else {
            return Err(denied("check_read called with a write operation".into()));
        };
        for table in *tables {
            if !scope.allows_table(table) {
                return Err(denied(format!(
                    "agent {} has no read access to table {table}",
                    info.agent_id
                )));
            }
        }
        for column_ref in *columns {
            if !scope.allows_column(column_ref.table, column_ref.column) {
                return Err(denied(format!(
                    "agent {} has no read access to column {}.{}",
                    info.agent_id, column_ref.table, column_ref.column
                )));
            }
        }
        Ok(())
    }

    /// Authorizes a write (§4.16 step 4): the target table must lie in
    /// `WriteScope`, and every column in the write's own payload must
    /// lie in the per-column write scope. Also enforces the agent's
    /// `AuthorityCeiling` is non-zero (`0` means no write authority at
    /// all) and, when `CoSignRequired` is set, that the caller isn't
    /// trying to write unaccompanied - co-signing itself is a matter
    /// for the caller (it must supply a second verified `AgentInfo`
    /// through its own `check_write` call); this method only refuses
    /// to authorize a solo write when co-signing is mandatory.
    pub fn check_write(&self, info: &AgentInfo, op: &Operation, now_ms: i64) -> Result<(), Error> {
        let agent = self.authenticate(info, now_ms)?;

        let Operation::Write { table, columns } = op else {
            return Err(denied("check_write called with a read operation".into()));
        };

        if agent.authority_ceiling <= 0 {
            return Err(denied(format!("agent {} has no write authority", info.agent_id)));
        }
        if agent.co_sign_required {
            return Err(denied(format!(
                "agent {} requires a co-signer for writes to {table}",
                info.agent_id
            )));
        }

        let scope = ParsedScope::parse(&agent.write_scope);
        if !scope.allows_table(table) {
            return Err(denied(format!(
                "agent {} has no write access to table {table}",
                info.agent_id
            )));
        }
        for column in *columns {
            if !scope.allows_column(table, column) {
                return Err(denied(format!(
                    "agent {} has no write access to column {table}.{column}",
                    info.agent_id
                )));
            }
        }
        Ok(())
    }
}
