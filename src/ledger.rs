//! Append-only hash-chained ledger (§3.6, §4.13).
//!
//! **[ADDED — no teacher counterpart]**. Built on L1-L8 exactly as any
//! other consumer of the reader/cursor would be - `_sharc_ledger` is
//! read and appended to with the same [`crate::btree::cursor::Cursor`]
//! and [`crate::record`] codec `stored_table.rs` uses for an ordinary
//! table, generalized only in that `append`/`import_deltas` also write
//! through [`crate::btree::writer`] (single-page, no split/merge, per
//! the Non-goal in §1). Cryptography is [`crate::signer`]; see
//! DESIGN.md for why that family of crate is sourced outside the
//! example pack.
//!
//! **Wire-format decision (Open Question, resolved here — see
//! DESIGN.md).** §4.13's `ExportDeltas` says it emits "the
//! record-encoded bytes of each entry", and §6.4 says the receiver
//! "reassembles the chain using each record's `SequenceNumber`" - but
//! `SequenceNumber` is the table's `INTEGER PRIMARY KEY`, a rowid
//! alias that never appears inside the encoded record body (§4.10
//! "Special cases"). A bare record body alone can't carry it. This
//! module exports the full leaf-cell encoding instead (payload-size
//! varint, rowid varint, then the record body - exactly what
//! [`crate::btree::cell::build_table_leaf_cell`] produces), so the
//! sequence number travels with the payload across the wire.

use crate::agents::AgentRegistry;
use crate::btree::cell::{self, TableLeafCell};
use crate::btree::cursor::Cursor;
use crate::btree::writer;
use crate::error::{self, Error};
use crate::pager::{PageNum, PageSource};
use crate::record::{self, ColumnValue};
use crate::signer::{self, Signer};

pub const LEDGER_TABLE_NAME: &str = "_sharc_ledger";

/// Builds the `_sharc_ledger` schema row definition for a freshly
/// created database (§6.2).
pub const LEDGER_CREATE_SQL: &str = "CREATE TABLE _sharc_ledger (\
SequenceNumber INTEGER PRIMARY KEY, Timestamp INTEGER, AgentId TEXT, Payload BLOB, \
PayloadHash BLOB, PreviousHash BLOB, Signature BLOB)";

/// One decoded row of `_sharc_ledger` (§3.6).
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub sequence: i64,
    pub timestamp_ms: i64,
    pub agent_id: String,
    pub payload: Vec<u8>,
    pub payload_hash: [u8; 32],
    pub previous_hash: [u8; 32],
    pub signature: Vec<u8>,
}

/// The bytes an entry's signature covers: `Sequence || Timestamp ||
/// AgentId || PayloadHash || PreviousHash` (§3.6).
fn signing_message(sequence: i64, timestamp_ms: i64, agent_id: &str, payload_hash: &[u8; 32], previous_hash: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + 8 + agent_id.len() + 32 + 32);
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(&timestamp_ms.to_be_bytes());
    message.extend_from_slice(agent_id.as_bytes());
    message.extend_from_slice(payload_hash);
    message.extend_from_slice(previous_hash);
    message
}

fn fixed_32(bytes: &[u8], what: &str) -> Result<[u8; 32], Error> {
    bytes
        .try_into()
        .map_err(|_| error::corrupt(format!("{what} is not 32 bytes")))
}

impl LedgerEntry {
    /// Parses a row decoded off `_sharc_ledger`; `sequence` is the
    /// cell's rowid (the `SequenceNumber` alias), not part of `values`.
    fn from_row(sequence: i64, values: &[ColumnValue]) -> Result<LedgerEntry, Error> {
        if values.len() != 7 {
            return Err(error::corrupt("_sharc_ledger row has the wrong column count"));
        }
        let timestamp_ms = values[1]
            .as_i64()
            .ok_or_else(|| error::corrupt("ledger Timestamp is not an integer"))?;
        let agent_id = match values[2] {
            ColumnValue::Text(b) => String::from_utf8_lossy(b).into_owned(),
            _ => return Err(error::corrupt("ledger AgentId is not text")),
        };
        let payload = values[3].as_bytes().unwrap_or(&[]).to_vec();
        let payload_hash = fixed_32(values[4].as_bytes().unwrap_or(&[]), "PayloadHash")?;
        let previous_hash = fixed_32(values[5].as_bytes().unwrap_or(&[]), "PreviousHash")?;
        let signature = values[6].as_bytes().unwrap_or(&[]).to_vec();
        Ok(LedgerEntry {
            sequence,
            timestamp_ms,
            agent_id,
            payload,
            payload_hash,
            previous_hash,
            signature,
        })
    }

    /// Column values in schema order, including the `Null` placeholder
    /// for the rowid-aliased `SequenceNumber` slot (§4.10 "Special
    /// cases" - a rowid alias's own column carries a `NULL` serial
    /// type in the stored record; the real value lives in the cell's
    /// rowid varint).
    fn to_row(&self) -> Vec<ColumnValue<'_>> {
        vec![
            ColumnValue::Null,
            ColumnValue::Int(self.timestamp_ms),
            ColumnValue::Text(self.agent_id.as_bytes()),
            ColumnValue::Blob(&self.payload),
            ColumnValue::Blob(&self.payload_hash),
            ColumnValue::Blob(&self.previous_hash),
            ColumnValue::Blob(&self.signature),
        ]
    }

    fn signing_bytes(&self) -> Vec<u8> {
        signing_message(self.sequence, self.timestamp_ms, &self.agent_id, &self.payload_hash, &self.previous_hash)
    }
}

/// First sequence number that fails verification, along with why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailure {
    SequenceGap,
    PayloadHashMismatch,
    HashChainBroken,
    UnknownAgent,
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityReport {
    Valid,
    Failed { sequence: u64, reason: IntegrityFailure },
}

/// Operates on the single-page `_sharc_ledger` B-tree (§1 Non-goals:
/// no split/merge engine, so the ledger never grows past one leaf
/// page in this crate).
pub struct LedgerManager {
    root_page: PageNum,
}

impl LedgerManager {
    pub fn new(root_page: PageNum) -> LedgerManager {
        LedgerManager { root_page }
    }

    /// Finds the current chain tip: `(next sequence, previous hash)`.
    /// An empty ledger starts at sequence 1 with an all-zero previous
    /// hash (§3.6).
    fn tip<S: PageSource>(&self, source: &S) -> Result<(i64, [u8; 32]), Error> {
        let mut cursor = Cursor::new(source, self.root_page, source.page_size());
        if !cursor.move_last()? {
            return Ok((1, [0u8; 32]));
        }
        let sequence = cursor.current_rowid().unwrap();
        let payload = cursor.payload()?;
        let values = record::decode_all(payload.as_slice())?;
        let last = LedgerEntry::from_row(sequence, &values)?;
        Ok((sequence + 1, last.payload_hash))
    }

    /// Appends a new entry signed by `signer` (§4.13 `Append`).
    pub fn append<S: PageSource>(
        &self,
        source: &S,
        payload: Vec<u8>,
        agent_id: &str,
        signer: &Signer,
        timestamp_ms: i64,
    ) -> Result<LedgerEntry, Error> {
        let (sequence, previous_hash) = self.tip(source)?;
        let payload_hash = signer::sha256(&payload);
        let message = signing_message(sequence, timestamp_ms, agent_id, &payload_hash, &previous_hash);
        let signature = signer.sign(&message);

        let entry = LedgerEntry {
            sequence,
            timestamp_ms,
            agent_id: agent_id.to_string(),
            payload,
            payload_hash,
            previous_hash,
            signature,
        };
        self.write_entry(source, &entry)?;
        Ok(entry)
    }

    fn write_entry<S: PageSource>(&self, source: &S, entry: &LedgerEntry) -> Result<(), Error> {
        let row = entry.to_row();
        let mut body = Vec::new();
        record::encode_record(&row, &mut body);

        let usable = source.page_size();
        let mut cell_bytes = Vec::new();
        let inline_len = cell::build_table_leaf_cell(entry.sequence, &body, usable, &mut cell_bytes);
        if inline_len != body.len() {
            return Err(Error::InvalidState(
                "ledger entry payload too large for inline storage; overflow chains for the \
                 ledger are not supported"
                    .into(),
            ));
        }

        let mut page = source.get_page(self.root_page)?.to_vec();
        writer::append_cell_to_leaf(&mut page, 0, &cell_bytes)?;
        source.write_page(self.root_page, &page)?;
        Ok(())
    }

    /// Walks the whole chain checking monotonicity, hash links, and
    /// signatures (§4.13 `VerifyIntegrity`). `registry` supplies each
    /// agent's public key.
    pub fn verify_integrity<S: PageSource>(&self, source: &S, registry: &AgentRegistry) -> Result<IntegrityReport, Error> {
        let mut cursor = Cursor::new(source, self.root_page, source.page_size());
        let mut expected_sequence = 1i64;
        let mut previous_hash = [0u8; 32];

        let mut has_row = cursor.move_first()?;
        while has_row {
            let sequence = cursor.current_rowid().unwrap();
            let payload = cursor.payload()?;
            let values = record::decode_all(payload.as_slice())?;
            let entry = LedgerEntry::from_row(sequence, &values)?;

            if sequence != expected_sequence {
                log::warn!("ledger verification failed at sequence {sequence}: sequence gap");
                return Ok(IntegrityReport::Failed {
                    sequence: sequence as u64,
                    reason: IntegrityFailure::SequenceGap,
                });
            }
            if entry.payload_hash != signer::sha256(&entry.payload) {
                log::warn!("ledger verification failed at sequence {sequence}: payload hash mismatch");
                return Ok(IntegrityReport::Failed {
                    sequence: sequence as u64,
                    reason: IntegrityFailure::PayloadHashMismatch,
                });
            }
            if entry.previous_hash != previous_hash {
                log::warn!("ledger verification failed at sequence {sequence}: hash chain broken");
                return Ok(IntegrityReport::Failed {
                    sequence: sequence as u64,
                    reason: IntegrityFailure::HashChainBroken,
                });
            }
            let agent = match registry.get_agent(&entry.agent_id) {
                Some(a) => a,
                None => {
                    log::warn!("ledger verification failed at sequence {sequence}: unknown agent {}", entry.agent_id);
                    return Ok(IntegrityReport::Failed {
                        sequence: sequence as u64,
                        reason: IntegrityFailure::UnknownAgent,
                    })
                }
            };
            let verified = signer::verify(&entry.signing_bytes(), &entry.signature, &agent.public_key_spki)?;
            if !verified {
                log::warn!("ledger verification failed at sequence {sequence}: invalid signature");
                return Ok(IntegrityReport::Failed {
                    sequence: sequence as u64,
                    reason: IntegrityFailure::InvalidSignature,
                });
            }

            previous_hash = entry.payload_hash;
            expected_sequence += 1;
            has_row = cursor.move_next()?;
        }
        Ok(IntegrityReport::Valid)
    }

    /// Emits the full leaf-cell bytes of every entry with sequence
    /// number `>= from_seq`, in order (§4.13 `ExportDeltas`).
    pub fn export_deltas<S: PageSource>(&self, source: &S, from_seq: u64) -> Result<Vec<Vec<u8>>, Error> {
        let mut cursor = Cursor::new(source, self.root_page, source.page_size());
        let mut out = Vec::new();

        let mut has_row = cursor.seek(from_seq as i64).map(|_| cursor.current_rowid().is_some())?;
        while has_row {
            let sequence = cursor.current_rowid().unwrap();
            let payload = cursor.payload()?;
            let mut cell_bytes = Vec::new();
            cell::build_table_leaf_cell(sequence, payload.as_slice(), source.page_size(), &mut cell_bytes);
            out.push(cell_bytes);
            has_row = cursor.move_next()?;
        }
        Ok(out)
    }

    /// Imports a batch of leaf-cell-encoded entries produced by
    /// [`LedgerManager::export_deltas`] (§4.13 `ImportDeltas`).
    /// Each record is checked against the receiver's own chain tip
    /// before being applied: sequence continuity, hash link, agent
    /// identity, and signature. **All-or-nothing per record**: the
    /// first record that fails is rejected and nothing from that
    /// record onward is applied, but every record accepted before the
    /// failure stays committed (§4.13, §8 scenario S3).
    pub fn import_deltas<S: PageSource>(
        &self,
        source: &S,
        records: &[Vec<u8>],
        registry: &AgentRegistry,
    ) -> Result<u64, Error> {
        let (mut expected_sequence, mut previous_hash) = self.tip(source)?;
        let mut applied = 0u64;

        for record_bytes in records {
            let TableLeafCell {
                header_len,
                payload_size,
                rowid: sequence,
            } = cell::parse_table_leaf_cell(record_bytes)?;
            if header_len + payload_size > record_bytes.len() {
                return Err(error::corrupt("ledger delta record shorter than its declared payload"));
            }
            let body = &record_bytes[header_len..header_len + payload_size];
            let values = record::decode_all(body)?;
            let entry = LedgerEntry::from_row(sequence, &values)?;

            if sequence != expected_sequence {
                return Err(Error::SequenceConflict {
                    sequence: sequence as u64,
                });
            }
            if entry.payload_hash != signer::sha256(&entry.payload) || entry.previous_hash != previous_hash {
                return Err(Error::HashChainBroken {
                    sequence: sequence as u64,
                });
            }
            let agent = registry.get_agent(&entry.agent_id).ok_or_else(|| Error::UnknownAgent {
                agent_id: entry.agent_id.clone(),
                sequence: sequence as u64,
            })?;
            let verified = signer::verify(&entry.signing_bytes(), &entry.signature, &agent.public_key_spki)?;
            if !verified {
                return Err(Error::InvalidSignature {
                    sequence: sequence as u64,
                });
            }

            self.write_entry(source, &entry)?;
            previous_hash = entry.payload_hash;
            expected_sequence += 1;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentClass};
    use crate::pager::MemoryPageSource;
    use crate::schema::{Column, Table};

    fn empty_ledger() -> (MemoryPageSource, LedgerManager) {
        let page_size = 4096u32;
        let src = MemoryPageSource::new(page_size);
        let page = writer::new_empty_leaf_page(page_size, 0);
        src.write_page(1, &page).unwrap();
        (src, LedgerManager::new(1))
    }

    fn registry_with(src: &MemoryPageSource, agent_id: &str, signer: &Signer) -> AgentRegistry {
        let page = writer::new_empty_leaf_page(src.page_size(), 0);
        // agent registry lives on a separate page, built directly to avoid a
        // schema dependency in this test module.
        let table = Table {
            name: crate::agents::AGENTS_TABLE_NAME.into(),
            root_page: 2,
            sql: crate::agents::AGENTS_CREATE_SQL.into(),
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
        src.write_page(2, &page).unwrap();
        let mut registry = AgentRegistry::load(src, &table).unwrap();
        registry
            .register_agent(
                src,
                Agent {
                    agent_id: agent_id.into(),
                    class: AgentClass::Ai,
                    public_key_spki: signer.public_key_spki().unwrap(),
                    authority_ceiling: 10,
                    write_scope: "*".into(),
                    read_scope: "*".into(),
                    validity_start_ms: 0,
                    validity_end_ms: 0,
                    parent_agent: None,
                    co_sign_required: false,
                    signature: Vec::new(),
                },
                signer,
            )
            .unwrap();
        registry
    }

    #[test]
    fn append_then_verify_integrity_succeeds() {
        let (src, ledger) = empty_ledger();
        let signer = Signer::generate();
        let registry = registry_with(&src, "agent-alpha", &signer);

        ledger.append(&src, b"first".to_vec(), "agent-alpha", &signer, 1_000).unwrap();
        ledger.append(&src, b"second".to_vec(), "agent-alpha", &signer, 2_000).unwrap();

        let report = ledger.verify_integrity(&src, &registry).unwrap();
        assert_eq!(report, IntegrityReport::Valid);
    }

    #[test]
    fn tampered_payload_hash_fails_at_its_own_sequence() {
        let (src, ledger) = empty_ledger();
        let signer = Signer::generate();
        let registry = registry_with(&src, "agent-alpha", &signer);

        ledger.append(&src, b"first".to_vec(), "agent-alpha", &signer, 1_000).unwrap();
        ledger.append(&src, b"second".to_vec(), "agent-alpha", &signer, 2_000).unwrap();

        let mut page = src.get_page(1).unwrap().to_vec();
        // Flip a byte inside the first entry's stored PayloadHash.
        let hdr = crate::btree::header::BtreeHeader::parse(&page, 0).unwrap();
        let ptr = hdr.get_cell_pointer(&page, 0, 0).unwrap() as usize;
        let parsed = cell::parse_table_leaf_cell(&page[ptr..]).unwrap();
        let body_start = ptr + parsed.header_len;
        page[body_start] ^= 0xff;
        src.write_page(1, &page).unwrap();

        let report = ledger.verify_integrity(&src, &registry).unwrap();
        match report {
            IntegrityReport::Failed { sequence, .. } => assert_eq!(sequence, 1),
            IntegrityReport::Valid => panic!("expected a failure"),
        }
    }

    #[test]
    fn export_then_import_round_trips_into_a_fresh_ledger() {
        let (src_a, ledger_a) = empty_ledger();
        let signer = Signer::generate();
        let registry = registry_with(&src_a, "agent-alpha", &signer);
        ledger_a.append(&src_a, b"first".to_vec(), "agent-alpha", &signer, 1_000).unwrap();
        ledger_a.append(&src_a, b"second".to_vec(), "agent-alpha", &signer, 2_000).unwrap();

        let deltas = ledger_a.export_deltas(&src_a, 1).unwrap();
        assert_eq!(deltas.len(), 2);

        let (src_b, ledger_b) = empty_ledger();
        let applied = ledger_b.import_deltas(&src_b, &deltas, &registry).unwrap();
        assert_eq!(applied, 2);
        let report = ledger_b.verify_integrity(&src_b, &registry).unwrap();
        assert_eq!(report, IntegrityReport::Valid);
    }

    #[test]
    fn import_rejects_unknown_agent() {
        let (src_a, ledger_a) = empty_ledger();
        let mallory = Signer::generate();
        // Register mallory only in the sender's own (throwaway) registry,
        // never in the receiver's.
        let _sender_registry = registry_with(&src_a, "mallory", &mallory);
        ledger_a.append(&src_a, b"forged".to_vec(), "mallory", &mallory, 5_000).unwrap();
        let deltas = ledger_a.export_deltas(&src_a, 1).unwrap();

        let (src_b, ledger_b) = empty_ledger();
        let signer_b = Signer::generate();
        let registry_b = registry_with(&src_b, "agent-alpha", &signer_b);
        let err = ledger_b.import_deltas(&src_b, &deltas, &registry_b).unwrap_err();
        assert!(matches!(err, Error::UnknownAgent { sequence: 1, .. }));
    }
}
