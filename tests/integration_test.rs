//! Multi-layer integration tests exercising the public `sharc::Database`
//! facade end to end, covering the cross-module scenarios from spec §8
//! that no single module's own test suite can reach on its own.

use sharc::filter::Expr;
use sharc::pager::MemoryPageSource;
use sharc::{Agent, AgentClass, Database, Error, IntegrityReport, Signer};

fn new_agent(agent_id: &str, class: AgentClass, signer: &Signer) -> Agent {
    Agent {
        agent_id: agent_id.into(),
        class,
        public_key_spki: signer.public_key_spki().unwrap(),
        authority_ceiling: 5,
        write_scope: "*".into(),
        read_scope: "*".into(),
        validity_start_ms: 0,
        validity_end_ms: 0,
        parent_agent: None,
        co_sign_required: false,
        signature: Vec::new(),
    }
}

#[test]
fn full_lifecycle_register_agents_append_ledger_and_read_back() {
    let db = Database::<MemoryPageSource>::create_memory(4096).unwrap();

    let alice_signer = Signer::generate();
    let bob_signer = Signer::generate();
    let mut registry = db.load_agent_registry().unwrap();
    db.register_agent(&mut registry, new_agent("alice", AgentClass::Human, &alice_signer), &alice_signer)
        .unwrap();
    db.register_agent(&mut registry, new_agent("bob", AgentClass::Ai, &bob_signer), &bob_signer)
        .unwrap();

    db.append_ledger_entry(b"alice's first entry".to_vec(), "alice", &alice_signer, 1_000)
        .unwrap();
    db.append_ledger_entry(b"bob's first entry".to_vec(), "bob", &bob_signer, 2_000)
        .unwrap();

    let report = db.verify_ledger_integrity(&registry).unwrap();
    assert_eq!(report, IntegrityReport::Valid);

    let mut agent_reader = db.create_reader(sharc::AGENTS_TABLE_NAME, None, None).unwrap();
    let mut seen_agents = Vec::new();
    while agent_reader.read().unwrap() {
        seen_agents.push(agent_reader.get_string(0).unwrap());
    }
    assert_eq!(seen_agents, vec!["alice".to_string(), "bob".to_string()]);

    let mut ledger_reader = db.create_reader(sharc::LEDGER_TABLE_NAME, None, None).unwrap();
    let mut seen_agent_ids = Vec::new();
    while ledger_reader.read().unwrap() {
        seen_agent_ids.push(ledger_reader.get_string(2).unwrap());
    }
    assert_eq!(seen_agent_ids, vec!["alice".to_string(), "bob".to_string()]);
}

/// §8 S3: instance A has an agent ("mallory") unknown to instance B.
/// Mallory signs her own ledger and exports it; B must reject the import
/// at the offending sequence rather than silently accepting an entry from
/// an identity it has no public key for.
#[test]
fn cross_registry_forgery_is_rejected_on_import() {
    let db_a = Database::<MemoryPageSource>::create_memory(4096).unwrap();
    let mallory_signer = Signer::generate();
    let mut registry_a = db_a.load_agent_registry().unwrap();
    db_a.register_agent(&mut registry_a, new_agent("mallory", AgentClass::Ai, &mallory_signer), &mallory_signer)
        .unwrap();
    db_a.append_ledger_entry(b"forged order".to_vec(), "mallory", &mallory_signer, 5_000)
        .unwrap();
    let deltas = db_a.export_ledger_deltas(1).unwrap();
    assert_eq!(deltas.len(), 1);

    let db_b = Database::<MemoryPageSource>::create_memory(4096).unwrap();
    let alice_signer = Signer::generate();
    let mut registry_b = db_b.load_agent_registry().unwrap();
    db_b.register_agent(&mut registry_b, new_agent("alice", AgentClass::Human, &alice_signer), &alice_signer)
        .unwrap();

    let err = db_b.import_ledger_deltas(&deltas, &registry_b).unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownAgent { ref agent_id, sequence: 1 } if agent_id == "mallory"
    ));

    // Nothing was applied; B's own ledger is still empty and valid.
    let report = db_b.verify_ledger_integrity(&registry_b).unwrap();
    assert_eq!(report, IntegrityReport::Valid);
}

/// §8 S5: `_sharc_ledger.SequenceNumber` is an `INTEGER PRIMARY KEY`
/// rowid alias, so its column body in the stored record is always `NULL`
/// - but `IsNotNull` must still read true for every row because the
/// filter pipeline special-cases rowid aliases to the cell's rowid
/// rather than the (always-null) record body.
#[test]
fn rowid_alias_is_not_null_predicate_ignores_the_null_record_body() {
    let db = Database::<MemoryPageSource>::create_memory(4096).unwrap();
    let signer = Signer::generate();
    let mut registry = db.load_agent_registry().unwrap();
    db.register_agent(&mut registry, new_agent("alice", AgentClass::Human, &signer), &signer)
        .unwrap();
    db.append_ledger_entry(b"one".to_vec(), "alice", &signer, 1_000).unwrap();
    db.append_ledger_entry(b"two".to_vec(), "alice", &signer, 2_000).unwrap();

    let filter = Expr::is_not_null("SequenceNumber");
    let mut reader = db.create_reader(sharc::LEDGER_TABLE_NAME, Some(&filter), None).unwrap();
    let mut count = 0;
    while reader.read().unwrap() {
        count += 1;
    }
    assert_eq!(count, 2, "every row's rowid-aliased SequenceNumber is non-null");
}

#[test]
fn import_deltas_round_trips_a_multi_entry_chain_between_two_databases() {
    let db_a = Database::<MemoryPageSource>::create_memory(4096).unwrap();
    let signer = Signer::generate();
    let mut registry_a = db_a.load_agent_registry().unwrap();
    db_a.register_agent(&mut registry_a, new_agent("alice", AgentClass::Human, &signer), &signer)
        .unwrap();
    db_a.append_ledger_entry(b"first".to_vec(), "alice", &signer, 1_000).unwrap();
    db_a.append_ledger_entry(b"second".to_vec(), "alice", &signer, 2_000).unwrap();
    db_a.append_ledger_entry(b"third".to_vec(), "alice", &signer, 3_000).unwrap();

    let deltas = db_a.export_ledger_deltas(1).unwrap();
    assert_eq!(deltas.len(), 3);

    let db_b = Database::<MemoryPageSource>::create_memory(4096).unwrap();
    let mut registry_b = db_b.load_agent_registry().unwrap();
    db_b.register_agent(&mut registry_b, new_agent("alice", AgentClass::Human, &signer), &signer)
        .unwrap();

    let applied = db_b.import_ledger_deltas(&deltas, &registry_b).unwrap();
    assert_eq!(applied, 3);
    assert_eq!(db_b.verify_ledger_integrity(&registry_b).unwrap(), IntegrityReport::Valid);
}
