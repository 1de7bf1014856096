//! End-to-end convergence scenarios driven entirely through
//! [`SyncEngine::process_request`], exercising the literal request/response
//! shapes called out as testable properties: creation and seeding,
//! incremental convergence, concurrent multi-user merges, lost-response
//! recovery via the backup shadow, nullification, and multi-slot buffer
//! reassembly.

use mobwrite_core::{delta, Config, SyncEngine};

// ============================================================================
// Create, seed, and converge
// ============================================================================

#[test]
fn create_and_seed_then_converge_on_the_next_round_trip() {
    let engine = SyncEngine::new(Config::default());

    let response = engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
    assert!(response.contains("F:0:doc\n"), "response was {response:?}");
    // The master was just seeded from this same payload, so shadow and
    // master are identical and the returned delta is a no-op ("=5": keep
    // all 5 characters).
    assert!(response.contains("d:0:=5\n"), "response was {response:?}");
    assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("Hello"));

    // Alice acks server version 0 and reports no further edits of her own
    // ("=5" keeps every character unchanged); the server should converge on
    // an empty delta again.
    let response = engine.process_request("u:alice\nF:1:doc\nd:0:=5\n\n");
    assert!(response.contains("d:1:=5\n"), "response was {response:?}");
    assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("Hello"));
}

// ============================================================================
// Concurrent multi-user merge
// ============================================================================

#[test]
fn two_users_non_overlapping_edits_both_survive_in_the_merged_master() {
    let engine = SyncEngine::new(Config::default());

    engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
    engine.process_request("u:bob\nF:0:doc\nR:0:Hello\n\n");

    let alice_delta = delta::to_delta(&delta::diff("Hello", "Hello world"));
    engine.process_request(&format!("u:alice\nF:1:doc\nd:0:{alice_delta}\n\n"));

    let bob_delta = delta::to_delta(&delta::diff("Hello", "Hello!"));
    engine.process_request(&format!("u:bob\nF:1:doc\nd:0:{bob_delta}\n\n"));

    let master = engine.texts().get("doc").unwrap().get().unwrap();
    assert!(master.contains("world"), "master {master:?} lost alice's edit");
    assert!(master.contains('!'), "master {master:?} lost bob's edit");
}

#[test]
fn an_uppercase_raw_dump_forcibly_overwrites_an_already_seeded_master() {
    // `R:` (uppercase) carries the force flag regardless of whether the
    // document already has a master text, distinguishing it from the
    // lowercase `r:` resync-request form.
    let engine = SyncEngine::new(Config::default());

    engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
    let bob_response = engine.process_request("u:bob\nF:0:doc\nR:0:Goodbye\n\n");
    assert!(!bob_response.is_empty());
    assert_eq!(
        engine.texts().get("doc").unwrap().get().as_deref(),
        Some("Goodbye"),
    );
}

// ============================================================================
// Lost-response recovery
// ============================================================================

#[test]
fn retrying_after_a_lost_response_rolls_back_without_duplicating_the_edit() {
    let engine = SyncEngine::new(Config::default());
    engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");

    let wire_delta = delta::to_delta(&delta::diff("Hello", "Hello world"));
    let request = format!("u:alice\nF:1:doc\nd:0:{wire_delta}\n\n");

    let first = engine.process_request(&request);
    assert!(!first.is_empty());
    assert_eq!(
        engine.texts().get("doc").unwrap().get().as_deref(),
        Some("Hello world")
    );

    // The response above is dropped on the wire; alice retries identically,
    // still quoting server_version 1 (what she last saw acked).
    let second = engine.process_request(&request);
    assert!(!second.is_empty());
    assert_eq!(
        engine.texts().get("doc").unwrap().get().as_deref(),
        Some("Hello world"),
        "retry after a lost response must not duplicate the edit"
    );
}

// ============================================================================
// Nullify
// ============================================================================

#[test]
fn nullify_destroys_the_view_and_a_later_sync_starts_fresh() {
    let engine = SyncEngine::new(Config::default());
    engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
    assert!(engine.views().get("alice", "doc").is_some());

    let response = engine.process_request("u:alice\nN:doc\n\n");
    assert_eq!(response, "");
    assert!(engine.views().get("alice", "doc").is_none());
    assert!(engine.texts().get("doc").unwrap().get().is_none());

    // A fresh sync after nullification starts the view over at version 0.
    let response = engine.process_request("u:alice\nF:0:doc\nR:0:Fresh start\n\n");
    assert!(response.contains("F:0:doc\n"));
    assert_eq!(
        engine.texts().get("doc").unwrap().get().as_deref(),
        Some("Fresh start")
    );
}

// ============================================================================
// Multi-slot buffer reassembly
// ============================================================================

#[test]
fn a_request_split_across_buffer_fragments_reassembles_regardless_of_order() {
    let nested = "u:alice\nF:0:doc\nR:0:Hi\n\n";
    let quoted = delta::quote(nested);
    let (first_half, second_half) = quoted.split_at(quoted.len() / 2);

    for (first, second) in [(1, 2), (2, 1)] {
        let engine = SyncEngine::new(Config::default());
        let fragments = [
            (1, first_half),
            (2, second_half),
        ];
        let ordered = if first == 1 { fragments } else { [fragments[1], fragments[0]] };

        let mut last_response = String::new();
        for (index, text) in ordered {
            let request = format!("b:x 2 {index} {text}\n\n");
            last_response = engine.process_request(&request);
        }

        assert!(!last_response.is_empty(), "reassembly for order {second:?} produced nothing");
        assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("Hi"));
    }
}

// ============================================================================
// MAX_CHARS truncation
// ============================================================================

#[test]
fn oversized_text_keeps_only_the_most_recent_max_chars() {
    let engine = SyncEngine::new(Config {
        max_chars: 5,
        ..Config::default()
    });
    engine.process_request("u:alice\nF:0:doc\nR:0:0123456789\n\n");
    assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("56789"));
}
