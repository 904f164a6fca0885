use serde_json::json;

use super::*;

fn doc(x: i64) -> Value {
    json!({"items": [{"id": 1, "x": x}], "seats": [], "guests": []})
}

#[test]
fn first_record_sets_the_baseline_only() {
    let mut history = History::new(10);
    assert!(!history.record(doc(0), 1));
    assert!(!history.can_undo());
    assert_eq!(history.current(), Some(&doc(0)));
}

#[test]
fn unchanged_document_adds_no_step() {
    let mut history = History::new(10);
    history.record(doc(0), 1);
    assert!(!history.record(doc(0), 2));
    assert_eq!(history.undo_len(), 0);
}

#[test]
fn undo_and_redo_walk_the_snapshots() {
    let mut history = History::new(10);
    history.record(doc(0), 1);
    history.record(doc(1), 2);
    history.record(doc(2), 3);

    assert_eq!(history.undo(), Some(&doc(1)));
    assert_eq!(history.undo(), Some(&doc(0)));
    assert_eq!(history.undo(), None);
    assert_eq!(history.redo(), Some(&doc(1)));
    assert_eq!(history.redo(), Some(&doc(2)));
    assert_eq!(history.redo(), None);
}

#[test]
fn recording_after_undo_discards_redo() {
    let mut history = History::new(10);
    history.record(doc(0), 1);
    history.record(doc(1), 2);
    history.undo();

    assert!(history.record(doc(5), 3));
    assert!(!history.can_redo());
    assert_eq!(history.undo(), Some(&doc(0)));
}

#[test]
fn oldest_steps_fall_off_past_the_limit() {
    let mut history = History::new(2);
    for x in 0..5 {
        history.record(doc(x), x);
    }
    assert_eq!(history.undo_len(), 2);
    history.undo();
    assert_eq!(history.undo(), Some(&doc(2)));
    assert!(!history.can_undo());
}

#[test]
fn history_survives_a_json_round_trip() {
    let mut history = History::new(5);
    history.record(doc(0), 1);
    history.record(doc(1), 2);

    let restored: History = serde_json::from_value(serde_json::to_value(&history).unwrap()).unwrap();
    assert_eq!(restored, history);
}
