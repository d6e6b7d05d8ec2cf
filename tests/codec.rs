mod common;

use chrono::{TimeZone, Utc};
use common::with_both_backends;
use tidewater::{DbError, FieldValue, Record};

fn snapshot(slice: &str, timestamp: i64, room: &str) -> Record {
    let mut record = Record::new();
    record.insert("sliceUUID".to_string(), slice.into());
    record.insert("timestamp".to_string(), timestamp.into());
    record.insert("roomUUID".to_string(), room.into());
    record.insert("frameId".to_string(), 1i64.into());
    record
}

#[test]
fn test_optional_field_round_trips_absent_and_present() {
    with_both_backends(|db, backend| {
        let snapshots = db.model("snapshots");
        let created = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();

        snapshots.post(&snapshot("s-1", 1, "r-1")).unwrap();
        let mut with_time = snapshot("s-1", 2, "r-1");
        with_time.insert("createdAt".to_string(), created.into());
        snapshots.post(&with_time).unwrap();

        let absent = snapshots
            .get()
            .field("sliceUUID")
            .equals("s-1")
            .and("timestamp")
            .equals(1i64)
            .and("roomUUID")
            .equals("r-1")
            .result()
            .unwrap()
            .unwrap();
        assert!(!absent.contains_key("createdAt"), "{backend}");

        let present = snapshots
            .get()
            .field("sliceUUID")
            .equals("s-1")
            .and("timestamp")
            .equals(2i64)
            .and("roomUUID")
            .equals("r-1")
            .result()
            .unwrap()
            .unwrap();
        assert_eq!(present["createdAt"], FieldValue::Timestamp(created), "{backend}");
    });
}

#[test]
fn test_default_value_fills_an_absent_field() {
    with_both_backends(|db, backend| {
        let states = db.model("roomStates");
        let mut record = Record::new();
        record.insert("timestamp".to_string(), 10i64.into());
        record.insert("uuid".to_string(), "a".into());
        record.insert("state".to_string(), "active".into());
        states.post(&record).unwrap();

        let row = states
            .get()
            .field("timestamp")
            .equals(10i64)
            .and("uuid")
            .equals("a")
            .result()
            .unwrap()
            .unwrap();
        assert_eq!(row["appUUID"], FieldValue::Text("unknown".to_string()), "{backend}");
    });
}

#[test]
fn test_enum_fields_round_trip_by_name() {
    with_both_backends(|db, backend| {
        let states = db.model("roomStates");
        for (uuid, state) in [("a", "active"), ("b", "banning"), ("c", "closed")] {
            let mut record = Record::new();
            record.insert("timestamp".to_string(), 1i64.into());
            record.insert("uuid".to_string(), uuid.into());
            record.insert("state".to_string(), state.into());
            states.post(&record).unwrap();
        }
        let rows = states
            .get()
            .field("timestamp")
            .equals(1i64)
            .ascending()
            .results()
            .unwrap();
        let names: Vec<&FieldValue> = rows.iter().map(|r| &r["state"]).collect();
        assert_eq!(
            names,
            vec![
                &FieldValue::Text("active".to_string()),
                &FieldValue::Text("banning".to_string()),
                &FieldValue::Text("closed".to_string())
            ],
            "{backend}"
        );
    });
}

#[test]
fn test_invalid_enum_variant_fails_naming_the_field() {
    with_both_backends(|db, backend| {
        let mut record = Record::new();
        record.insert("timestamp".to_string(), 1i64.into());
        record.insert("uuid".to_string(), "a".into());
        record.insert("state".to_string(), "sleeping".into());
        let err = db.model("roomStates").post(&record).unwrap_err();
        match err {
            DbError::InvalidValue { field, .. } => assert_eq!(field, "state", "{backend}"),
            other => panic!("{backend}: unexpected error {other}"),
        }
    });
}

#[test]
fn test_condition_value_of_the_wrong_type_fails_before_io() {
    with_both_backends(|db, backend| {
        let err = db
            .model("snapshots")
            .get()
            .field("sliceUUID")
            .equals("s-1")
            .and("timestamp")
            .equals("ten")
            .and("roomUUID")
            .equals("r-1")
            .result()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidValue { .. }), "{backend}");
    });
}

#[test]
fn test_unknown_field_on_post_is_rejected() {
    with_both_backends(|db, backend| {
        let mut record = snapshot("s-1", 1, "r-1");
        record.insert("color".to_string(), "red".into());
        let err = db.model("snapshots").post(&record).unwrap_err();
        match err {
            DbError::UnexpectedField { field, .. } => assert_eq!(field, "color", "{backend}"),
            other => panic!("{backend}: unexpected error {other}"),
        }
    });
}
