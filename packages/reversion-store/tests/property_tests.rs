//! Property tests: codec round-trip and `get_unique`

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use reversion_store::{
    get_unique, FieldValue, ModelInstance, ModerationStatus, SerializerRegistry, Version,
};

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        any::<f64>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(FieldValue::Float),
        "\\PC{0,24}".prop_map(FieldValue::Text),
        (1i32..=9999, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
            FieldValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        }),
        (0i64..4_000_000_000, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            FieldValue::DateTime(Utc.timestamp_opt(secs, nanos).unwrap())
        }),
        "[0-9]{1,6}".prop_map(FieldValue::Reference),
        prop::collection::btree_set("[a-z0-9]{1,4}", 0..5).prop_map(FieldValue::References),
        "[a-z]{0,8}\\.png".prop_map(FieldValue::Media),
    ]
}

fn instance() -> impl Strategy<Value = ModelInstance> {
    (
        "[a-z]{1,10}",
        "[0-9]{1,6}",
        prop::collection::btree_map("[a-z_]{1,12}", field_value(), 0..8),
    )
        .prop_map(|(object_type, pk, fields)| ModelInstance {
            object_type,
            pk,
            fields,
        })
}

fn versions(payloads: Vec<u8>) -> Vec<Version> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(idx, payload)| Version {
            id: idx as i64 + 1,
            revision_id: 1,
            object_type: "article".into(),
            object_id: "1".into(),
            object_id_int: Some(1),
            format: "json".into(),
            serialized_data: vec![payload],
            object_repr: "article".into(),
            status: ModerationStatus::Pending,
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_codecs_round_trip(instance in instance()) {
        let serializers = SerializerRegistry::new();
        for format in ["json", "msgpack"] {
            let bytes = serializers.serialize(format, &instance).unwrap();
            let decoded = serializers.deserialize(format, &bytes).unwrap();
            prop_assert_eq!(&decoded, &instance);
        }
    }

    #[test]
    fn prop_get_unique_is_idempotent(payloads in prop::collection::vec(0u8..3, 0..40)) {
        let input = versions(payloads);
        let first: Vec<i64> = get_unique(input.clone()).map(|v| v.id).collect();
        let second: Vec<i64> = get_unique(input.clone()).map(|v| v.id).collect();
        prop_assert_eq!(&first, &second);

        // Applying it to its own output changes nothing either.
        let once: Vec<Version> = get_unique(input).collect();
        let twice: Vec<Version> = get_unique(once.clone()).collect();
        prop_assert_eq!(&once, &twice);

        for pair in once.windows(2) {
            prop_assert_ne!(&pair[0].serialized_data, &pair[1].serialized_data);
        }
    }
}
