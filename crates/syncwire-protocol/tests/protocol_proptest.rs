use proptest::prelude::*;
use serde_json::json;

use syncwire_protocol::message::RecordMessage;
use syncwire_protocol::pk_extractor::resolve_field_path;
use syncwire_protocol::{ConnectorMessage, ProtocolVersion};

proptest! {
    #[test]
    fn version_display_parse_roundtrip(
        major in 0u32..100,
        minor in 0u32..100,
        patch in 0u32..100,
    ) {
        let version = ProtocolVersion::new(major, minor, patch);
        let parsed: ProtocolVersion = version
            .to_string()
            .parse()
            .expect("rendered version must parse");
        prop_assert_eq!(parsed, version);
    }

    #[test]
    fn record_line_roundtrips_through_serde(
        namespace in proptest::option::of("[a-z_]{1,12}"),
        stream in "[a-z_]{1,12}",
        id in any::<i64>(),
    ) {
        let message = ConnectorMessage::Record {
            record: RecordMessage {
                namespace,
                stream,
                data: json!({ "id": id }),
                emitted_at: 1,
            },
        };
        let line = serde_json::to_string(&message).expect("record must serialize");
        let parsed: ConnectorMessage =
            serde_json::from_str(&line).expect("serialized record must parse");
        prop_assert_eq!(parsed, message);
    }

    #[test]
    fn nested_field_path_resolves_to_its_leaf(
        path in proptest::collection::vec("[a-z]{1,8}", 1..4),
        leaf in any::<i64>(),
    ) {
        let mut value = json!(leaf);
        for key in path.iter().rev() {
            value = json!({ key.clone(): value });
        }
        let expected = json!(leaf);
        prop_assert_eq!(resolve_field_path(&value, &path), Some(&expected));
    }
}
