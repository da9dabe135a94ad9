//! Application Insights wire format.
//!
//! Telemetry processors receive an [`Envelope`] and may change any of its fields before it is
//! buffered and sent.

pub mod context_tag_keys;
mod availability_data;
mod data;
mod data_point;
mod envelope;
mod event_data;
mod exception_data;
mod exception_details;
mod message_data;
mod metric_data;
mod page_view_data;
#[cfg(feature = "live-metrics")]
mod quick_pulse;
mod remote_dependency_data;
mod request_data;
mod sanitize;
mod severity_level;

pub use availability_data::*;
pub use data::*;
pub use data_point::*;
pub use envelope::*;
pub use event_data::*;
pub use exception_data::*;
pub use exception_details::*;
pub use message_data::*;
pub use metric_data::*;
pub use page_view_data::*;
#[cfg(feature = "live-metrics")]
pub(crate) use quick_pulse::*;
pub use remote_dependency_data::*;
pub use request_data::*;
pub(crate) use sanitize::*;
pub use severity_level::*;

/// Custom properties attached to a telemetry item.
pub type Properties = std::collections::BTreeMap<String, String>;

/// Custom measurements attached to a telemetry item.
pub type Measurements = std::collections::BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn message_envelope() -> Envelope {
        let mut tags = BTreeMap::new();
        tags.insert(context_tag_keys::OPERATION_ID.to_string(), "1".into());
        Envelope {
            name: "Test".into(),
            time: "2020-06-21T10:40:00.000Z".into(),
            sample_rate: Some(100.0),
            i_key: Some("ikey".into()),
            tags,
            data: Data::Message(MessageData {
                ver: 2,
                message: "hello world".into(),
                severity_level: Some(SeverityLevel::Information),
                properties: None,
            }),
        }
    }

    #[test]
    fn serialization_format() {
        let serialized = serde_json::to_string(&message_envelope()).unwrap();
        insta::assert_snapshot!(serialized, @r#"{"name":"Test","time":"2020-06-21T10:40:00.000Z","sampleRate":100.0,"iKey":"ikey","tags":{"ai.operation.id":"1"},"data":{"baseType":"MessageData","baseData":{"ver":2,"message":"hello world","severityLevel":1}}}"#);
    }

    #[test]
    fn persisted_envelopes_can_be_read_back() {
        let serialized = serde_json::to_vec(&vec![message_envelope()]).unwrap();
        let read: Vec<Envelope> = serde_json::from_slice(&serialized).unwrap();
        assert_eq!(vec![message_envelope()], read);
    }

    #[test]
    fn sanitization() {
        let mut envelope = message_envelope();
        envelope.name = "x".repeat(2000);
        envelope
            .tags
            .insert(context_tag_keys::OPERATION_ID.into(), "1".repeat(200));
        if let Data::Message(data) = &mut envelope.data {
            data.message = "m".repeat(33000);
        }
        envelope.sanitize();
        assert_eq!(1024, envelope.name.len());
        assert_eq!(
            128,
            envelope.tags.get(context_tag_keys::OPERATION_ID).unwrap().len()
        );
        assert_eq!(
            32768,
            match envelope.data {
                Data::Message(data) => data.message.len(),
                _ => panic!("we should not get here"),
            }
        );
    }
}
