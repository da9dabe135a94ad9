use crate::models::{context_tag_keys, Data, Envelope, ExceptionDetails, Properties};
use tracing::debug;

const MAX_PROPERTY_KEY_LEN: usize = 150;
const MAX_PROPERTY_VALUE_LEN: usize = 8192;
const MAX_NAME_LEN: usize = 1024;
const MAX_EVENT_NAME_LEN: usize = 512;
const MAX_MESSAGE_LEN: usize = 32768;
const MAX_URL_LEN: usize = 2048;

/// Enforces the field length limits of the ingestion service.
pub(crate) trait Sanitize {
    fn sanitize(&mut self);
}

/// Truncates `s` to at most `max` characters without splitting a character.
pub(crate) fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
}

fn truncate_opt(s: &mut Option<String>, max: usize) {
    if let Some(s) = s.as_mut() {
        truncate_chars(s, max);
    }
}

impl Sanitize for Properties {
    fn sanitize(&mut self) {
        let long_keys: Vec<_> = self
            .keys()
            .filter(|k| k.chars().count() > MAX_PROPERTY_KEY_LEN)
            .map(|k| k.to_owned())
            .collect();
        for long_key in long_keys {
            if let Some((mut key, value)) = self.remove_entry(&long_key) {
                truncate_chars(&mut key, MAX_PROPERTY_KEY_LEN);
                if self.contains_key(&key) {
                    debug!(
                        key = %key,
                        "Truncated property name overrides property with the same name"
                    );
                }
                self.insert(key, value);
            }
        }
        for value in self.values_mut() {
            truncate_chars(value, MAX_PROPERTY_VALUE_LEN);
        }
    }
}

impl Sanitize for Option<Properties> {
    fn sanitize(&mut self) {
        if let Some(properties) = self.as_mut() {
            properties.sanitize();
        }
    }
}

impl Sanitize for ExceptionDetails {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.type_name, MAX_NAME_LEN);
        truncate_chars(&mut self.message, MAX_MESSAGE_LEN);
        truncate_opt(&mut self.stack, MAX_MESSAGE_LEN);
    }
}

impl Sanitize for Data {
    fn sanitize(&mut self) {
        match self {
            Data::Event(data) => {
                truncate_chars(&mut data.name, MAX_EVENT_NAME_LEN);
                data.properties.sanitize();
            }
            Data::Exception(data) => {
                for details in data.exceptions.iter_mut() {
                    details.sanitize();
                }
                data.properties.sanitize();
            }
            Data::Message(data) => {
                truncate_chars(&mut data.message, MAX_MESSAGE_LEN);
                data.properties.sanitize();
            }
            Data::Metric(data) => {
                for point in data.metrics.iter_mut() {
                    truncate_chars(&mut point.name, MAX_NAME_LEN);
                    truncate_opt(&mut point.ns, 256);
                }
                data.properties.sanitize();
            }
            Data::RemoteDependency(data) => {
                truncate_chars(&mut data.name, MAX_NAME_LEN);
                truncate_opt(&mut data.id, 128);
                truncate_opt(&mut data.result_code, 1024);
                truncate_opt(&mut data.data, 8192);
                truncate_opt(&mut data.target, MAX_NAME_LEN);
                truncate_opt(&mut data.type_, MAX_NAME_LEN);
                data.properties.sanitize();
            }
            Data::Request(data) => {
                truncate_chars(&mut data.id, 128);
                truncate_opt(&mut data.source, MAX_NAME_LEN);
                truncate_opt(&mut data.name, MAX_NAME_LEN);
                truncate_chars(&mut data.response_code, 1024);
                truncate_opt(&mut data.url, MAX_URL_LEN);
                data.properties.sanitize();
            }
            Data::PageView(data) => {
                truncate_chars(&mut data.name, MAX_NAME_LEN);
                truncate_opt(&mut data.url, MAX_URL_LEN);
                data.properties.sanitize();
            }
            Data::Availability(data) => {
                truncate_chars(&mut data.id, 64);
                truncate_chars(&mut data.name, MAX_NAME_LEN);
                truncate_opt(&mut data.run_location, MAX_NAME_LEN);
                truncate_opt(&mut data.message, 8192);
                data.properties.sanitize();
            }
        }
    }
}

impl Sanitize for Envelope {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.name, MAX_NAME_LEN);
        for (key, value) in self.tags.iter_mut() {
            truncate_chars(value, context_tag_keys::max_len(key));
        }
        self.data.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn sanitize_properties() {
        let mut properties = Properties::from_iter(vec![
            // Long value
            ("1".repeat(1), "v".repeat(8200)),
            // Long key and long value
            ("2".repeat(160), "v".repeat(8200)),
            // Long key
            ("3".repeat(160), "v".repeat(1)),
            // Long key collides with and replaces other key
            ("4".repeat(150), "x".repeat(1)),
            ("4".repeat(160), "y".repeat(1)),
        ]);
        properties.sanitize();
        assert_eq!(4, properties.len());
        assert_eq!(8192, properties.get("1").unwrap().len());
        assert_eq!(8192, properties.get(&"2".repeat(150)).unwrap().len());
        assert_eq!(1, properties.get(&"3".repeat(150)).unwrap().len());
        assert_eq!("y", properties.get(&"4".repeat(150)).unwrap());
    }

    #[test]
    fn truncate_keeps_char_boundaries() {
        let mut s = "äöü".repeat(10);
        truncate_chars(&mut s, 4);
        assert_eq!("äöüä", s);

        let mut short = "abc".to_string();
        truncate_chars(&mut short, 10);
        assert_eq!("abc", short);
    }
}
