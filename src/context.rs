use crate::models::context_tag_keys as keys;
use std::collections::BTreeMap;

pub(crate) const SDK_VERSION: &str = concat!("rust:", env!("CARGO_PKG_VERSION"));

/// Name of the machine the process runs on. Used as the default role instance and as the live
/// metrics machine name.
pub(crate) fn machine_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "Unknown".into())
}

/// Tags stamped on every envelope of a client. User supplied tags win over the defaults.
pub(crate) fn default_tags(
    role_name: Option<&str>,
    role_instance: &str,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(keys::INTERNAL_SDK_VERSION.to_string(), SDK_VERSION.into());
    tags.insert(
        keys::DEVICE_OS_VERSION.to_string(),
        std::env::consts::OS.into(),
    );
    tags.insert(
        keys::CLOUD_ROLE_INSTANCE.to_string(),
        role_instance.to_string(),
    );
    if let Some(role_name) = role_name {
        tags.insert(keys::CLOUD_ROLE.to_string(), role_name.to_string());
    }
    tags.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let tags = default_tags(Some("checkout"), "host-1", &BTreeMap::new());
        assert_eq!(Some("checkout"), tags.get(keys::CLOUD_ROLE).map(String::as_str));
        assert_eq!(
            Some("host-1"),
            tags.get(keys::CLOUD_ROLE_INSTANCE).map(String::as_str)
        );
        assert!(tags[keys::INTERNAL_SDK_VERSION].starts_with("rust:"));
    }

    #[test]
    fn overrides_win() {
        let mut overrides = BTreeMap::new();
        overrides.insert(keys::CLOUD_ROLE_INSTANCE.to_string(), "custom".to_string());
        let tags = default_tags(None, "host-1", &overrides);
        assert_eq!("custom", tags[keys::CLOUD_ROLE_INSTANCE]);
        assert!(!tags.contains_key(keys::CLOUD_ROLE));
    }
}
