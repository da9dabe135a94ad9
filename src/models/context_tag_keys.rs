//! Well-known keys of the envelope `tags` map.
//!
//! Processors can use these to read or override context on an [`Envelope`](super::Envelope):
//!
//! ```
//! use appinsights_agent::{
//!     models::{context_tag_keys, Envelope},
//!     ContextObjects,
//! };
//!
//! fn set_role(envelope: &mut Envelope, _: &ContextObjects) -> bool {
//!     envelope
//!         .tags
//!         .insert(context_tag_keys::CLOUD_ROLE.into(), "checkout".into());
//!     true
//! }
//! ```

/// Application version. Information in the application context fields is always about the
/// application that is sending the telemetry.
pub const APPLICATION_VERSION: &str = "ai.application.ver";

/// Unique client device id. Computer name in most cases.
pub const DEVICE_ID: &str = "ai.device.id";

/// Device locale using <language>-<REGION> pattern, following RFC 5646. Example 'en-US'.
pub const DEVICE_LOCALE: &str = "ai.device.locale";

/// Model of the device the end user of the application is using.
pub const DEVICE_MODEL: &str = "ai.device.model";

/// Client device OEM name taken from the browser.
pub const DEVICE_OEM_NAME: &str = "ai.device.oemName";

/// Operating system name and version of the device the end user of the application is using.
/// Example 'Windows 10 Pro 10.0.10586.0'
pub const DEVICE_OS_VERSION: &str = "ai.device.osVersion";

/// The type of the device the end user of the application is using. Examples: 'PC', 'Phone',
/// 'Browser', 'Other'.
pub const DEVICE_TYPE: &str = "ai.device.type";

/// The IP address of the client device. IPv4 and IPv6 are supported.
pub const LOCATION_IP: &str = "ai.location.ip";

/// A unique identifier for the operation instance. The operation.id is created by either a request
/// or a page view. All other telemetry sets this to the value for the containing request or page
/// view.
pub const OPERATION_ID: &str = "ai.operation.id";

/// The name (group) of the operation, e.g. 'GET Home/Index'.
pub const OPERATION_NAME: &str = "ai.operation.name";

/// The unique identifier of the telemetry item's immediate parent.
pub const OPERATION_PARENT_ID: &str = "ai.operation.parentId";

/// Name of synthetic source. Some telemetry from the application may represent a synthetic
/// traffic, like web crawlers or availability tests.
pub const OPERATION_SYNTHETIC_SOURCE: &str = "ai.operation.syntheticSource";

/// The correlation vector is a light weight vector clock which can be used to identify and order
/// related events across clients and services.
pub const OPERATION_CORRELATION_VECTOR: &str = "ai.operation.correlationVector";

/// Session ID - the instance of the user's interaction with the app.
pub const SESSION_ID: &str = "ai.session.id";

/// Boolean value indicating whether the session identified by ai.session.id is first for the user
/// or not.
pub const SESSION_IS_FIRST: &str = "ai.session.isFirst";

/// In multi-tenant applications this is the account ID or name which the user is acting with.
pub const USER_ACCOUNT_ID: &str = "ai.user.accountId";

/// Anonymous user id. Represents the end user of the application.
pub const USER_ID: &str = "ai.user.id";

/// Authenticated user id. Since it's PII information it is not collected by default.
pub const USER_AUTH_USER_ID: &str = "ai.user.authUserId";

/// Name of the role the application is a part of. Maps directly to the role name in azure.
pub const CLOUD_ROLE: &str = "ai.cloud.role";

/// Name of the instance where the application is running. Computer name for on-premisis, instance
/// name for Azure.
pub const CLOUD_ROLE_INSTANCE: &str = "ai.cloud.roleInstance";

/// SDK version. See
/// https://github.com/Microsoft/ApplicationInsights-Home/blob/master/SDK-AUTHORING.md#sdk-version-specification
/// for information.
pub const INTERNAL_SDK_VERSION: &str = "ai.internal.sdkVersion";

/// Agent version. Used to indicate the version of StatusMonitor installed on the computer if it is
/// used for data collection.
pub const INTERNAL_AGENT_VERSION: &str = "ai.internal.agentVersion";

/// This is the node name used for billing purposes. Use it to override the standard detection of
/// nodes.
pub const INTERNAL_NODE_NAME: &str = "ai.internal.nodeName";

/// Maximum value length accepted by the ingestion service for a tag. Unknown tags get the generic
/// property value limit.
pub(crate) fn max_len(key: &str) -> usize {
    match key {
        APPLICATION_VERSION => 1024,
        DEVICE_ID => 1024,
        DEVICE_LOCALE => 64,
        DEVICE_MODEL => 256,
        DEVICE_OEM_NAME => 256,
        DEVICE_OS_VERSION => 256,
        DEVICE_TYPE => 64,
        LOCATION_IP => 46,
        OPERATION_ID => 128,
        OPERATION_NAME => 1024,
        OPERATION_PARENT_ID => 128,
        OPERATION_SYNTHETIC_SOURCE => 1024,
        OPERATION_CORRELATION_VECTOR => 64,
        SESSION_ID => 64,
        SESSION_IS_FIRST => 5,
        USER_ACCOUNT_ID => 1024,
        USER_ID => 128,
        USER_AUTH_USER_ID => 1024,
        CLOUD_ROLE => 256,
        CLOUD_ROLE_INSTANCE => 256,
        INTERNAL_SDK_VERSION => 64,
        INTERNAL_AGENT_VERSION => 64,
        INTERNAL_NODE_NAME => 256,
        _ => 8192,
    }
}
