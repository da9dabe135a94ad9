use serde_repr::{Deserialize_repr, Serialize_repr};

/// Defines the level of severity for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SeverityLevel {
    /// Verbose
    Verbose = 0,
    /// Information
    Information = 1,
    /// Warning
    Warning = 2,
    /// Error
    Error = 3,
    /// Critical
    Critical = 4,
}

impl SeverityLevel {
    /// Name used by live metrics documents.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Verbose => "Verbose",
            SeverityLevel::Information => "Information",
            SeverityLevel::Warning => "Warning",
            SeverityLevel::Error => "Error",
            SeverityLevel::Critical => "Critical",
        }
    }
}
