//! Configuration model
//!
//! A configuration is an opaque property set plus the typed view of the
//! properties the lifecycle needs. Unknown keys are kept and written back
//! unchanged.

use crate::error::{DepositError, DepositResult};
use crate::properties;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use depositor_common::ChecksumAlgorithm;
use std::collections::BTreeMap;
use url::Url;

/// File name of the persisted configuration inside its working directory
pub const CONFIGURATION_FILE_NAME: &str = "configuration.xml";

/// Scratch name used while the configuration document is rewritten
pub const CONFIGURATION_TEMP_FILE_NAME: &str = "configuration.xml.tmp";

pub const PROPERTY_CONFIGURATION_ID: &str = "ConfigurationID";
pub const PROPERTY_USER_HANDLE: &str = "UserHandle";
pub const PROPERTY_CONTENT_MODEL_ID: &str = "ContentModelID";
pub const PROPERTY_CONTEXT_ID: &str = "WorkspaceID";
pub const PROPERTY_CONTAINER_ID: &str = "ExperimentID";
pub const PROPERTY_INFRASTRUCTURE_ENDPOINT: &str = "InfrastructureEndpoint";
pub const PROPERTY_MONITORING_START_TIME: &str = "MonitoringStartTime";
pub const PROPERTY_MONITORING_DURATION: &str = "MonitoringDuration";
pub const PROPERTY_CHECKSUM_ALGORITHM: &str = "CheckSumType";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    id: String,
    user_handle: String,
    content_model_id: String,
    context_id: String,
    container_id: String,
    endpoint: Url,
    algorithm: ChecksumAlgorithm,
    monitoring_start: Option<DateTime<Utc>>,
    monitoring_duration_minutes: Option<u64>,
    properties: BTreeMap<String, String>,
}

impl Configuration {
    /// Validate a raw property set
    ///
    /// Every problem is collected so the caller sees all of them at once.
    pub fn from_properties(properties: BTreeMap<String, String>) -> DepositResult<Self> {
        let mut issues = Vec::new();

        let mut required = |key: &str| -> String {
            match properties.get(key).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => {
                    issues.push(format!("{key} is missing"));
                    String::new()
                },
            }
        };

        let id = required(PROPERTY_CONFIGURATION_ID);
        let container_id = required(PROPERTY_CONTAINER_ID);
        let endpoint_raw = required(PROPERTY_INFRASTRUCTURE_ENDPOINT);
        let user_handle = required(PROPERTY_USER_HANDLE);
        let context_id = required(PROPERTY_CONTEXT_ID);
        let content_model_id = required(PROPERTY_CONTENT_MODEL_ID);
        let algorithm_raw = required(PROPERTY_CHECKSUM_ALGORITHM);

        let endpoint = if endpoint_raw.is_empty() {
            None
        } else {
            match Url::parse(&endpoint_raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    issues.push(format!(
                        "{PROPERTY_INFRASTRUCTURE_ENDPOINT} '{endpoint_raw}' is not a valid URL: {e}"
                    ));
                    None
                },
            }
        };

        let algorithm = if algorithm_raw.is_empty() {
            None
        } else {
            match algorithm_raw.parse::<ChecksumAlgorithm>() {
                Ok(algorithm) => Some(algorithm),
                Err(_) => {
                    issues.push(format!(
                        "{PROPERTY_CHECKSUM_ALGORITHM} '{algorithm_raw}' is not a known algorithm"
                    ));
                    None
                },
            }
        };

        let monitoring_start = match optional(&properties, PROPERTY_MONITORING_START_TIME) {
            None => None,
            Some(raw) => match parse_timestamp(raw) {
                Some(start) => Some(start),
                None => {
                    issues.push(format!(
                        "{PROPERTY_MONITORING_START_TIME} '{raw}' is not a valid timestamp"
                    ));
                    None
                },
            },
        };

        let monitoring_duration_minutes = match optional(&properties, PROPERTY_MONITORING_DURATION)
        {
            None => None,
            Some(raw) => match raw.parse::<u64>() {
                Ok(minutes) => Some(minutes),
                Err(_) => {
                    issues.push(format!(
                        "{PROPERTY_MONITORING_DURATION} '{raw}' is not a non-negative integer"
                    ));
                    None
                },
            },
        };

        match (endpoint, algorithm) {
            (Some(endpoint), Some(algorithm)) if issues.is_empty() => Ok(Self {
                id,
                user_handle,
                content_model_id,
                context_id,
                container_id,
                endpoint,
                algorithm,
                monitoring_start,
                monitoring_duration_minutes,
                properties,
            }),
            _ => Err(DepositError::ValidationFailed { issues }),
        }
    }

    /// Parse and validate a properties XML document
    pub fn from_xml(xml: &str) -> DepositResult<Self> {
        let properties = properties::parse(xml).map_err(|e| DepositError::validation(e.to_string()))?;
        Self::from_properties(properties)
    }

    /// Render the full property set, including unknown keys
    pub fn to_xml(&self) -> DepositResult<String> {
        properties::render(&self.properties).map_err(|e| DepositError::Persistence(e.to_string()))
    }

    /// Copy of this configuration with the monitoring start set
    pub fn with_monitoring_start(&self, start: DateTime<Utc>) -> Self {
        let mut updated = self.clone();
        updated.monitoring_start = Some(start);
        updated.properties.insert(
            PROPERTY_MONITORING_START_TIME.to_string(),
            format_timestamp(start),
        );
        updated
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_handle(&self) -> &str {
        &self.user_handle
    }

    pub fn content_model_id(&self) -> &str {
        &self.content_model_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn monitoring_start(&self) -> Option<DateTime<Utc>> {
        self.monitoring_start
    }

    pub fn monitoring_duration_minutes(&self) -> Option<u64> {
        self.monitoring_duration_minutes
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// End of the monitoring window, if it has started
    pub fn monitoring_end(&self, default_minutes: u64) -> Option<DateTime<Utc>> {
        let minutes = self.monitoring_duration_minutes.unwrap_or(default_minutes);
        let minutes = i64::try_from(minutes).unwrap_or(i64::MAX);
        let start = self.monitoring_start?;
        Some(
            Duration::try_minutes(minutes)
                .and_then(|window| start.checked_add_signed(window))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// A configuration that never received a file never expires
    pub fn is_monitoring_over(&self, now: DateTime<Utc>, default_minutes: u64) -> bool {
        self.monitoring_end(default_minutes)
            .is_some_and(|end| now >= end)
    }
}

fn optional<'a>(properties: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    properties
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Render a timestamp as `2011-03-01T10:00:00.000+0000`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the timestamp forms found in configuration documents
///
/// Accepts the native form with a numeric offset, RFC 3339, a zone-less ISO
/// date-time taken as UTC, and a bare date at midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(at) = DateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
