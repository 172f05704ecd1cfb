// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Usage events emitted by the platform and their transforms into
//! [`UsageDatum`] payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::TransformError;
use crate::queue_item::ItemParts;

pub const API_USAGE_NAMESPACE: &str = "usage/api";
pub const RESOURCE_USAGE_NAMESPACE: &str = "usage/resource";

const REQUEST_COUNT_METRIC: &str = "RequestCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Count,
    Bytes,
    Seconds,
    Percent,
}

/// One measurement, as delivered to the intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDatum {
    pub metric_name: String,
    pub value: f64,
    pub unit: Unit,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimensions: BTreeMap<String, String>,
}

/// A completed API request, counted per service and operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiUsageEvent {
    pub account_id: Option<String>,
    pub service: String,
    pub operation: String,
    pub request_count: u64,
}

/// A sampled resource measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsageEvent {
    pub account_id: Option<String>,
    pub resource_id: String,
    pub metric: String,
    pub value: f64,
    pub unit: Unit,
}

fn require_account(account_id: Option<&String>) -> Result<&str, TransformError> {
    match account_id.map(|a| a.trim()) {
        Some(account) if !account.is_empty() => Ok(account),
        _ => Err(TransformError::MissingField("account_id")),
    }
}

pub fn api_usage(event: &ApiUsageEvent) -> Result<ItemParts<UsageDatum>, TransformError> {
    let account = require_account(event.account_id.as_ref())?;
    let dimensions = BTreeMap::from([
        ("service".to_string(), event.service.clone()),
        ("operation".to_string(), event.operation.clone()),
    ]);
    Ok(ItemParts::new(
        account,
        API_USAGE_NAMESPACE,
        UsageDatum {
            metric_name: REQUEST_COUNT_METRIC.to_string(),
            value: event.request_count as f64,
            unit: Unit::Count,
            dimensions,
        },
    ))
}

pub fn resource_usage(
    event: &ResourceUsageEvent,
) -> Result<ItemParts<UsageDatum>, TransformError> {
    let account = require_account(event.account_id.as_ref())?;
    if event.metric.trim().is_empty() {
        return Err(TransformError::MissingField("metric"));
    }
    if !event.value.is_finite() {
        return Err(TransformError::Invalid(format!(
            "{} value for {} is not finite",
            event.metric, event.resource_id
        )));
    }
    Ok(ItemParts::new(
        account,
        RESOURCE_USAGE_NAMESPACE,
        UsageDatum {
            metric_name: event.metric.clone(),
            value: event.value,
            unit: event.unit,
            dimensions: BTreeMap::from([("resource_id".to_string(), event.resource_id.clone())]),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_event(account: Option<&str>) -> ApiUsageEvent {
        ApiUsageEvent {
            account_id: account.map(str::to_string),
            service: "compute".to_string(),
            operation: "RunInstances".to_string(),
            request_count: 3,
        }
    }

    fn resource_event(value: f64) -> ResourceUsageEvent {
        ResourceUsageEvent {
            account_id: Some("123456789012".to_string()),
            resource_id: "vol-1".to_string(),
            metric: "VolumeReadBytes".to_string(),
            value,
            unit: Unit::Bytes,
        }
    }

    #[test]
    fn test_api_usage_transform() {
        let parts = api_usage(&api_event(Some("123456789012"))).unwrap();
        assert_eq!(parts.account_id, "123456789012");
        assert_eq!(parts.namespace, API_USAGE_NAMESPACE);
        assert_eq!(parts.payload.metric_name, "RequestCount");
        assert_eq!(parts.payload.value, 3.0);
        assert_eq!(parts.payload.unit, Unit::Count);
        assert_eq!(parts.payload.dimensions["service"], "compute");
        assert_eq!(parts.payload.dimensions["operation"], "RunInstances");
    }

    #[test]
    fn test_api_usage_requires_account() {
        for account in [None, Some(""), Some("   ")] {
            assert_eq!(
                api_usage(&api_event(account)),
                Err(TransformError::MissingField("account_id"))
            );
        }
    }

    #[test]
    fn test_resource_usage_transform() {
        let parts = resource_usage(&resource_event(4096.0)).unwrap();
        assert_eq!(parts.namespace, RESOURCE_USAGE_NAMESPACE);
        assert_eq!(parts.payload.metric_name, "VolumeReadBytes");
        assert_eq!(parts.payload.unit, Unit::Bytes);
        assert_eq!(parts.payload.dimensions["resource_id"], "vol-1");
    }

    #[test]
    fn test_resource_usage_rejects_non_finite_values() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                resource_usage(&resource_event(value)),
                Err(TransformError::Invalid(_))
            ));
        }
    }

    #[test]
    fn test_datum_serialization() {
        let parts = resource_usage(&resource_event(1.5)).unwrap();
        let json = serde_json::to_value(&parts.payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "metric_name": "VolumeReadBytes",
                "value": 1.5,
                "unit": "Bytes",
                "dimensions": { "resource_id": "vol-1" }
            })
        );

        let bare = UsageDatum {
            metric_name: "m".to_string(),
            value: 1.0,
            unit: Unit::Count,
            dimensions: BTreeMap::new(),
        };
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("dimensions"));
        let back: UsageDatum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bare);
    }
}
