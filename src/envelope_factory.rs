use crate::{
    convert::{duration_to_string, new_id, time_to_string, url_target},
    models::{
        AvailabilityData, Data, DataPoint, DataPointType, Envelope, EventData, ExceptionData,
        MessageData, MetricData, PageViewData, Properties, RemoteDependencyData, RequestData,
    },
    telemetry::{DependencyTelemetry, Telemetry},
};
use std::{collections::BTreeMap, time::SystemTime};

/// Client wide values stamped on every envelope.
#[derive(Debug)]
pub(crate) struct EnvelopeContext<'a> {
    pub(crate) instrumentation_key: &'a str,
    pub(crate) sample_rate: f64,
    pub(crate) tags: &'a BTreeMap<String, String>,
    pub(crate) common_properties: &'a Properties,
    pub(crate) correlation_id: Option<&'a str>,
}

/// Builds the wire envelope for a telemetry item. Returns `None` for items that cannot be
/// represented, e.g. metrics with a non-finite value.
pub(crate) fn create_envelope(item: &Telemetry, cx: &EnvelopeContext<'_>) -> Option<Envelope> {
    if let Err(reason) = item.validate() {
        tracing::debug!(kind = ?item.kind(), reason, "Dropping invalid telemetry item");
        return None;
    }

    let common = item.common();
    let properties = merge_properties(cx.common_properties, &common.properties);
    let measurements = if common.measurements.is_empty() {
        None
    } else {
        Some(common.measurements.clone())
    };

    let data = match item {
        Telemetry::Event(event) => Data::Event(EventData {
            ver: 2,
            name: event.name.clone(),
            properties,
            measurements,
        }),
        Telemetry::Trace(trace) => Data::Message(MessageData {
            ver: 2,
            message: trace.message.clone(),
            severity_level: trace.severity,
            properties,
        }),
        Telemetry::Metric(metric) => Data::Metric(MetricData {
            ver: 2,
            metrics: vec![DataPoint {
                ns: metric.namespace.clone(),
                name: metric.name.clone(),
                kind: if metric.count.is_some() {
                    DataPointType::Aggregation
                } else {
                    DataPointType::Measurement
                },
                value: metric.value,
                count: metric.count,
                min: metric.min,
                max: metric.max,
                std_dev: metric.std_dev,
            }],
            properties,
        }),
        Telemetry::Exception(exception) => Data::Exception(ExceptionData {
            ver: 2,
            exceptions: exception.exceptions.clone(),
            severity_level: exception.severity,
            properties,
            measurements,
        }),
        Telemetry::Dependency(dependency) => Data::RemoteDependency(RemoteDependencyData {
            ver: 2,
            name: dependency.name.clone(),
            id: Some(dependency.id.clone().unwrap_or_else(new_id)),
            result_code: dependency.result_code.clone(),
            duration: duration_to_string(dependency.duration),
            success: Some(dependency.success),
            data: dependency.data.clone(),
            target: dependency_target(dependency, cx.correlation_id),
            type_: dependency.dependency_type_name.clone(),
            properties,
            measurements,
        }),
        Telemetry::Request(request) => Data::Request(RequestData {
            ver: 2,
            id: request.id.clone().unwrap_or_else(new_id),
            source: request.source.clone(),
            name: Some(request.name.clone()),
            duration: duration_to_string(request.duration),
            response_code: request.result_code.clone(),
            success: request.success,
            url: request.url.clone(),
            properties,
            measurements,
        }),
        Telemetry::PageView(page_view) => Data::PageView(PageViewData {
            ver: 2,
            id: page_view.id.clone(),
            name: page_view.name.clone(),
            url: page_view.url.clone(),
            duration: page_view.duration.map(duration_to_string),
            properties,
            measurements,
        }),
        Telemetry::Availability(availability) => Data::Availability(AvailabilityData {
            ver: 2,
            id: availability.id.clone().unwrap_or_else(new_id),
            name: availability.name.clone(),
            duration: duration_to_string(availability.duration),
            success: availability.success,
            run_location: availability.run_location.clone(),
            message: availability.message.clone(),
            properties,
            measurements,
        }),
    };

    let mut tags = cx.tags.clone();
    tags.extend(common.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

    Some(Envelope {
        name: item.kind().envelope_name().into(),
        time: time_to_string(common.time.unwrap_or_else(SystemTime::now)),
        sample_rate: Some(cx.sample_rate),
        i_key: Some(cx.instrumentation_key.into()),
        tags,
        data,
    })
}

fn merge_properties(common: &Properties, item: &Properties) -> Option<Properties> {
    if common.is_empty() && item.is_empty() {
        return None;
    }
    let mut properties = common.clone();
    properties.extend(item.iter().map(|(k, v)| (k.clone(), v.clone())));
    Some(properties)
}

/// Explicit target, or the host of a URL command. Calls into another monitored component get its
/// correlation id appended unless it is our own.
fn dependency_target(
    dependency: &DependencyTelemetry,
    own_correlation_id: Option<&str>,
) -> Option<String> {
    let target = dependency
        .target
        .clone()
        .or_else(|| dependency.data.as_deref().and_then(url_target))?;
    match dependency.target_correlation_id.as_deref() {
        Some(cid) if !cid.is_empty() && own_correlation_id != Some(cid) => {
            Some(format!("{} | {}", target, cid))
        }
        _ => Some(target),
    }
}
