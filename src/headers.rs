// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Headers
//!
//! Translates between flat name/value headers and AMQP basic properties.
//! A handful of well-known names set the matching basic property; every
//! other name travels as a custom header.

use lapin::{
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result header carrying the `app-id` property
pub const HEADER_APPID: &str = "HEADER_APPID";
/// Result header carrying the `cluster-id` property
pub const HEADER_CLUSTERID: &str = "HEADER_CLUSTERID";
/// Result header carrying the `content-encoding` property
pub const HEADER_CONTENTENCODING: &str = "HEADER_CONTENTENCODING";
/// Result header carrying the `content-type` property
pub const HEADER_CONTENTTYPE: &str = "HEADER_CONTENTTYPE";
/// Result header carrying the `correlation-id` property
pub const HEADER_CORRELATIONID: &str = "HEADER_CORRELATIONID";
/// Result header carrying the `expiration` property
pub const HEADER_EXPIRATION: &str = "HEADER_EXPIRATION";
/// Result header carrying the `message-id` property
pub const HEADER_MESSAGEID: &str = "HEADER_MESSAGEID";

/// A single name/value header supplied with a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> Header {
        Header {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    AppId,
    ClusterId,
    ContentEncoding,
    ContentType,
    CorrelationId,
    Expiration,
    MessageId,
}

/// Maps `AppId`, `HEADER_APPID` and `header.appid` alike to the property.
fn property_for(name: &str) -> Option<Property> {
    let upper = name.to_ascii_uppercase();
    let bare = upper
        .strip_prefix("HEADER_")
        .or_else(|| upper.strip_prefix("HEADER."))
        .unwrap_or(&upper);

    match bare {
        "APPID" => Some(Property::AppId),
        "CLUSTERID" => Some(Property::ClusterId),
        "CONTENTENCODING" => Some(Property::ContentEncoding),
        "CONTENTTYPE" => Some(Property::ContentType),
        "CORRELATIONID" => Some(Property::CorrelationId),
        "EXPIRATION" => Some(Property::Expiration),
        "MESSAGEID" => Some(Property::MessageId),
        _ => None,
    }
}

/// Applies `headers` to `properties`.
///
/// Well-known names set basic properties; the rest are appended to `table`
/// as long strings, overriding entries already present under the same name.
/// Returns the updated properties and the custom headers that were added.
pub(crate) fn apply_headers(
    mut properties: BasicProperties,
    headers: &[Header],
    table: &mut BTreeMap<ShortString, AMQPValue>,
) -> (BasicProperties, BTreeMap<String, String>) {
    let mut custom = BTreeMap::new();

    for header in headers {
        let value = ShortString::from(header.value.clone());
        properties = match property_for(&header.name) {
            Some(Property::AppId) => properties.with_app_id(value),
            Some(Property::ClusterId) => properties.with_cluster_id(value),
            Some(Property::ContentEncoding) => properties.with_content_encoding(value),
            Some(Property::ContentType) => properties.with_content_type(value),
            Some(Property::CorrelationId) => properties.with_correlation_id(value),
            Some(Property::Expiration) => properties.with_expiration(value),
            Some(Property::MessageId) => properties.with_message_id(value),
            None => {
                table.insert(
                    ShortString::from(header.name.clone()),
                    AMQPValue::LongString(LongString::from(header.value.clone())),
                );
                custom.insert(header.name.clone(), header.value.clone());
                properties
            }
        };
    }

    if !table.is_empty() {
        properties = properties.with_headers(FieldTable::from(table.clone()));
    }

    (properties, custom)
}

/// Flattens basic properties and custom headers of a received message.
///
/// Properties appear under their `HEADER_*` names when set; custom headers
/// keep their own names, rendered as text.
pub fn flatten_properties(properties: &BasicProperties) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();

    let known = [
        (HEADER_APPID, properties.app_id()),
        (HEADER_CLUSTERID, properties.cluster_id()),
        (HEADER_CONTENTENCODING, properties.content_encoding()),
        (HEADER_CONTENTTYPE, properties.content_type()),
        (HEADER_CORRELATIONID, properties.correlation_id()),
        (HEADER_EXPIRATION, properties.expiration()),
        (HEADER_MESSAGEID, properties.message_id()),
    ];
    for (name, value) in known {
        if let Some(value) = value {
            flat.insert(name.to_owned(), value.as_str().to_owned());
        }
    }

    if let Some(headers) = properties.headers() {
        for (name, value) in headers.inner() {
            flat.insert(name.as_str().to_owned(), render(value));
        }
    }

    flat
}

fn render(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
        AMQPValue::ShortString(v) => v.as_str().to_owned(),
        AMQPValue::Boolean(v) => v.to_string(),
        AMQPValue::ShortInt(v) => v.to_string(),
        AMQPValue::LongInt(v) => v.to_string(),
        AMQPValue::LongLongInt(v) => v.to_string(),
        AMQPValue::LongUInt(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_map_to_properties_in_any_spelling() {
        let headers = vec![
            Header::new("AppId", "billing"),
            Header::new("HEADER_CONTENTTYPE", "application/json"),
            Header::new("header.correlationid", "c-1"),
            Header::new("MessageId", "m-1"),
            Header::new("Expiration", "60000"),
        ];
        let mut table = BTreeMap::new();

        let (props, custom) = apply_headers(BasicProperties::default(), &headers, &mut table);

        assert_eq!(props.app_id().as_ref().map(|v| v.as_str()), Some("billing"));
        assert_eq!(
            props.content_type().as_ref().map(|v| v.as_str()),
            Some("application/json")
        );
        assert_eq!(props.correlation_id().as_ref().map(|v| v.as_str()), Some("c-1"));
        assert_eq!(props.message_id().as_ref().map(|v| v.as_str()), Some("m-1"));
        assert_eq!(props.expiration().as_ref().map(|v| v.as_str()), Some("60000"));
        assert!(custom.is_empty());
        assert!(props.headers().is_none());
    }

    #[test]
    fn unknown_names_become_custom_headers() {
        let headers = vec![Header::new("tenant", "acme"), Header::new("X-Trace", "on")];
        let mut table = BTreeMap::new();

        let (props, custom) = apply_headers(BasicProperties::default(), &headers, &mut table);

        assert_eq!(custom.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(custom.len(), 2);
        let table = props.headers().as_ref().unwrap();
        assert_eq!(
            table.inner().get(&ShortString::from("tenant")),
            Some(&AMQPValue::LongString(LongString::from("acme")))
        );
    }

    #[test]
    fn flatten_reports_set_properties_and_custom_headers() {
        let mut table = BTreeMap::new();
        table.insert(
            ShortString::from("tenant"),
            AMQPValue::LongString(LongString::from("acme")),
        );
        table.insert(ShortString::from("attempt"), AMQPValue::LongInt(3));

        let props = BasicProperties::default()
            .with_app_id(ShortString::from("billing"))
            .with_message_id(ShortString::from("m-1"))
            .with_headers(FieldTable::from(table));

        let flat = flatten_properties(&props);

        assert_eq!(flat.get(HEADER_APPID).map(String::as_str), Some("billing"));
        assert_eq!(flat.get(HEADER_MESSAGEID).map(String::as_str), Some("m-1"));
        assert_eq!(flat.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(flat.get("attempt").map(String::as_str), Some("3"));
        assert!(!flat.contains_key(HEADER_CLUSTERID));
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn flatten_of_empty_properties_is_empty() {
        assert!(flatten_properties(&BasicProperties::default()).is_empty());
    }
}
