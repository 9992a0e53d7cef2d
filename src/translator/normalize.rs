//! Dialect detection and normalization into a single internal-dialect
//! [`RequestEnvelope`].

use serde_json::Value;

use super::{Dialect, Op, RequestEnvelope, RowFieldInput, TranslatorError};

const OP_SET: &[&str] = &[
    "GET",
    "SET",
    "GET_ATTRIBUTES",
    "SET_ATTRIBUTES",
    "ADD_ROW",
    "DELETE_ROW",
    "REPLACE_ROWS",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "TEST_AND_SET",
];

/// Detect the inbound dialect and normalize into a [`RequestEnvelope`].
///
/// An object carrying a string `op` field whose value is in the internal
/// `OpSet` is internal-dialect. Otherwise, an object carrying a string
/// `command` field is webpa-dialect and is normalized into the internal
/// schema. Anything else is [`TranslatorError::InvalidRequest`].
///
/// # Errors
/// Returns [`TranslatorError::InvalidRequest`] if `raw` is not a JSON
/// object, carries neither a recognized `op` nor a `command`, or is missing
/// a field its dialect/op requires.
pub fn normalize(
    raw: &Value,
    uplink_transaction_id: Option<&str>,
) -> Result<RequestEnvelope, TranslatorError> {
    let object = raw
        .as_object()
        .ok_or_else(|| TranslatorError::InvalidRequest("request is not a JSON object".into()))?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .or_else(|| uplink_transaction_id.map(ToOwned::to_owned));

    if let Some(op_name) = object.get("op").and_then(Value::as_str) {
        if OP_SET.contains(&op_name) {
            let op = normalize_internal(op_name, object)?;
            return Ok(RequestEnvelope {
                id,
                op,
                dialect: Dialect::Internal,
            });
        }
    }

    if let Some(command) = object.get("command").and_then(Value::as_str) {
        let op = normalize_webpa(command, object)?;
        return Ok(RequestEnvelope {
            id,
            op,
            dialect: Dialect::Webpa,
        });
    }

    Err(TranslatorError::InvalidRequest(
        "request carries neither a recognized op nor a command".into(),
    ))
}

fn require_str(
    object: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, TranslatorError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| TranslatorError::InvalidRequest(format!("missing or non-string field {field}")))
}

fn require_array<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<&'a Vec<Value>, TranslatorError> {
    object
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslatorError::InvalidRequest(format!("missing or non-array field {field}")))
}

fn require_u8(object: &serde_json::Map<String, Value>, field: &str) -> Result<u8, TranslatorError> {
    object
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| TranslatorError::InvalidRequest(format!("missing or out-of-range field {field}")))
}

fn row_field_from_value(value: &Value) -> Result<RowFieldInput, TranslatorError> {
    let object = value
        .as_object()
        .ok_or_else(|| TranslatorError::InvalidRequest("row field is not a JSON object".into()))?;
    Ok(RowFieldInput {
        name: require_str(object, "name")?,
        value: require_str(object, "value")?,
        data_type: require_u8(object, "dataType")?,
    })
}

fn normalize_internal(
    op_name: &str,
    object: &serde_json::Map<String, Value>,
) -> Result<Op, TranslatorError> {
    match op_name {
        "GET" => {
            let params = require_array(object, "params")?.clone();
            Ok(Op::Get { params })
        }
        "SET" => Ok(Op::Set {
            param: require_str(object, "param")?,
            value: require_str(object, "value")?,
        }),
        "GET_ATTRIBUTES" => Ok(Op::GetAttributes {
            param: require_str(object, "param")?,
        }),
        "SET_ATTRIBUTES" => {
            let attributes = object
                .get("attributes")
                .and_then(Value::as_object)
                .ok_or_else(|| TranslatorError::InvalidRequest("missing attributes object".into()))?;
            let notify = require_u8(attributes, "notify")?;
            let access = attributes.get("access").and_then(Value::as_str).map(ToOwned::to_owned);
            Ok(Op::SetAttributes {
                param: require_str(object, "param")?,
                notify,
                access,
            })
        }
        "ADD_ROW" => {
            let row_data = require_array(object, "rowData")?
                .iter()
                .map(row_field_from_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Op::AddRow {
                table_name: require_str(object, "tableName")?,
                row_data,
            })
        }
        "DELETE_ROW" => Ok(Op::DeleteRow {
            row_name: require_str(object, "rowName")?,
        }),
        "REPLACE_ROWS" => {
            let table_data = require_array(object, "tableData")?
                .iter()
                .map(|row| {
                    row.as_array()
                        .ok_or_else(|| TranslatorError::InvalidRequest("row is not a JSON array".into()))
                        .and_then(|fields| fields.iter().map(row_field_from_value).collect())
                })
                .collect::<Result<Vec<Vec<_>>, _>>()?;
            Ok(Op::ReplaceRows {
                table_name: require_str(object, "tableName")?,
                table_data,
            })
        }
        "SUBSCRIBE" => Ok(Op::Subscribe {
            event: require_str(object, "event")?,
        }),
        "UNSUBSCRIBE" => Ok(Op::Unsubscribe {
            event: require_str(object, "event")?,
        }),
        "TEST_AND_SET" => Ok(Op::TestAndSet {
            param: require_str(object, "param")?,
            old_value: require_str(object, "oldValue")?,
            new_value: require_str(object, "newValue")?,
            data_type: require_u8(object, "dataType")?,
        }),
        other => Err(TranslatorError::InvalidRequest(format!("unsupported op {other}"))),
    }
}

fn normalize_webpa(
    command: &str,
    object: &serde_json::Map<String, Value>,
) -> Result<Op, TranslatorError> {
    match command {
        "GET" => {
            let params = require_array(object, "names")?.clone();
            Ok(Op::Get { params })
        }
        "GET_ATTRIBUTES" => {
            let names = require_array(object, "names")?;
            let first = names
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| TranslatorError::InvalidRequest("names[0] missing or non-string".into()))?;
            Ok(Op::GetAttributes {
                param: first.to_owned(),
            })
        }
        "SET" => {
            let parameters = require_array(object, "parameters")?;
            let first = parameters
                .first()
                .and_then(Value::as_object)
                .ok_or_else(|| TranslatorError::InvalidRequest("parameters[0] missing".into()))?;
            Ok(Op::Set {
                param: require_str(first, "name")?,
                value: require_str(first, "value")?,
            })
        }
        "SET_ATTRIBUTES" => {
            let parameters = require_array(object, "parameters")?;
            let first = parameters
                .first()
                .and_then(Value::as_object)
                .ok_or_else(|| TranslatorError::InvalidRequest("parameters[0] missing".into()))?;
            let attributes = first
                .get("attributes")
                .and_then(Value::as_object)
                .ok_or_else(|| TranslatorError::InvalidRequest("parameters[0].attributes missing".into()))?;
            Ok(Op::SetAttributes {
                param: require_str(first, "name")?,
                notify: require_u8(attributes, "notify")?,
                access: attributes.get("access").and_then(Value::as_str).map(ToOwned::to_owned),
            })
        }
        "ADD_ROW" => {
            let row_data = require_array(object, "row")?
                .iter()
                .map(row_field_from_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Op::AddRow {
                table_name: require_str(object, "table")?,
                row_data,
            })
        }
        "DELETE_ROW" => Ok(Op::DeleteRow {
            row_name: require_str(object, "row")?,
        }),
        "REPLACE_ROWS" => {
            let table_data = require_array(object, "rows")?
                .iter()
                .map(|row| {
                    row.as_array()
                        .ok_or_else(|| TranslatorError::InvalidRequest("row is not a JSON array".into()))
                        .and_then(|fields| fields.iter().map(row_field_from_value).collect())
                })
                .collect::<Result<Vec<Vec<_>>, _>>()?;
            Ok(Op::ReplaceRows {
                table_name: require_str(object, "table")?,
                table_data,
            })
        }
        "SUBSCRIBE" => Ok(Op::Subscribe {
            event: require_str(object, "event")?,
        }),
        "UNSUBSCRIBE" => Ok(Op::Unsubscribe {
            event: require_str(object, "event")?,
        }),
        other => Err(TranslatorError::InvalidRequest(format!("unsupported command {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn internal_get_normalizes_directly() {
        let raw = json!({"id": "1", "op": "GET", "params": ["Device.Name"]});
        let request = normalize(&raw, None).expect("normalizes");
        assert_eq!(request.dialect, Dialect::Internal);
        assert_eq!(request.id, Some("1".to_owned()));
        assert!(matches!(request.op, Op::Get { .. }));
    }

    #[test]
    fn webpa_get_normalizes_names_into_params() {
        let raw = json!({"command": "GET", "names": ["Device.Name"]});
        let request = normalize(&raw, Some("txn-1")).expect("normalizes");
        assert_eq!(request.dialect, Dialect::Webpa);
        assert_eq!(request.id, Some("txn-1".to_owned()));
        let Op::Get { params } = request.op else {
            panic!("expected Get op");
        };
        assert_eq!(params, vec![json!("Device.Name")]);
    }

    #[test]
    fn webpa_set_uses_only_first_parameter() {
        let raw = json!({
            "command": "SET",
            "parameters": [
                {"name": "Device.Name", "value": "gateway-1", "dataType": 0},
                {"name": "Device.Other", "value": "ignored", "dataType": 0},
            ],
        });
        let request = normalize(&raw, None).expect("normalizes");
        assert_eq!(
            request.op,
            Op::Set {
                param: "Device.Name".into(),
                value: "gateway-1".into(),
            }
        );
    }

    #[test]
    fn missing_command_and_op_is_invalid() {
        let raw = json!({"foo": "bar"});
        assert!(normalize(&raw, None).is_err());
    }

    #[test]
    fn unrecognized_op_falls_through_to_command_check() {
        let raw = json!({"op": "NOT_A_REAL_OP", "command": "GET", "names": ["Device.Name"]});
        let request = normalize(&raw, None).expect("falls through to webpa");
        assert_eq!(request.dialect, Dialect::Webpa);
    }
}
