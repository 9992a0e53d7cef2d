//! WebPA-egress response shaping.
//!
//! Kept as pure functions over the already-computed internal-dialect
//! response plus the original request, independent of dispatch: flat mode
//! for most ops, grouped mode only for a wildcard `GET`.

use serde_json::{json, Value};

use super::{Op, ResponseEnvelope};

/// Shape an internal-dialect response into its webpa-egress envelope,
/// choosing flat or grouped mode depending on whether the original `GET`
/// request carried any wildcard name.
#[must_use]
pub fn shape(op: &Op, response: &ResponseEnvelope) -> Value {
    if let Op::Get { params } = op {
        let wildcard_prefixes: Vec<&str> = params
            .iter()
            .filter_map(|entry| entry.as_str())
            .filter(|name| is_wildcard(name))
            .collect();
        if wildcard_prefixes.is_empty() {
            return shape_flat_get(response);
        }
        return shape_grouped(&wildcard_prefixes, response);
    }
    shape_flat_other(op, response)
}

fn is_wildcard(name: &str) -> bool {
    name.ends_with('.') || name.contains('*')
}

fn success_message(status: u16) -> &'static str {
    if status == 200 || status == 207 {
        "Success"
    } else {
        "Failure"
    }
}

/// Flat mode for `GET`: one `{name, value, dataType}` entry per requested
/// name, in request order, with `value`/`dataType` null on a failed entry.
fn shape_flat_get(response: &ResponseEnvelope) -> Value {
    let parameters: Vec<Value> = response
        .results
        .as_ref()
        .map(|results| {
            results
                .iter()
                .map(|(name, entry)| match entry {
                    Some(result) => json!({"name": name, "value": result.v, "dataType": result.t}),
                    None => json!({"name": name, "value": Value::Null, "dataType": Value::Null}),
                })
                .collect()
        })
        .unwrap_or_default();
    json!({
        "statusCode": response.status,
        "parameters": parameters,
        "message": success_message(response.status),
    })
}

/// Flat mode for non-`GET` ops: a single `parameters[0]` entry echoing the
/// target resource name, since webpa egress has no richer schema for these
/// ops beyond `{statusCode, parameters[], message}`.
fn shape_flat_other(op: &Op, response: &ResponseEnvelope) -> Value {
    let name = match op {
        Op::Set { param, .. }
        | Op::GetAttributes { param }
        | Op::TestAndSet { param, .. }
        | Op::SetAttributes { param, .. } => Some(param.clone()),
        Op::AddRow { table_name, .. } | Op::ReplaceRows { table_name, .. } => Some(table_name.clone()),
        Op::DeleteRow { row_name } => Some(row_name.clone()),
        Op::Subscribe { event } | Op::Unsubscribe { event } => Some(event.clone()),
        Op::Get { .. } => None,
    };
    let parameters = name.map_or_else(Vec::new, |name| vec![json!({"name": name})]);
    json!({
        "statusCode": response.status,
        "parameters": parameters,
        "message": success_message(response.status),
    })
}

/// Grouped mode: a single `parameters[0]` object naming every wildcard
/// prefix present in the request, carrying the expanded children as its
/// `value` array.
fn shape_grouped(wildcard_prefixes: &[&str], response: &ResponseEnvelope) -> Value {
    let children: Vec<Value> = response
        .results
        .as_ref()
        .map(|results| {
            results
                .iter()
                .filter_map(|(name, entry)| {
                    entry
                        .as_ref()
                        .map(|result| json!({"name": name, "value": result.v, "dataType": result.t}))
                })
                .collect()
        })
        .unwrap_or_default();
    let group = json!({
        "name": wildcard_prefixes.join(","),
        "dataType": 11,
        "parameterCount": children.len(),
        "message": success_message(response.status),
        "value": children,
    });
    json!({
        "statusCode": response.status,
        "parameters": [group],
        "message": success_message(response.status),
    })
}
