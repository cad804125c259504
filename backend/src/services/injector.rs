//! Variable injection for engine workflow definitions
//!
//! Substitutes `{{name}}` placeholders into the textual fields of a
//! definition's nodes before the tenant copy is created. Substitution is
//! literal string replacement with no escaping or syntax awareness.
//! Credential values never travel through here; `configure` overwrites
//! node parameter fields structurally instead.

use serde_json::Value;
use std::collections::HashMap;

use crate::services::engine::EngineNode;

/// Apply variable substitution to every node that carries injectable text.
///
/// Script nodes get their source text rewritten; HTTP call nodes get their
/// URL and header values rewritten. All other node kinds pass through
/// unmodified.
pub fn inject_variables(nodes: &mut [EngineNode], variables: &HashMap<String, String>) {
    if variables.is_empty() {
        return;
    }

    for node in nodes {
        match kind_suffix(&node.kind) {
            "script" | "code" => inject_into_script(node, variables),
            "httpRequest" | "http" => inject_into_http(node, variables),
            _ => {}
        }
    }
}

/// Structural merge used by `configure`: for every node whose parameter
/// object already carries one of the supplied keys, overwrite that value.
/// Nodes without a matching key are untouched; no new keys are introduced.
pub fn merge_node_parameters(nodes: &mut [EngineNode], values: &HashMap<String, Value>) {
    if values.is_empty() {
        return;
    }

    for node in nodes {
        if let Value::Object(params) = &mut node.parameters {
            for (key, value) in values {
                if params.contains_key(key) {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Node kinds are namespaced ("flowgrid.httpRequest"); match on the last
/// segment so custom namespaces behave the same.
fn kind_suffix(kind: &str) -> &str {
    kind.rsplit('.').next().unwrap_or(kind)
}

fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in variables {
        let marker = format!("{{{{{}}}}}", name);
        if out.contains(&marker) {
            out = out.replace(&marker, value);
        }
    }
    out
}

fn inject_into_script(node: &mut EngineNode, variables: &HashMap<String, String>) {
    if let Some(Value::String(source)) = node.parameters.get_mut("source") {
        *source = substitute(source, variables);
    }
}

fn inject_into_http(node: &mut EngineNode, variables: &HashMap<String, String>) {
    if let Some(Value::String(url)) = node.parameters.get_mut("url") {
        *url = substitute(url, variables);
    }

    if let Some(Value::Array(headers)) = node.parameters.get_mut("headers") {
        for entry in headers {
            if let Some(Value::String(value)) = entry.get_mut("value") {
                *value = substitute(value, variables);
            }
        }
    }
}
