//! Human-readable rendering of responses.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use xds_sotw_proto::DiscoveryResponse;

/// Render a response as JSON.
///
/// Resource bodies holding JSON are embedded as-is; anything else is shown
/// base64-encoded.
#[must_use]
pub fn render_response(response: &DiscoveryResponse) -> Value {
    let resources: Vec<Value> = response
        .resources
        .iter()
        .map(|any| {
            let body = serde_json::from_slice::<Value>(&any.value)
                .unwrap_or_else(|_| json!({ "base64": STANDARD.encode(&any.value) }));
            json!({ "type_url": any.type_url, "body": body })
        })
        .collect();

    json!({
        "version_info": response.version_info,
        "type_url": response.type_url,
        "nonce": response.nonce,
        "resources": resources,
    })
}
