use std::{sync::OnceLock, time::Duration};

use serde_json::Value;
use sotto_runtime::HealthResult;

/// Per-probe request timeout. Probes are cheap and local; anything slower
/// than this counts as unhealthy.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Tokens the service's declared API title must carry, lowercased.
const TITLE_TOKENS: [&str; 2] = ["kokoro", "tts"];

/// Route the service's declared API must expose.
const SPEECH_ROUTE: &str = "/v1/audio/speech";

fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("sotto-engine")
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build reqwest client")
    })
}

fn health_body_ok(body: &Value) -> bool {
    body.get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("healthy"))
}

/// The `/health` handshake alone only proves something is listening. The
/// OpenAPI document must also look like the expected speech service: title
/// carrying the product tokens and the synthesis route present.
fn openapi_confirms_service(body: &Value) -> bool {
    let title = body
        .pointer("/info/title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();
    let title_ok = TITLE_TOKENS.iter().all(|t| title.contains(t));

    let route_ok = body
        .get("paths")
        .and_then(Value::as_object)
        .is_some_and(|paths| paths.contains_key(SPEECH_ROUTE));

    title_ok && route_ok
}

/// One layered probe against the service at `base_url`.
///
/// Tier one: `GET /health` must return 200 with `{"status": "healthy"}`
/// (case-insensitive). Tier two: `GET /openapi.json` must describe the
/// expected service. Only both tiers passing yields a confirmed healthy
/// result; tier one alone means some unrelated program owns the port.
pub(crate) async fn health_check(base_url: &str) -> HealthResult {
    let client = http_client();

    let resp = match client.get(format!("{base_url}/health")).send().await {
        Ok(resp) => resp,
        Err(err) => {
            return HealthResult::unhealthy(None, format!("health request failed: {err}"));
        }
    };

    let code = resp.status().as_u16();
    if code != 200 {
        return HealthResult::unhealthy(
            Some(code),
            format!("health endpoint returned HTTP {code}"),
        );
    }

    let body: Value = match resp.json().await {
        Ok(body) => body,
        Err(err) => {
            return HealthResult::unhealthy(Some(code), format!("malformed health body: {err}"));
        }
    };
    if !health_body_ok(&body) {
        return HealthResult::unhealthy(
            Some(code),
            "health body did not report status \"healthy\"",
        );
    }

    // Tier two: prove it's our service, not just something on the port.
    let unconfirmed = |detail: String| HealthResult {
        is_healthy: false,
        status_code: Some(200),
        message: Some(format!(
            "service answered /health but does not look like the speech service \
             ({detail}); another program may be using the port"
        )),
        is_service_confirmed: false,
    };

    let resp = match client.get(format!("{base_url}/openapi.json")).send().await {
        Ok(resp) => resp,
        Err(err) => return unconfirmed(format!("openapi request failed: {err}")),
    };
    let code = resp.status().as_u16();
    if code != 200 {
        return unconfirmed(format!("openapi endpoint returned HTTP {code}"));
    }
    let body: Value = match resp.json().await {
        Ok(body) => body,
        Err(err) => return unconfirmed(format!("malformed openapi body: {err}")),
    };
    if !openapi_confirms_service(&body) {
        return unconfirmed("unexpected API title or routes".to_string());
    }

    HealthResult::confirmed()
}
