//! Data source adapters.
//!
//! Each adapter validates tool arguments, calls its backend through the
//! resilience layer and normalizes the result into JSON for the model.
//! Backends sit behind traits so the HTTP clients can be swapped out.

pub mod ga4;
pub mod sheets;

pub use ga4::{AnalyticsBackend, Ga4Adapter, Ga4HttpBackend};
pub use sheets::{SheetsAdapter, SheetsBackend, SheetsHttpBackend};

use crate::error::{Fault, FaultCode};
use reqwest::StatusCode;
use serde_json::Value;

/// Map an HTTP error status to a stable fault. `body` is inspected for a
/// few well-known reasons but never forwarded.
pub(crate) fn classify_status(service: &str, status: StatusCode, body: &str) -> Fault {
    let body = body.to_lowercase();

    match status {
        StatusCode::UNAUTHORIZED => {
            Fault::new(FaultCode::Auth, format!("{} rejected the credentials", service))
        }
        StatusCode::FORBIDDEN if body.contains("quota") => {
            Fault::new(FaultCode::Quota, format!("{} quota exhausted", service))
        }
        StatusCode::FORBIDDEN => Fault::new(
            FaultCode::Auth,
            format!("{} denied access to the resource", service),
        ),
        StatusCode::TOO_MANY_REQUESTS => {
            Fault::new(FaultCode::RateLimited, format!("{} rate limit hit", service))
        }
        StatusCode::BAD_REQUEST if body.contains("date") => {
            Fault::invalid_range(format!("{} rejected the date range", service))
        }
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            Fault::invalid_argument(format!(
                "{} rejected the request ({})",
                service,
                status.as_u16()
            ))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Fault::new(FaultCode::Timeout, format!("{} timed out", service))
        }
        s if s.is_server_error() => Fault::unavailable(format!(
            "{} is temporarily unavailable ({})",
            service,
            s.as_u16()
        )),
        s => Fault::unavailable(format!(
            "{} returned unexpected status {}",
            service,
            s.as_u16()
        )),
    }
}

/// Map a transport-level error (no HTTP status) to a fault.
pub(crate) fn classify_transport(service: &str, error: &reqwest::Error) -> Fault {
    if error.is_timeout() {
        Fault::new(FaultCode::Timeout, format!("{} request timed out", service))
    } else if error.is_connect() {
        Fault::unavailable(format!("cannot connect to {}", service))
    } else if error.is_decode() {
        Fault::unavailable(format!("{} returned a malformed response", service))
    } else {
        Fault::unavailable(format!("{} request failed", service))
    }
}

/// Send a prepared request and turn any failure into a fault.
pub(crate) async fn send_json<T>(service: &str, request: reqwest::RequestBuilder) -> Result<T, Fault>
where
    T: serde::de::DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(service, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| classify_transport(service, &e))
}

/// Read a string argument, accepting either camelCase or snake_case keys.
pub(crate) fn arg_str<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read an unsigned integer argument, tolerating numbers sent as strings.
pub(crate) fn arg_u64(args: &Value, keys: &[&str]) -> Result<Option<u64>, Fault> {
    let Some(value) = keys.iter().find_map(|k| args.get(*k)) else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Fault::invalid_argument(format!("'{}' must be a positive integer", keys[0]))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Fault::invalid_argument(format!("'{}' must be a positive integer", keys[0]))),
        _ => Err(Fault::invalid_argument(format!(
            "'{}' must be a positive integer",
            keys[0]
        ))),
    }
}

/// Turn a cell or metric string into a JSON number when it looks like one.
pub(crate) fn numeric_or_string(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::from(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(
            classify_status("GA4", StatusCode::UNAUTHORIZED, "").code,
            FaultCode::Auth
        );
        assert_eq!(
            classify_status("GA4", StatusCode::FORBIDDEN, "Quota exceeded for property").code,
            FaultCode::Quota
        );
        assert_eq!(
            classify_status("GA4", StatusCode::TOO_MANY_REQUESTS, "").code,
            FaultCode::RateLimited
        );
        assert_eq!(
            classify_status("GA4", StatusCode::BAD_REQUEST, "Invalid startDate").code,
            FaultCode::InvalidRange
        );
        assert_eq!(
            classify_status("GA4", StatusCode::BAD_REQUEST, "bad field").code,
            FaultCode::InvalidArgument
        );
        assert_eq!(
            classify_status("GA4", StatusCode::SERVICE_UNAVAILABLE, "").code,
            FaultCode::Unavailable
        );
    }

    #[test]
    fn test_classify_status_hides_body() {
        let fault = classify_status("Sheets", StatusCode::BAD_GATEWAY, "secret upstream trace");
        assert!(!fault.message.contains("secret"));
    }

    #[test]
    fn test_arg_helpers() {
        let args = json!({"start_date": " 2024-01-01 ", "limit": "25", "empty": ""});
        assert_eq!(arg_str(&args, &["startDate", "start_date"]), Some("2024-01-01"));
        assert_eq!(arg_str(&args, &["empty"]), None);
        assert_eq!(arg_u64(&args, &["limit"]).unwrap(), Some(25));
        assert_eq!(arg_u64(&args, &["missing"]).unwrap(), None);
        assert!(arg_u64(&json!({"limit": -3}), &["limit"]).is_err());
    }

    #[test]
    fn test_numeric_or_string() {
        assert_eq!(numeric_or_string("120"), json!(120));
        assert_eq!(numeric_or_string("0.45"), json!(0.45));
        assert_eq!(numeric_or_string("/blog"), json!("/blog"));
    }
}
