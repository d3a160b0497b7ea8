//! Wire types for the tracking API
//!
//! Request bodies borrow from the caller; responses are parsed strictly
//! enough that a schema violation surfaces as [`AttributionError::Protocol`].

use super::error::AttributionError;
use crate::models::{AttributionResult, Fingerprint, FingerprintId, InstallParams};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub const GET_TRACKING_PATH: &str = "/tracking/get";
pub const SAVE_TRACKING_PATH: &str = "/tracking/save";
pub const HEALTH_PATH: &str = "/tracking/health";

/// `POST /tracking/get`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTrackingRequest<'a> {
    pub fingerprint_id: &'a FingerprintId,
    pub fingerprint: &'a Fingerprint,
}

/// `POST /tracking/save`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTrackingRequest<'a> {
    pub fingerprint_id: &'a FingerprintId,
    pub fingerprint: &'a Fingerprint,
    pub params: &'a InstallParams,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Landing page referrer, when recorded from the web.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<&'a str>,
    /// Landing page URL, when recorded from the web.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
}

/// Envelope shared by every tracking endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// `data` of a `/tracking/get` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTrackingData {
    #[serde(default)]
    pub matched: bool,
    #[serde(default)]
    pub params: Option<HashMap<String, String>>,
    #[serde(default)]
    pub fingerprint_id: Option<String>,
}

/// Interpret a `/tracking/get` body.
///
/// `success=false`, absent `data`, `matched=false` and a match without
/// `params` all mean no match. Bodies that are not JSON, or whose fields
/// have the wrong types, are protocol errors.
pub fn parse_get_response(body: &[u8]) -> Result<AttributionResult, AttributionError> {
    let response: ApiResponse<GetTrackingData> = serde_json::from_slice(body)
        .map_err(|e| AttributionError::protocol(format!("invalid /tracking/get body: {}", e)))?;

    if !response.success {
        debug!(
            message = response.message.as_deref().unwrap_or(""),
            "Backend reported failure, treating as no match"
        );
        return Ok(AttributionResult::NotMatched);
    }

    match response.data {
        Some(GetTrackingData {
            matched: true,
            params: Some(params),
            fingerprint_id,
        }) => {
            debug!(
                matched_id = fingerprint_id.as_deref().unwrap_or(""),
                params = params.len(),
                "Backend matched install"
            );
            Ok(AttributionResult::Matched(InstallParams::from(params)))
        }
        _ => Ok(AttributionResult::NotMatched),
    }
}

/// Interpret the `success` flag of a `/tracking/save` or health body.
pub fn parse_success(body: &[u8]) -> Result<bool, AttributionError> {
    let response: ApiResponse<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| AttributionError::protocol(format!("invalid response body: {}", e)))?;
    Ok(response.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_response() {
        let body = br#"{"success":true,"data":{"matched":true,"params":{"inviteCode":"ABC123"}}}"#;
        let result = parse_get_response(body).unwrap();
        assert_eq!(
            result,
            AttributionResult::Matched(InstallParams::new().with("inviteCode", "ABC123"))
        );
    }

    #[test]
    fn test_unmatched_responses() {
        let cases: [&[u8]; 5] = [
            br#"{"success":true,"data":{"matched":false}}"#,
            br#"{"success":true,"data":{"matched":false,"params":{}}}"#,
            br#"{"success":false,"message":"boom"}"#,
            br#"{"success":true}"#,
            br#"{"success":true,"data":{"matched":true}}"#,
        ];
        for body in cases {
            assert_eq!(
                parse_get_response(body).unwrap(),
                AttributionResult::NotMatched,
                "body {}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let body = br#"{"success":true,"message":"ok","data":{"matched":true,"fingerprintId":"abc","params":{"channelId":"7"},"score":0.9}}"#;
        let result = parse_get_response(body).unwrap();
        assert_eq!(result.params().unwrap().channel_id(), Some("7"));
    }

    #[test]
    fn test_schema_violations_are_protocol_errors() {
        let cases: [&[u8]; 4] = [
            b"<html>502 Bad Gateway</html>",
            br#"{"data":{"matched":true}}"#,
            br#"{"success":"yes"}"#,
            br#"{"success":true,"data":{"matched":true,"params":{"inviteCode":42}}}"#,
        ];
        for body in cases {
            let err = parse_get_response(body).unwrap_err();
            assert!(err.is_protocol(), "expected protocol error for {:?}", err);
        }
    }

    #[test]
    fn test_save_request_wire_shape() {
        let fingerprint = Fingerprint::new().with("platform", "Android");
        let id = FingerprintId::new("abc");
        let params = InstallParams::new().with("inviteCode", "XYZ");
        let request = SaveTrackingRequest {
            fingerprint_id: &id,
            fingerprint: &fingerprint,
            params: &params,
            timestamp: 1_700_000_000_000,
            referrer: None,
            url: Some("https://example.com/?inviteCode=XYZ"),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["fingerprintId"], "abc");
        assert_eq!(json["fingerprint"]["platform"], "Android");
        assert_eq!(json["params"]["inviteCode"], "XYZ");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert!(json.get("referrer").is_none());
        assert_eq!(json["url"], "https://example.com/?inviteCode=XYZ");
    }

    #[test]
    fn test_parse_success() {
        assert!(parse_success(br#"{"success":true,"data":{"fingerprintId":"x"}}"#).unwrap());
        assert!(!parse_success(br#"{"success":false}"#).unwrap());
        assert!(parse_success(b"").is_err());
    }
}
