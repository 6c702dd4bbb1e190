//! Error and identity codec
//!
//! Correlation rows carry two opaque text columns: `identity` and `error`.
//! This module turns caller values into that text and back again.
//!
//! Error payloads have been written in several encodings over time, so decoding
//! tries each known shape in order and always yields a usable value:
//!
//! 1. the structured-error contract ([`ErrorSerializer`]),
//! 2. generic JSON,
//! 3. the raw text.
//!
//! The structured attempt must run first: a structured error is also valid JSON
//! and would otherwise decode as an opaque object.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// ============================================================================
// Identity
// ============================================================================

/// Caller identity stored alongside a correlation
///
/// The repository never interprets it: any JSON value round-trips unchanged.
/// The engine's usual shape is `{"token", "userId", ...claims}`, which the
/// helpers below build and read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Value);

impl Identity {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self(serde_json::json!({
            "token": token.into(),
            "userId": user_id.into(),
        }))
    }

    /// Attach an additional claim. Ignored when the identity is not an object.
    pub fn with_claim(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Value::Object(claims) = &mut self.0 {
            claims.insert(key.into(), value);
        }
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.0.get("token").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.get("userId").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Encode an identity as JSON text. An absent identity stays absent.
pub fn encode_identity(identity: Option<&Identity>) -> Option<String> {
    let identity = identity?;
    match serde_json::to_string(identity) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode identity, storing none: {}", e);
            None
        }
    }
}

/// Decode a stored identity. Absent, empty, or non-JSON text yields `None`.
pub fn decode_identity(text: Option<&str>) -> Option<Identity> {
    let text = text.filter(|t| !t.trim().is_empty())?;
    match serde_json::from_str(text) {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!("Stored identity is not valid JSON, ignoring it: {}", e);
            None
        }
    }
}

// ============================================================================
// Structured process errors
// ============================================================================

/// Known error classes of the process engine
///
/// The serialized names are the class names written by the engine, which is
/// how a structured error is recognized in stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    #[serde(rename = "BadRequestError")]
    BadRequest,
    #[serde(rename = "UnauthorizedError")]
    Unauthorized,
    #[serde(rename = "ForbiddenError")]
    Forbidden,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "ConflictError")]
    Conflict,
    #[serde(rename = "UnprocessableEntityError")]
    UnprocessableEntity,
    #[serde(rename = "InternalServerError")]
    InternalServer,
    #[serde(rename = "NotImplementedError")]
    NotImplemented,
    #[serde(rename = "ServiceUnavailableError")]
    ServiceUnavailable,
    #[serde(rename = "GatewayTimeoutError")]
    GatewayTimeout,
}

impl ErrorClass {
    /// Status code carried by errors of this class
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::UnprocessableEntity => 422,
            Self::InternalServer => 500,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequestError",
            Self::Unauthorized => "UnauthorizedError",
            Self::Forbidden => "ForbiddenError",
            Self::NotFound => "NotFoundError",
            Self::Conflict => "ConflictError",
            Self::UnprocessableEntity => "UnprocessableEntityError",
            Self::InternalServer => "InternalServerError",
            Self::NotImplemented => "NotImplementedError",
            Self::ServiceUnavailable => "ServiceUnavailableError",
            Self::GatewayTimeout => "GatewayTimeoutError",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured runtime error raised by a process instance
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessError {
    pub class: ErrorClass,
    pub message: String,
    pub call_stack: Option<String>,
    pub additional_information: Option<Value>,
}

impl ProcessError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            call_stack: None,
            additional_information: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InternalServer, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::BadRequest, message)
    }

    pub fn with_call_stack(mut self, call_stack: impl Into<String>) -> Self {
        self.call_stack = Some(call_stack.into());
        self
    }

    pub fn with_additional_information(mut self, info: Value) -> Self {
        self.additional_information = Some(info);
        self
    }

    pub fn code(&self) -> u16 {
        self.class.code()
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for ProcessError {}

/// Failure raised by an [`ErrorSerializer`]
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Text could not be parsed, or parsed into the wrong shape
    #[error("malformed structured error: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialization contract for structured errors
///
/// Implementations may fail in either direction; the codec treats any failure
/// as "not a structured error" and falls back.
pub trait ErrorSerializer: Send + Sync {
    fn serialize(&self, error: &ProcessError) -> Result<String, CodecError>;

    fn deserialize(&self, text: &str) -> Result<ProcessError, CodecError>;
}

/// Wire envelope written by [`JsonErrorSerializer`]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    error_class_name: ErrorClass,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    additional_information: Option<Value>,
}

/// Default structured-error contract
///
/// Writes `{"errorClassName", "code", "message", "callStack", "additionalInformation"}`
/// and only accepts text whose `errorClassName` is a known [`ErrorClass`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorSerializer;

impl ErrorSerializer for JsonErrorSerializer {
    fn serialize(&self, error: &ProcessError) -> Result<String, CodecError> {
        let envelope = ErrorEnvelope {
            error_class_name: error.class,
            code: Some(error.code()),
            message: error.message.clone(),
            call_stack: error.call_stack.clone(),
            additional_information: error.additional_information.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    fn deserialize(&self, text: &str) -> Result<ProcessError, CodecError> {
        let envelope: ErrorEnvelope = serde_json::from_str(text)?;
        // `code` is derived from the class; older payloads omit it.
        Ok(ProcessError {
            class: envelope.error_class_name,
            message: envelope.message,
            call_stack: envelope.call_stack,
            additional_information: envelope.additional_information,
        })
    }
}

// ============================================================================
// Error payloads
// ============================================================================

/// Failure value recorded when a process instance ends with an error
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// Error recognized by the structured-error contract
    Structured(ProcessError),
    /// Plain text, stored verbatim
    Text(String),
    /// Anything else, stored as JSON
    Opaque(Value),
}

impl ErrorPayload {
    pub fn as_structured(&self) -> Option<&ProcessError> {
        match self {
            Self::Structured(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(e) => write!(f, "{}", e),
            Self::Text(text) => f.write_str(text),
            Self::Opaque(value) => write!(f, "{}", value),
        }
    }
}

impl From<ProcessError> for ErrorPayload {
    fn from(error: ProcessError) -> Self {
        Self::Structured(error)
    }
}

impl From<String> for ErrorPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ErrorPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for ErrorPayload {
    fn from(value: Value) -> Self {
        Self::Opaque(value)
    }
}

/// Encodes and decodes error payloads through a structured-error contract
#[derive(Clone)]
pub struct ErrorCodec {
    serializer: Arc<dyn ErrorSerializer>,
}

impl ErrorCodec {
    pub fn new(serializer: Arc<dyn ErrorSerializer>) -> Self {
        Self { serializer }
    }

    /// Encode a payload into a single text value
    pub fn encode(&self, payload: &ErrorPayload) -> String {
        match payload {
            ErrorPayload::Structured(error) => match self.serializer.serialize(error) {
                Ok(text) => text,
                Err(e) => {
                    debug!("Structured error serializer failed, storing as JSON: {}", e);
                    serde_json::json!({
                        "name": error.class.name(),
                        "code": error.code(),
                        "message": error.message,
                    })
                    .to_string()
                }
            },
            ErrorPayload::Text(text) => text.clone(),
            ErrorPayload::Opaque(value) => value.to_string(),
        }
    }

    /// Decode stored error text. Never fails.
    pub fn decode(&self, text: &str) -> ErrorPayload {
        if let Ok(error) = self.serializer.deserialize(text) {
            return ErrorPayload::Structured(error);
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::String(inner)) => ErrorPayload::Text(inner),
            Ok(value) => ErrorPayload::Opaque(value),
            Err(_) => ErrorPayload::Text(text.to_string()),
        }
    }
}

impl Default for ErrorCodec {
    fn default() -> Self {
        Self::new(Arc::new(JsonErrorSerializer))
    }
}

impl fmt::Debug for ErrorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCodec").finish_non_exhaustive()
    }
}

/// Encode with the default structured-error contract
pub fn encode_error(payload: &ErrorPayload) -> String {
    ErrorCodec::default().encode(payload)
}

/// Decode with the default structured-error contract
pub fn decode_error(text: &str) -> ErrorPayload {
    ErrorCodec::default().decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingSerializer;

    impl ErrorSerializer for FailingSerializer {
        fn serialize(&self, _error: &ProcessError) -> Result<String, CodecError> {
            Err(serde_json::from_str::<Value>("{").unwrap_err().into())
        }

        fn deserialize(&self, text: &str) -> Result<ProcessError, CodecError> {
            Err(serde_json::from_str::<Value>(text)
                .err()
                .unwrap_or_else(|| serde_json::from_str::<Value>("{").unwrap_err())
                .into())
        }
    }

    #[test]
    fn test_identity_round_trip() {
        let identity = Identity::new("token-abc", "user-1").with_claim("roles", json!(["admin"]));

        let encoded = encode_identity(Some(&identity));
        let decoded = decode_identity(encoded.as_deref());

        assert_eq!(decoded, Some(identity));
    }

    #[test]
    fn test_absent_identity_stays_absent() {
        assert_eq!(encode_identity(None), None);
        assert_eq!(decode_identity(None), None);
        assert_eq!(decode_identity(Some("")), None);
    }

    #[test]
    fn test_malformed_identity_decodes_to_none() {
        assert_eq!(decode_identity(Some("not json")), None);
    }

    #[test]
    fn test_identity_of_any_shape_is_kept() {
        let decoded = decode_identity(Some(r#"{"token":"t","userId":42}"#)).unwrap();
        assert_eq!(decoded.token(), Some("t"));
        assert_eq!(decoded.user_id(), None);
        assert_eq!(decoded.as_value()["userId"], 42);

        let decoded = decode_identity(Some(r#"["a","b"]"#)).unwrap();
        assert_eq!(decoded.into_value(), json!(["a", "b"]));
    }

    #[test]
    fn test_identity_accessors() {
        let identity = Identity::new("token-abc", "user-1");

        assert_eq!(identity.token(), Some("token-abc"));
        assert_eq!(identity.user_id(), Some("user-1"));
        assert_eq!(
            encode_identity(Some(&identity)).as_deref(),
            Some(r#"{"token":"token-abc","userId":"user-1"}"#)
        );
    }

    #[test]
    fn test_structured_error_round_trip() {
        let error = ProcessError::new(ErrorClass::Conflict, "already claimed")
            .with_call_stack("at step 3")
            .with_additional_information(json!({"flowNodeId": "Task_1"}));
        let payload = ErrorPayload::from(error.clone());

        let decoded = decode_error(&encode_error(&payload));

        assert_eq!(decoded.as_structured(), Some(&error));
        assert_eq!(decoded, ErrorPayload::Structured(error));
    }

    #[test]
    fn test_structured_error_envelope_shape() {
        let encoded = encode_error(&ProcessError::bad_request("nope").into());
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["errorClassName"], "BadRequestError");
        assert_eq!(value["code"], 400);
        assert_eq!(value["message"], "nope");
    }

    #[test]
    fn test_plain_string_round_trip() {
        let payload = ErrorPayload::from("boom: something went wrong");
        assert!(payload.as_structured().is_none());

        let encoded = encode_error(&payload);
        assert_eq!(encoded, "boom: something went wrong");
        assert_eq!(decode_error(&encoded), payload);
    }

    #[test]
    fn test_plain_object_round_trip() {
        let payload = ErrorPayload::from(json!({"message": "disk full", "errno": 28}));

        let decoded = decode_error(&encode_error(&payload));

        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_object_with_unknown_class_is_opaque() {
        let text = r#"{"errorClassName":"SomethingElse","message":"x"}"#;

        match decode_error(text) {
            ErrorPayload::Opaque(value) => assert_eq!(value["errorClassName"], "SomethingElse"),
            other => panic!("expected opaque payload, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_envelope_without_code() {
        let text = r#"{"errorClassName":"NotFoundError","message":"gone"}"#;

        let decoded = decode_error(text);

        assert_eq!(
            decoded,
            ErrorPayload::Structured(ProcessError::new(ErrorClass::NotFound, "gone"))
        );
    }

    #[test]
    fn test_json_string_literal_decodes_to_text() {
        assert_eq!(decode_error("\"quoted\""), ErrorPayload::from("quoted"));
    }

    #[test]
    fn test_json_looking_text_decodes_as_opaque() {
        // Text that happens to be JSON cannot be told apart from an opaque value.
        assert_eq!(decode_error("42"), ErrorPayload::Opaque(json!(42)));
    }

    #[test]
    fn test_serializer_failure_falls_back_to_json() {
        let codec = ErrorCodec::new(Arc::new(FailingSerializer));
        let payload = ErrorPayload::from(ProcessError::internal("kaput"));

        let encoded = codec.encode(&payload);
        let decoded = codec.decode(&encoded);

        match decoded {
            ErrorPayload::Opaque(value) => {
                assert_eq!(value["name"], "InternalServerError");
                assert_eq!(value["message"], "kaput");
                assert_eq!(value["code"], 500);
            }
            other => panic!("expected opaque payload, got {:?}", other),
        }
    }
}
