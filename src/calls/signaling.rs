//! Signaling message definitions and the JSON codec.
//!
//! Every message is a JSON object with an `id` discriminator. Decoding
//! validates the presence and type of each field the variant needs and
//! reports the first offending field; it never yields a half-filled message.

use serde_json::{Map, Value, json};
use std::fmt;

use super::candidates::Candidate;
use super::error::DecodeError;

/// Response value the server uses for a successful registration or call.
pub const ACCEPTED: &str = "accepted";

/// Value the callee sends to accept an incoming call.
pub const ACCEPT: &str = "accept";

/// Message discriminators used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Register,
    RegisterResponse,
    Call,
    CallResponse,
    IncomingCall,
    IncomingCallResponse,
    StartCommunication,
    IceCandidate,
}

impl MessageId {
    /// All message ids in protocol order.
    pub const ALL: [MessageId; 8] = [
        Self::Register,
        Self::RegisterResponse,
        Self::Call,
        Self::CallResponse,
        Self::IncomingCall,
        Self::IncomingCallResponse,
        Self::StartCommunication,
        Self::IceCandidate,
    ];

    /// The value of the `id` field.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::RegisterResponse => "registerResponse",
            Self::Call => "call",
            Self::CallResponse => "callResponse",
            Self::IncomingCall => "incomingCall",
            Self::IncomingCallResponse => "incomingCallResponse",
            Self::StartCommunication => "startCommunication",
            Self::IceCandidate => "iceCandidate",
        }
    }

    /// Parse from the `id` field. Tags are case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.tag() == tag)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub response: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: String,
    pub to: String,
    pub sdp_offer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub response: String,
    pub sdp_answer: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallRequest {
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallResponse {
    pub from: String,
    pub call_response: String,
    pub sdp_offer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommunication {
    pub sdp_answer: String,
}

impl RegisterResponse {
    pub fn is_accepted(&self) -> bool {
        self.response == ACCEPTED
    }

    /// Human readable outcome, including the server's reason if any.
    pub fn outcome(&self) -> String {
        describe_outcome(&self.response, self.message.as_deref())
    }
}

impl CallResponse {
    pub fn is_accepted(&self) -> bool {
        self.response == ACCEPTED
    }

    pub fn outcome(&self) -> String {
        describe_outcome(&self.response, self.message.as_deref())
    }
}

fn describe_outcome(response: &str, message: Option<&str>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("{response}: {message}"),
        _ => response.to_string(),
    }
}

/// A decoded signaling message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register(RegisterRequest),
    RegisterResponse(RegisterResponse),
    Call(CallRequest),
    CallResponse(CallResponse),
    IncomingCall(IncomingCallRequest),
    IncomingCallResponse(IncomingCallResponse),
    StartCommunication(StartCommunication),
    IceCandidate(Candidate),
}

impl Message {
    pub fn register(name: impl Into<String>) -> Self {
        Self::Register(RegisterRequest { name: name.into() })
    }

    pub fn call(from: impl Into<String>, to: impl Into<String>, sdp_offer: impl Into<String>) -> Self {
        Self::Call(CallRequest {
            from: from.into(),
            to: to.into(),
            sdp_offer: sdp_offer.into(),
        })
    }

    pub fn incoming_call_response(
        from: impl Into<String>,
        call_response: impl Into<String>,
        sdp_offer: impl Into<String>,
    ) -> Self {
        Self::IncomingCallResponse(IncomingCallResponse {
            from: from.into(),
            call_response: call_response.into(),
            sdp_offer: sdp_offer.into(),
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::Register(_) => MessageId::Register,
            Self::RegisterResponse(_) => MessageId::RegisterResponse,
            Self::Call(_) => MessageId::Call,
            Self::CallResponse(_) => MessageId::CallResponse,
            Self::IncomingCall(_) => MessageId::IncomingCall,
            Self::IncomingCallResponse(_) => MessageId::IncomingCallResponse,
            Self::StartCommunication(_) => MessageId::StartCommunication,
            Self::IceCandidate(_) => MessageId::IceCandidate,
        }
    }

    /// Parse a raw frame and decode it.
    pub fn from_slice(frame: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Self::decode(&value)
    }

    /// Decode an untyped JSON payload.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let tag = match object.get("id") {
            None | Some(Value::Null) => return Err(DecodeError::MissingField { field: "id" }),
            Some(Value::String(tag)) => tag,
            Some(_) => {
                return Err(DecodeError::WrongType {
                    field: "id",
                    expected: "string",
                });
            }
        };
        let id = MessageId::from_tag(tag).ok_or_else(|| DecodeError::UnknownId(tag.clone()))?;
        let fields = Fields { object };

        let message = match id {
            MessageId::Register => Self::Register(RegisterRequest {
                name: fields.string("name")?,
            }),
            MessageId::RegisterResponse => Self::RegisterResponse(RegisterResponse {
                response: fields.string("response")?,
                message: fields.optional_string("message")?,
            }),
            MessageId::Call => Self::Call(CallRequest {
                from: fields.string("from")?,
                to: fields.string("to")?,
                sdp_offer: fields.string("sdpOffer")?,
            }),
            MessageId::CallResponse => Self::CallResponse(CallResponse {
                response: fields.string("response")?,
                sdp_answer: fields.optional_string("sdpAnswer")?,
                message: fields.optional_string("message")?,
            }),
            MessageId::IncomingCall => Self::IncomingCall(IncomingCallRequest {
                from: fields.string("from")?,
            }),
            MessageId::IncomingCallResponse => Self::IncomingCallResponse(IncomingCallResponse {
                from: fields.string("from")?,
                call_response: fields.string("callResponse")?,
                sdp_offer: fields.string("sdpOffer")?,
            }),
            MessageId::StartCommunication => Self::StartCommunication(StartCommunication {
                sdp_answer: fields.string("sdpAnswer")?,
            }),
            MessageId::IceCandidate => {
                let candidate = Fields {
                    object: fields.object("candidate")?,
                };
                Self::IceCandidate(Candidate::new(
                    candidate.nested_string("candidate", "candidate.candidate")?,
                    candidate.nested_string("sdpMid", "candidate.sdpMid")?,
                    candidate.u16("sdpMLineIndex", "candidate.sdpMLineIndex")?,
                ))
            }
        };
        Ok(message)
    }

    /// Encode into the wire representation.
    pub fn encode(&self) -> Value {
        let id = self.id().tag();
        let mut value = match self {
            Self::Register(m) => json!({ "id": id, "name": m.name }),
            Self::RegisterResponse(m) => json!({ "id": id, "response": m.response }),
            Self::Call(m) => json!({
                "id": id,
                "from": m.from,
                "to": m.to,
                "sdpOffer": m.sdp_offer,
            }),
            Self::CallResponse(m) => json!({ "id": id, "response": m.response }),
            Self::IncomingCall(m) => json!({ "id": id, "from": m.from }),
            Self::IncomingCallResponse(m) => json!({
                "id": id,
                "from": m.from,
                "callResponse": m.call_response,
                "sdpOffer": m.sdp_offer,
            }),
            Self::StartCommunication(m) => json!({ "id": id, "sdpAnswer": m.sdp_answer }),
            Self::IceCandidate(c) => json!({
                "id": id,
                "candidate": {
                    "candidate": c.candidate(),
                    "sdpMid": c.sdp_mid(),
                    "sdpMLineIndex": c.sdp_mline_index(),
                },
            }),
        };

        // Optional fields are omitted rather than sent as null.
        if let Some(object) = value.as_object_mut() {
            match self {
                Self::RegisterResponse(m) => insert_optional(object, "message", &m.message),
                Self::CallResponse(m) => {
                    insert_optional(object, "sdpAnswer", &m.sdp_answer);
                    insert_optional(object, "message", &m.message);
                }
                _ => {}
            }
        }
        value
    }

    /// Encode into a JSON text frame.
    pub fn to_frame(&self) -> Vec<u8> {
        self.encode().to_string().into_bytes()
    }
}

fn insert_optional(object: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        object.insert(key.to_string(), Value::String(value.clone()));
    }
}

/// Typed access to the fields of one JSON object.
struct Fields<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn string(&self, field: &'static str) -> Result<String, DecodeError> {
        self.nested_string(field, field)
    }

    /// `path` is the name reported in errors, e.g. `candidate.sdpMid`.
    fn nested_string(&self, field: &str, path: &'static str) -> Result<String, DecodeError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Err(DecodeError::MissingField { field: path }),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(DecodeError::WrongType {
                field: path,
                expected: "string",
            }),
        }
    }

    fn optional_string(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(DecodeError::WrongType {
                field,
                expected: "string",
            }),
        }
    }

    fn object(&self, field: &'static str) -> Result<&'a Map<String, Value>, DecodeError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Err(DecodeError::MissingField { field }),
            Some(Value::Object(object)) => Ok(object),
            Some(_) => Err(DecodeError::WrongType {
                field,
                expected: "object",
            }),
        }
    }

    fn u16(&self, field: &str, path: &'static str) -> Result<u16, DecodeError> {
        let wrong_type = DecodeError::WrongType {
            field: path,
            expected: "unsigned 16-bit integer",
        };
        match self.object.get(field) {
            None | Some(Value::Null) => Err(DecodeError::MissingField { field: path }),
            Some(Value::Number(n)) => {
                // Browsers serialize the index as a JSON number, possibly `0.0`.
                let index = match (n.as_u64(), n.as_f64()) {
                    (Some(index), _) => index,
                    (None, Some(f)) if f >= 0.0 && f.fract() == 0.0 => f as u64,
                    _ => return Err(wrong_type),
                };
                u16::try_from(index).map_err(|_| wrong_type)
            }
            Some(_) => Err(wrong_type),
        }
    }
}
