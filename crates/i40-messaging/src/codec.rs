//! Canonical JSON wire codec
//!
//! Encoding is plain serde serialization (compact, camelCase, absent optionals
//! omitted). Decoding walks the payload array by hand so that every element is
//! dispatched on its `modelType` and failures name the offending location,
//! e.g. `interactionElements[0].value[2]`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::builder::validate_frame;
use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, MessageFrame};
use crate::payload::{
    ElementCollection, ElementList, LangString, PayloadElement, Property, Reference,
    DEFAULT_VALUE_TYPE, MODEL_TYPE_COLLECTION, MODEL_TYPE_COLLECTION_AAS, MODEL_TYPE_LIST,
    MODEL_TYPE_LIST_AAS, MODEL_TYPE_PROPERTY,
};

/// Wire key of the payload array
pub const PAYLOAD_KEY: &str = "interactionElements";

/// Stateless message codec
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Serialize to compact JSON bytes
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(message)?)
    }

    pub fn encode_to_string(&self, message: &Message) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Parse wire bytes. The returned message has `received_at` set to now.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        let root: Value = serde_json::from_slice(bytes)?;
        decode_message(&root)
    }

    pub fn decode_str(&self, json: &str) -> Result<Message, DecodeError> {
        self.decode(json.as_bytes())
    }

    /// Decodes and has all four required frame fields non-empty
    pub fn is_valid(&self, bytes: &[u8]) -> bool {
        self.decode(bytes)
            .map(|message| validate_frame(&message.frame).is_ok())
            .unwrap_or(false)
    }
}

fn decode_message(root: &Value) -> Result<Message, DecodeError> {
    let obj = as_object(root, "$")?;

    let frame_value = obj
        .get("frame")
        .ok_or_else(|| DecodeError::MissingField("frame".to_string()))?;
    let frame = MessageFrame::deserialize(frame_value).map_err(DecodeError::Frame)?;

    let elements = match obj.get(PAYLOAD_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => decode_children(value, PAYLOAD_KEY)?,
    };

    Ok(Message::received(frame, elements))
}

/// Decode one payload element, dispatching on `modelType`
pub(crate) fn decode_element(value: &Value, path: &str) -> Result<PayloadElement, DecodeError> {
    let obj = as_object(value, path)?;
    let model_type = obj
        .get("modelType")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::MissingField(format!("{}.modelType", path)))?;

    match model_type {
        MODEL_TYPE_PROPERTY => decode_property(obj, path).map(PayloadElement::Property),
        MODEL_TYPE_COLLECTION | MODEL_TYPE_COLLECTION_AAS => {
            Ok(PayloadElement::Collection(ElementCollection {
                id_short: id_short(obj, path)?,
                semantic_id: semantic_id(obj, path)?,
                description: description(obj, path)?,
                value: children(obj, path)?,
            }))
        }
        MODEL_TYPE_LIST | MODEL_TYPE_LIST_AAS => Ok(PayloadElement::List(ElementList {
            id_short: id_short(obj, path)?,
            semantic_id: semantic_id(obj, path)?,
            description: description(obj, path)?,
            element_type_hint: optional_string(obj, "typeValueListElement", path)?,
            value: children(obj, path)?,
        })),
        other => Err(DecodeError::UnknownModelType {
            model_type: other.to_string(),
            path: path.to_string(),
        }),
    }
}

fn decode_property(obj: &Map<String, Value>, path: &str) -> Result<Property, DecodeError> {
    Ok(Property {
        id_short: id_short(obj, path)?,
        semantic_id: semantic_id(obj, path)?,
        description: description(obj, path)?,
        value: optional_string(obj, "value", path)?,
        value_type: optional_string(obj, "valueType", path)?
            .unwrap_or_else(|| DEFAULT_VALUE_TYPE.to_string()),
    })
}

fn decode_children(value: &Value, path: &str) -> Result<Vec<PayloadElement>, DecodeError> {
    let items = value.as_array().ok_or_else(|| DecodeError::InvalidElement {
        path: path.to_string(),
        reason: "expected an array".to_string(),
    })?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| decode_element(item, &format!("{}[{}]", path, i)))
        .collect()
}

fn children(obj: &Map<String, Value>, path: &str) -> Result<Vec<PayloadElement>, DecodeError> {
    match obj.get("value") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => decode_children(value, &format!("{}.value", path)),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, DecodeError> {
    value
        .as_object()
        .ok_or_else(|| DecodeError::NotAnObject(path.to_string()))
}

fn id_short(obj: &Map<String, Value>, path: &str) -> Result<String, DecodeError> {
    optional_string(obj, "idShort", path)?
        .ok_or_else(|| DecodeError::MissingField(format!("{}.idShort", path)))
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DecodeError::InvalidElement {
            path: format!("{}.{}", path, key),
            reason: format!("expected a string, found {}", json_kind(other)),
        }),
    }
}

fn semantic_id(obj: &Map<String, Value>, path: &str) -> Result<Option<Reference>, DecodeError> {
    typed_field(obj, "semanticId", path)
}

fn description(
    obj: &Map<String, Value>,
    path: &str,
) -> Result<Option<Vec<LangString>>, DecodeError> {
    typed_field(obj, "description", path)
}

fn typed_field<T>(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<T>, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::deserialize(value)
            .map(Some)
            .map_err(|e| DecodeError::InvalidElement {
                path: format!("{}.{}", path, key),
                reason: e.to_string(),
            }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MessageBuilder;
    use crate::message_types::{CALL_FOR_PROPOSAL, CONSENT, REQUIREMENT};
    use crate::payload::{Key, ReferenceKind};
    use chrono::{TimeZone, Utc};

    const CONSENT_JSON: &str = r#"{
        "frame": {
            "sender": { "identification": { "id": "P24" }, "role": { "name": "" } },
            "receiver": { "identification": { "id": "RH2" }, "role": { "name": "" } },
            "type": "consent",
            "conversationId": "test-123"
        },
        "interactionElements": []
    }"#;

    fn codec() -> MessageCodec {
        MessageCodec::new()
    }

    #[test]
    fn test_end_to_end_call_for_proposal() {
        let message = MessageBuilder::new()
            .from("P24", None)
            .to("RH2", None)
            .message_type(CALL_FOR_PROPOSAL)
            .conversation_id("c1")
            .element(Property::new("Quantity", "1"))
            .build()
            .unwrap();

        let bytes = codec().encode(&message).unwrap();
        let decoded = codec().decode(&bytes).unwrap();

        assert_eq!(decoded.frame.message_type, "callForProposal");
        assert_eq!(decoded.interaction_elements.len(), 1);
        let property = decoded.interaction_elements[0].as_property().unwrap();
        assert_eq!(property.id_short, "Quantity");
        assert_eq!(property.value.as_deref(), Some("1"));
    }

    #[test]
    fn test_encode_shape() {
        let message = MessageBuilder::new()
            .from("P24", None)
            .to("RH2", None)
            .message_type(CONSENT)
            .conversation_id("test-conversation")
            .build()
            .unwrap();

        let json = codec().encode_to_string(&message).unwrap();
        assert!(json.starts_with(r#"{"frame":{"sender":{"identification":{"id":"P24"}"#));
        assert!(json.contains(r#""interactionElements":[]"#));
        assert!(json.contains(r#""type":"consent""#));
        assert!(!json.contains("null"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_decode_plain_frame() {
        let message = codec().decode_str(CONSENT_JSON).unwrap();
        assert_eq!(message.sender_id(), "P24");
        assert_eq!(message.receiver_id(), "RH2");
        assert_eq!(message.message_type(), "consent");
        assert_eq!(message.conversation_id(), "test-123");
        assert!(message.received_at().is_some());
    }

    #[test]
    fn test_decode_nested_collection_with_aas_tags() {
        let json = r#"{
            "frame": {
                "sender": { "identification": { "id": "P24" }, "role": {} },
                "receiver": { "identification": { "id": "RH2" }, "role": {} },
                "type": "consent",
                "conversationId": "test-123"
            },
            "interactionElements": [
                {
                    "modelType": "SubmodelElementCollection",
                    "idShort": "Step0001",
                    "semanticId": {
                        "type": "ModelReference",
                        "keys": [
                            { "type": "Submodel", "value": "urn:plan" },
                            { "type": "SubmodelElementCollection", "value": "Step0001" }
                        ]
                    },
                    "value": [
                        {
                            "modelType": "Property",
                            "idShort": "StepTitle",
                            "value": "Load",
                            "valueType": "xs:string"
                        },
                        {
                            "modelType": "SubmodelElementList",
                            "idShort": "Machines",
                            "typeValueListElement": "Property",
                            "value": [
                                { "modelType": "Property", "idShort": "m0", "value": "RH2" }
                            ]
                        }
                    ]
                }
            ]
        }"#;

        let message = codec().decode_str(json).unwrap();
        let step = message.element("Step0001").unwrap();
        let collection = step.as_collection().unwrap();
        assert_eq!(collection.value.len(), 2);
        assert_eq!(step.property_value("StepTitle"), Some("Load"));

        let reference = step.semantic_id().unwrap();
        assert_eq!(reference.kind, ReferenceKind::ModelReference);
        assert_eq!(
            reference.keys,
            vec![
                Key::new("Submodel", "urn:plan"),
                Key::new("SubmodelElementCollection", "Step0001"),
            ]
        );

        let machines = step.find("Machines").unwrap().as_list().unwrap();
        assert_eq!(machines.element_type_hint.as_deref(), Some("Property"));
        assert_eq!(machines.value[0].as_property().unwrap().value_type, "xs:string");
    }

    #[test]
    fn test_unknown_model_type_is_rejected_with_path() {
        let json = r#"{
            "frame": {
                "sender": { "identification": { "id": "P24" } },
                "receiver": { "identification": { "id": "RH2" } },
                "type": "inform",
                "conversationId": "c"
            },
            "interactionElements": [
                { "modelType": "Collection", "idShort": "c", "value": [
                    { "modelType": "Blob", "idShort": "b" }
                ] }
            ]
        }"#;

        match codec().decode_str(json) {
            Err(DecodeError::UnknownModelType { model_type, path }) => {
                assert_eq!(model_type, "Blob");
                assert_eq!(path, "interactionElements[0].value[0]");
            }
            other => panic!("expected UnknownModelType, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_model_type_is_rejected() {
        let json = r#"{
            "frame": {
                "sender": { "identification": { "id": "P24" } },
                "receiver": { "identification": { "id": "RH2" } },
                "type": "inform",
                "conversationId": "c"
            },
            "interactionElements": [ { "idShort": "x" } ]
        }"#;
        assert!(matches!(
            codec().decode_str(json),
            Err(DecodeError::MissingField(field)) if field == "interactionElements[0].modelType"
        ));
    }

    #[test]
    fn test_property_value_must_be_string() {
        let json = r#"{
            "frame": {
                "sender": { "identification": { "id": "P24" } },
                "receiver": { "identification": { "id": "RH2" } },
                "type": "inform",
                "conversationId": "c"
            },
            "interactionElements": [ { "modelType": "Property", "idShort": "q", "value": 1 } ]
        }"#;
        assert!(matches!(
            codec().decode_str(json),
            Err(DecodeError::InvalidElement { .. })
        ));
    }

    #[test]
    fn test_null_property_value_round_trips() {
        let message = MessageBuilder::new()
            .from("P24", None)
            .to("RH2", None)
            .message_type(REQUIREMENT)
            .element(Property::empty("Pending"))
            .build()
            .unwrap();
        let decoded = codec().decode(&codec().encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.interaction_elements[0].as_property().unwrap().value.is_none());
    }

    #[test]
    fn test_reply_by_round_trips_as_iso8601() {
        let deadline = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let message = MessageBuilder::new()
            .from("P24", None)
            .to("RH2", None)
            .message_type(CALL_FOR_PROPOSAL)
            .reply_by(deadline)
            .build()
            .unwrap();

        let json = codec().encode_to_string(&message).unwrap();
        assert!(json.contains(r#""replyBy":"2024-05-01T12:30:00Z""#));
        assert_eq!(codec().decode_str(&json).unwrap().frame.reply_by, Some(deadline));
    }

    #[test]
    fn test_reply_by_without_offset_is_utc() {
        let json = CONSENT_JSON.replace(
            r#""conversationId": "test-123""#,
            r#""conversationId": "test-123", "replyBy": "2024-05-01T12:30:00""#,
        );
        let message = codec().decode_str(&json).unwrap();
        assert_eq!(
            message.frame.reply_by,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
        );

        let with_offset = CONSENT_JSON.replace(
            r#""conversationId": "test-123""#,
            r#""conversationId": "test-123", "replyBy": "2024-05-01T14:30:00.5+02:00""#,
        );
        let reply_by = codec().decode_str(&with_offset).unwrap().frame.reply_by.unwrap();
        assert_eq!(reply_by.timestamp(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap().timestamp());

        let garbage = CONSENT_JSON.replace(
            r#""conversationId": "test-123""#,
            r#""conversationId": "test-123", "replyBy": "tomorrow""#,
        );
        assert!(matches!(codec().decode_str(&garbage), Err(DecodeError::Frame(_))));
    }

    #[test]
    fn test_unrecognised_reference_kind_is_kept() {
        let json = r#"{
            "frame": {
                "sender": { "identification": { "id": "P24" } },
                "receiver": { "identification": { "id": "RH2" } },
                "type": "inform",
                "conversationId": "c"
            },
            "interactionElements": [
                {
                    "modelType": "Property",
                    "idShort": "Quantity",
                    "value": "1",
                    "semanticId": {
                        "type": "GlobalReference",
                        "keys": [ { "type": "GlobalReference", "value": "0173-1#02-AAB713#005" } ]
                    }
                }
            ]
        }"#;

        let message = codec().decode_str(json).unwrap();
        let reference = message.element("Quantity").and_then(|e| e.semantic_id()).unwrap();
        assert_eq!(reference.kind, ReferenceKind::Other("GlobalReference".to_string()));
        assert_eq!(reference.kind.as_str(), "GlobalReference");

        let encoded = codec().encode_to_string(&message).unwrap();
        assert!(encoded.contains(r#""value":"0173-1#02-AAB713#005"}],"type":"GlobalReference""#));
        assert_eq!(codec().decode_str(&encoded).unwrap(), message);
    }

    #[test]
    fn test_missing_frame_fields_fail() {
        assert!(matches!(
            codec().decode_str(r#"{"interactionElements":[]}"#),
            Err(DecodeError::MissingField(_))
        ));
        assert!(matches!(
            codec().decode_str(r#"{"frame":{"type":"inform","conversationId":"c"}}"#),
            Err(DecodeError::Frame(_))
        ));
        assert!(matches!(codec().decode_str("[]"), Err(DecodeError::NotAnObject(_))));
    }

    #[test]
    fn test_is_valid() {
        assert!(codec().is_valid(CONSENT_JSON.as_bytes()));
        assert!(!codec().is_valid(b"{ invalid json }"));

        let empty_type = CONSENT_JSON.replace(r#""type": "consent""#, r#""type": """#);
        assert!(codec().decode_str(&empty_type).is_ok());
        assert!(!codec().is_valid(empty_type.as_bytes()));
    }

    #[test]
    fn test_payload_element_deserialize_uses_codec() {
        let element: PayloadElement =
            serde_json::from_str(r#"{"modelType":"List","idShort":"l","value":[]}"#).unwrap();
        assert_eq!(element, PayloadElement::List(ElementList::new("l")));

        let err = serde_json::from_str::<PayloadElement>(r#"{"modelType":"Range","idShort":"r"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Range"));
    }
}
