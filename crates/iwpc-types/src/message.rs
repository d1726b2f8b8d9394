//! Wire protocol message types.
//!
//! Two handshake messages travel point-to-point between a window and its
//! opener; two call messages travel over the shared broadcast channel. All of
//! them are JSON objects tagged by a `type` field.

use crate::identity::{CorrelationId, Identity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity-exchange messages posted directly between two windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    /// Sent by a freshly opened window to its opener.
    #[serde(rename = "NOTIFY_IDENTITY")]
    NotifyIdentity {
        #[serde(rename = "myId")]
        my_id: Identity,
    },
    /// The opener's reply, echoing the child's id and announcing its own.
    #[serde(rename = "ACK_IDENTITY")]
    AcknowledgeIdentity {
        #[serde(rename = "yourId")]
        your_id: Identity,
        #[serde(rename = "myId")]
        my_id: Identity,
    },
}

impl HandshakeMessage {
    /// Convert into the structured value carried by page messaging.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Parse a page message. Returns `None` for anything that is not a
    /// handshake message, since windows receive unrelated traffic too.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// Call messages carried on the shared broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IwpcMessage {
    #[serde(rename = "INVOKE")]
    Invoke(InvokeMessage),
    #[serde(rename = "RETURN")]
    Return(ReturnMessage),
}

impl IwpcMessage {
    /// The endpoint this message is addressed to.
    pub fn target_id(&self) -> &Identity {
        match self {
            IwpcMessage::Invoke(m) => &m.target_id,
            IwpcMessage::Return(m) => &m.target_id,
        }
    }

    /// Correlation id shared by an invoke and its return.
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            IwpcMessage::Invoke(m) => &m.correlation_id,
            IwpcMessage::Return(m) => &m.correlation_id,
        }
    }
}

/// A request to run `process_id` on the window named by `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMessage {
    pub correlation_id: CorrelationId,
    pub process_id: String,
    pub target_id: Identity,
    pub sender_id: Identity,
    /// Procedure arguments. `None` is the undefined argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl InvokeMessage {
    /// Build the return for this invoke: same correlation and process id,
    /// target and sender swapped.
    pub fn reply(&self, return_value: Option<Value>) -> ReturnMessage {
        ReturnMessage {
            correlation_id: self.correlation_id.clone(),
            process_id: self.process_id.clone(),
            target_id: self.sender_id.clone(),
            sender_id: self.target_id.clone(),
            return_value,
        }
    }
}

/// The answer to an [`InvokeMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnMessage {
    pub correlation_id: CorrelationId,
    pub process_id: String,
    pub target_id: Identity,
    pub sender_id: Identity,
    /// `None` when the procedure produced nothing or was not registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notify_identity_wire_shape() {
        let msg = HandshakeMessage::NotifyIdentity {
            my_id: Identity::from("c1"),
        };
        let value = msg.to_value().unwrap();
        assert_eq!(value, json!({ "type": "NOTIFY_IDENTITY", "myId": "c1" }));
    }

    #[test]
    fn test_ack_identity_wire_shape() {
        let value = json!({ "type": "ACK_IDENTITY", "yourId": "c1", "myId": "p1" });
        match HandshakeMessage::from_value(&value) {
            Some(HandshakeMessage::AcknowledgeIdentity { your_id, my_id }) => {
                assert_eq!(your_id.as_str(), "c1");
                assert_eq!(my_id.as_str(), "p1");
            }
            other => panic!("Expected AcknowledgeIdentity, got {other:?}"),
        }
    }

    #[test]
    fn test_unrelated_page_message_is_not_a_handshake() {
        assert!(HandshakeMessage::from_value(&json!({ "type": "SOMETHING_ELSE" })).is_none());
        assert!(HandshakeMessage::from_value(&json!("hello")).is_none());
    }

    #[test]
    fn test_invoke_serialization() {
        let msg = IwpcMessage::Invoke(InvokeMessage {
            correlation_id: CorrelationId::from("t1"),
            process_id: "INCREMENT".to_string(),
            target_id: Identity::from("c1"),
            sender_id: Identity::from("p1"),
            args: None,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "INVOKE",
                "correlationId": "t1",
                "processId": "INCREMENT",
                "targetId": "c1",
                "senderId": "p1",
            })
        );
    }

    #[test]
    fn test_reply_swaps_identities() {
        let invoke = InvokeMessage {
            correlation_id: CorrelationId::from("t1"),
            process_id: "INCREMENT".to_string(),
            target_id: Identity::from("c1"),
            sender_id: Identity::from("p1"),
            args: Some(json!({ "by": 2 })),
        };
        let ret = invoke.reply(Some(json!(1)));
        assert_eq!(ret.correlation_id, invoke.correlation_id);
        assert_eq!(ret.process_id, "INCREMENT");
        assert_eq!(ret.target_id.as_str(), "p1");
        assert_eq!(ret.sender_id.as_str(), "c1");
        assert_eq!(ret.return_value, Some(json!(1)));
    }

    #[test]
    fn test_return_parses_from_json() {
        let json = r#"{"type":"RETURN","correlationId":"t1","processId":"INCREMENT","targetId":"p1","senderId":"c1","returnValue":1}"#;
        let msg: IwpcMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.target_id().as_str(), "p1");
        assert_eq!(msg.correlation_id().as_str(), "t1");
        match msg {
            IwpcMessage::Return(ret) => assert_eq!(ret.return_value, Some(json!(1))),
            other => panic!("Expected Return, got {other:?}"),
        }
    }
}
