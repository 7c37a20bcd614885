use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the stdio exchange protocol.
///
/// Requests carry `data`; replies carry either `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    pub fn request(id: u64, data: Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let line = serde_json::to_string(&Message::request(7, json!({"x": 1}))).unwrap();
        assert_eq!(line, r#"{"id":7,"data":{"x":1}}"#);
    }

    #[test]
    fn test_error_reply() {
        let reply: Message = serde_json::from_str(r#"{"id":2,"error":"bad input"}"#).unwrap();
        assert_eq!(reply.id, 2);
        assert_eq!(reply.data, None);
        assert_eq!(reply.error.as_deref(), Some("bad input"));
    }
}
