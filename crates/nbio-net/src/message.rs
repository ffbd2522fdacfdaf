//! Application messages
//!
//! Filters turn raw frames into messages and messages back into bytes.
//! `Object` carries anything a custom filter decodes into; it must be
//! encoded to `Bytes` or `Text` before it can reach the socket.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// One decoded (or to-be-encoded) unit of application data
#[derive(Clone)]
pub enum Message {
    Bytes(Vec<u8>),
    Text(String),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Message {
    /// Wrap any value as an `Object` message
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Message::Object(Arc::new(value))
    }

    /// Raw bytes of a `Bytes` or `Text` message
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Message::Bytes(b) => Some(b),
            Message::Text(s) => Some(s.as_bytes()),
            Message::Object(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast an `Object` message
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::Object(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Owned bytes, or the message back when it is an `Object`
    pub fn into_bytes(self) -> Result<Vec<u8>, Message> {
        match self {
            Message::Bytes(b) => Ok(b),
            Message::Text(s) => Ok(s.into_bytes()),
            other => Err(other),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Message::Bytes(a), Message::Bytes(b)) => a == b,
            (Message::Text(a), Message::Text(b)) => a == b,
            (Message::Object(a), Message::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Message::Text(s) => write!(f, "Text({:?})", s),
            Message::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::Bytes(v)
    }
}

impl From<&[u8]> for Message {
    fn from(v: &[u8]) -> Self {
        Message::Bytes(v.to_vec())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_and_text_views() {
        let m = Message::from("hello");
        assert_eq!(m.as_bytes(), Some(&b"hello"[..]));
        assert_eq!(m.as_text(), Some("hello"));
        assert_eq!(m.len(), 5);
        assert_eq!(Message::from(vec![1u8, 2]).into_bytes().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_object_is_not_bytes() {
        let m = Message::object(42u32);
        assert_eq!(m.downcast_ref::<u32>(), Some(&42));
        assert!(m.as_bytes().is_none());
        assert!(m.clone().into_bytes().is_err());
        assert_eq!(m.clone(), m);
    }
}
