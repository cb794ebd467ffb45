//! Immutable file payloads.

use bytes::Bytes;

use crate::artifacts::objects::object_id::ObjectId;

/// How far binary sniffing looks for a NUL byte.
const SNIFF_WINDOW: usize = 8 * 1024;

/// An immutable byte payload. Never mutated after creation; garbage-collected
/// only when no tree references its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
}

impl Blob {
    pub fn new(data: Bytes) -> Self {
        Blob { data }
    }

    pub fn from_text(text: &str) -> Self {
        Blob {
            data: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::hash("blob", &self.data)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A NUL byte in the sniff window marks the payload as binary.
    pub fn is_binary(&self) -> bool {
        let window = &self.data[..self.data.len().min(SNIFF_WINDOW)];
        window.contains(&0)
    }

    /// Text lines, or `None` when the payload is binary or not UTF-8.
    pub fn text_lines(&self) -> Option<Vec<String>> {
        if self.is_binary() {
            return None;
        }

        std::str::from_utf8(&self.data)
            .ok()
            .map(|text| text.lines().map(str::to_string).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        if self.is_binary() {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }
}
