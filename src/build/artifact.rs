//! Generated model bytes and their content type.

use bytes::Bytes;

/// Content type of every model the generator exports.
pub const STL_CONTENT_TYPE: &str = "model/stl";

/// Immutable generated model. Clones share the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    data: Bytes,
    content_type: &'static str,
}

impl Artifact {
    pub fn new(data: Vec<u8>, content_type: &'static str) -> Self {
        Self {
            data: Bytes::from(data),
            content_type,
        }
    }

    pub fn stl(data: Vec<u8>) -> Self {
        Self::new(data, STL_CONTENT_TYPE)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Handle onto the shared buffer, for response bodies.
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when both handles point at the same buffer.
    pub fn shares_buffer(&self, other: &Artifact) -> bool {
        self.data.as_ptr() == other.data.as_ptr() && self.data.len() == other.data.len()
    }
}

/// Maps a generator export format to the content type served to clients.
pub fn content_type_for(export_format: &str) -> &'static str {
    match export_format.to_ascii_lowercase().as_str() {
        "stl" | "asciistl" | "binstl" => STL_CONTENT_TYPE,
        "3mf" => "model/3mf",
        "obj" => "model/obj",
        "off" => "model/off",
        _ => "application/octet-stream",
    }
}
