//! Data sent to the connected device

/// Something that can be written to the connected device
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OutgoingData {
    /// Text, sent as utf-8
    Text(String),
    /// A single byte value, only the low eight bits are sent
    Int(i32),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl OutgoingData {
    /// The exact bytes that go on the wire
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            OutgoingData::Text(s) => s.into_bytes(),
            OutgoingData::Int(i) => vec![(i & 0xff) as u8],
            OutgoingData::Bytes(b) => b,
        }
    }
}

impl From<String> for OutgoingData {
    fn from(value: String) -> Self {
        OutgoingData::Text(value)
    }
}

impl From<&str> for OutgoingData {
    fn from(value: &str) -> Self {
        OutgoingData::Text(value.to_string())
    }
}

impl From<i32> for OutgoingData {
    fn from(value: i32) -> Self {
        OutgoingData::Int(value)
    }
}

impl From<Vec<u8>> for OutgoingData {
    fn from(value: Vec<u8>) -> Self {
        OutgoingData::Bytes(value)
    }
}

impl From<&[u8]> for OutgoingData {
    fn from(value: &[u8]) -> Self {
        OutgoingData::Bytes(value.to_vec())
    }
}
