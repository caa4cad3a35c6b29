//! Turning raw socket reads into messages for the listener

use enum_dispatch::enum_dispatch;

/// How bytes read from a connection are grouped before they are delivered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InputStreamType {
    /// Every read is delivered as it arrives
    #[default]
    Normal,
    /// Reads are accumulated and delivered one line at a time
    Buffered,
}

impl InputStreamType {
    /// Build the decoder for this stream type
    pub fn decoder(&self) -> InputDecoder {
        match self {
            InputStreamType::Normal => NormalDecoder.into(),
            InputStreamType::Buffered => LineDecoder::default().into(),
        }
    }
}

/// One unit of data received from the remote device
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReceivedData {
    /// The raw bytes
    pub bytes: Vec<u8>,
    /// The bytes as text, invalid utf-8 replaced
    pub text: String,
}

impl ReceivedData {
    /// Wrap received bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Self { bytes, text }
    }
}

/// Splits a byte stream into [`ReceivedData`] messages
#[enum_dispatch]
pub trait StreamDecoder {
    /// Feed freshly read bytes, returning every message that is now complete
    fn feed(&mut self, chunk: &[u8]) -> Vec<ReceivedData>;
    /// The stream ended, return whatever is still held back
    fn finish(&mut self) -> Option<ReceivedData>;
}

/// The decoder selected by an [`InputStreamType`]
#[enum_dispatch(StreamDecoder)]
#[derive(Debug)]
pub enum InputDecoder {
    /// Pass through decoding
    NormalDecoder,
    /// Line decoding
    LineDecoder,
}

/// Delivers each chunk unchanged
#[derive(Debug, Default)]
pub struct NormalDecoder;

impl StreamDecoder for NormalDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<ReceivedData> {
        if chunk.is_empty() {
            Vec::new()
        } else {
            vec![ReceivedData::new(chunk.to_vec())]
        }
    }

    fn finish(&mut self) -> Option<ReceivedData> {
        None
    }
}

/// Holds bytes back until a newline arrives
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder for LineDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<ReceivedData> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            out.push(ReceivedData::new(line));
        }
        out
    }

    fn finish(&mut self) -> Option<ReceivedData> {
        if self.pending.is_empty() {
            None
        } else {
            Some(ReceivedData::new(std::mem::take(&mut self.pending)))
        }
    }
}
