//! Transcript buffer
//!
//! Collects the combined output of every command of one run, in execution
//! order, for upload to the log sink once the run is over.

/// In-memory transcript of one pipeline run
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    buffer: Vec<u8>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the captured output of one command
    pub fn append(&mut self, output: &str) {
        self.buffer.extend_from_slice(output.as_bytes());
    }

    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
