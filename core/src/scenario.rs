//! Scenario descriptor: handed to the engine at session start so it can
//! load the scenario without a separate file transfer.

use crate::{
    error::{ControlError, ControlResult},
    protocol::Request,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub file_name: String,
    pub content:   Vec<u8>,
}

impl Scenario {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content:   content.into(),
        }
    }

    /// Read the scenario file. The path is sent verbatim as the file name.
    pub fn from_file(path: &str) -> ControlResult<Self> {
        let content = std::fs::read(path)
            .map_err(|e| ControlError::Config(format!("Cannot read scenario {path}: {e}")))?;
        if content.is_empty() {
            return Err(ControlError::Config(format!("Scenario {path} is empty")));
        }
        Ok(Self::new(path, content))
    }

    pub(crate) fn to_request(&self) -> Request {
        Request::Scenario {
            file_name: self.file_name.clone(),
            content:   self.content.clone(),
        }
    }
}
