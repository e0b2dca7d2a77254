//! Outbound chat message framing: body, then a blank line.

use crate::error::FrameError;

pub const FRAME_TERMINATOR: &str = "\n\n";

/// A message that is safe to frame: no blank lines inside, no line-ending
/// noise at either end, never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    text: String,
}

impl OutboundMessage {
    pub fn new(text: &str) -> Result<Self, FrameError> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn frame(&self) -> String {
        format!("{}{FRAME_TERMINATOR}", self.text)
    }
}

/// Frames arbitrary text. Embedded blank lines are dropped so the receiver
/// cannot mistake them for the end of the message.
pub fn frame(text: &str) -> String {
    format!("{}{FRAME_TERMINATOR}", normalize(text))
}

fn normalize(text: &str) -> String {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
