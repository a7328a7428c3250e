//! Server-sent-events framing for the generation endpoint.
//!
//! Wire format, one frame per event, frames separated by a blank line:
//!
//! ```text
//! event: chunk
//! data: {"text":"Hel"}
//!
//! event: done
//! data: {"full_text":"Hello"}
//!
//! event: error
//! data: {"message":"model overloaded","status":503}
//! ```
//!
//! Frames with no event name or an unknown one (keep-alives, comments) are
//! skipped.

use crate::backend::BackendEvent;
use crate::errors::BackendError;
use crate::model::BackendId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental frame splitter. Network reads may cut a frame (or a UTF-8
/// sequence) anywhere; bytes are held until the frame terminator arrives.
#[derive(Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, backend: &BackendId, bytes: &[u8]) -> Result<Vec<SseFrame>, BackendError> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some((end, terminator)) = frame_end(&self.pending) {
            let raw: Vec<u8> = self.pending.drain(..end + terminator).take(end).collect();
            let text = String::from_utf8(raw).map_err(|e| {
                BackendError::protocol(backend.clone(), format!("frame is not valid UTF-8: {e}"))
            })?;
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }
}

fn frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    buf.windows(2)
        .enumerate()
        .find_map(|(i, pair)| match pair {
            b"\n\n" => Some((i, 2)),
            b"\r\n" if buf[i..].starts_with(b"\r\n\r\n") => Some((i, 4)),
            _ => None,
        })
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

/// Maps one frame onto at most one normalized event.
pub(crate) fn decode_frame(
    backend: &BackendId,
    frame: &SseFrame,
) -> Result<Option<BackendEvent>, BackendError> {
    let Some(kind) = frame.event.as_deref() else {
        return Ok(None);
    };
    if !matches!(kind, "chunk" | "done" | "error") {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(&frame.data).map_err(|e| {
        BackendError::protocol(backend.clone(), format!("invalid {kind} frame JSON: {e}"))
    })?;
    match kind {
        "chunk" => {
            let text = string_field(backend, &value, "text", kind)?;
            Ok(Some(BackendEvent::Chunk { text }))
        }
        "done" => {
            let full_text = string_field(backend, &value, "full_text", kind)?;
            Ok(Some(BackendEvent::Done { full_text }))
        }
        _ => {
            let message = value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("generation failed");
            let status = value
                .get("status")
                .and_then(|v| v.as_u64())
                .and_then(|s| u16::try_from(s).ok());
            Err(BackendError::backend(backend.clone(), message, status))
        }
    }
}

fn string_field(
    backend: &BackendId,
    value: &serde_json::Value,
    field: &str,
    kind: &str,
) -> Result<String, BackendError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            BackendError::protocol(
                backend.clone(),
                format!("{kind} frame is missing string field `{field}`"),
            )
        })
}
