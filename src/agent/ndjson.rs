//! Newline-delimited JSON decoding for streamed `/api/chat` responses.
//!
//! Ollama writes one JSON object per line. A line that is not UTF-8 or
//! fails to parse is logged and skipped so that one corrupt chunk does not end an otherwise
//! healthy stream.

use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::ChatChunk;

/// Parses one stream line. Blank and malformed lines yield `None`.
pub fn decode_line(line: &str) -> Option<ChatChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!("Skipping malformed stream line ({e}): {line}");
            None
        }
    }
}

/// Reads a streamed chat response until `done`, end of body or cancellation.
///
/// `on_partial` receives the accumulated reply after every non-empty
/// increment. Returns the full accumulated text, which may be empty.
pub async fn read_chat_stream(
    response: reqwest::Response,
    host: &str,
    cancel: &CancellationToken,
    mut on_partial: impl FnMut(&str),
) -> Result<String, AppError> {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
    let mut lines = reader.split(b'\n');

    let mut response_so_far = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            next = lines.next_segment() => next,
        };
        let Some(raw) = next.map_err(|e| AppError::from_body_io(host, &e))? else {
            debug!("Chat stream closed by {host}");
            break;
        };
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping stream line that is not valid UTF-8 ({e})");
                continue;
            }
        };
        let Some(chunk) = decode_line(&line) else {
            continue;
        };

        if let Some(message) = chunk.error {
            return Err(AppError::ModelError { message });
        }
        if let Some(piece) = chunk.message.filter(|m| !m.content.is_empty()) {
            response_so_far.push_str(&piece.content);
            on_partial(&response_so_far);
        }
        if chunk.done {
            break;
        }
    }

    Ok(response_so_far)
}
