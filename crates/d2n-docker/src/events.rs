//! Parsing of the `/events` newline-delimited JSON stream

use d2n_core::traits::{EventAction, HostEvent};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    #[serde(default, rename = "Type")]
    kind: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    actor: RawActor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawActor {
    #[serde(default, rename = "ID")]
    id: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// Parse one line of the event stream
///
/// Returns `None` for blank lines, malformed JSON and non-container events.
/// Actor attributes carry the container name and its labels side by side, so
/// all of them are kept as labels.
pub(crate) fn parse_event_line(line: &[u8]) -> Option<HostEvent> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    let raw: RawEvent = match serde_json::from_slice(line) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Ignoring malformed Docker event: {}", e);
            return None;
        }
    };

    if !raw.kind.is_empty() && raw.kind != "container" {
        return None;
    }

    let name = raw.actor.attributes.get("name").cloned().unwrap_or_default();

    Some(HostEvent {
        action: EventAction::parse(&raw.action),
        id: raw.actor.id,
        name,
        labels: raw.actor.attributes,
    })
}

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }
}
