//! Artifact tag extraction from streamed model output.
//!
//! Models mark rich outputs with `<artifact id="..." title="..." type="...">`
//! blocks. The scanner watches the text stream incrementally: the first sight
//! of an opening tag yields a streaming artifact event, the matching close
//! tag yields a complete one. An id seen before is an in-place patch of the
//! earlier artifact, not a new one.

use std::collections::HashSet;

use regex::Regex;

use crate::events::TurnEvent;

const CLOSE_TAG: &str = "</artifact>";
/// Longest tag prefix worth holding back across delta boundaries.
const MAX_PARTIAL_TAG: usize = 256;

struct OpenArtifact {
    id: String,
    title: String,
    artifact_type: String,
    content: String,
}

/// Incremental scanner over streamed text deltas.
pub struct ArtifactScanner {
    buffer: String,
    current: Option<OpenArtifact>,
    seen_ids: HashSet<String>,
    open_tag: Regex,
    attr: Regex,
}

impl Default for ArtifactScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactScanner {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            current: None,
            seen_ids: HashSet::new(),
            open_tag: Regex::new(r"<artifact\b([^>]*)>").expect("valid literal regex"),
            attr: Regex::new(r#"(\w+)="([^"]*)""#).expect("valid literal regex"),
        }
    }

    /// Whether an id was already completed earlier in this turn; a repeat is
    /// a patch.
    pub fn is_patch(&self, id: &str) -> bool {
        self.seen_ids.contains(id)
    }

    /// Feed one text delta; returns any artifact events it produced.
    pub fn scan(&mut self, delta: &str) -> Vec<TurnEvent> {
        self.buffer.push_str(delta);
        let mut events = Vec::new();

        loop {
            if self.current.is_some() {
                if let Some(pos) = self.buffer.find(CLOSE_TAG) {
                    let body: String = self.buffer.drain(..pos).collect();
                    self.buffer.drain(..CLOSE_TAG.len());
                    let mut artifact = match self.current.take() {
                        Some(a) => a,
                        None => break,
                    };
                    artifact.content.push_str(&body);
                    self.seen_ids.insert(artifact.id.clone());
                    events.push(TurnEvent::ArtifactEvent {
                        id: artifact.id,
                        title: artifact.title,
                        artifact_type: artifact.artifact_type,
                        content: artifact.content,
                        is_complete: true,
                    });
                    continue;
                }
                // No close tag yet; absorb all but a possible partial tag.
                let keep = partial_tail(&self.buffer);
                let take = self.buffer.len() - keep;
                if take > 0 {
                    let body: String = self.buffer.drain(..take).collect();
                    if let Some(artifact) = self.current.as_mut() {
                        artifact.content.push_str(&body);
                    }
                }
                break;
            }

            let Some(found) = self.open_tag.captures(&self.buffer) else {
                // Outside an artifact the text itself is ordinary content;
                // only retain what could still become an opening tag.
                let keep = partial_tail(&self.buffer);
                let take = self.buffer.len() - keep;
                self.buffer.drain(..take);
                break;
            };

            let whole = found.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let attrs = found.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            self.buffer.drain(..whole.1);

            let mut id = String::new();
            let mut title = String::new();
            let mut artifact_type = String::new();
            for cap in self.attr.captures_iter(&attrs) {
                match &cap[1] {
                    "id" => id = cap[2].to_string(),
                    "title" => title = cap[2].to_string(),
                    "type" => artifact_type = cap[2].to_string(),
                    _ => {}
                }
            }
            if id.is_empty() {
                continue;
            }

            events.push(TurnEvent::ArtifactEvent {
                id: id.clone(),
                title: title.clone(),
                artifact_type: artifact_type.clone(),
                content: String::new(),
                is_complete: false,
            });
            self.current = Some(OpenArtifact {
                id,
                title,
                artifact_type,
                content: String::new(),
            });
        }

        events
    }
}

/// Length of a buffer suffix that might be the start of a split tag.
fn partial_tail(buffer: &str) -> usize {
    match buffer.rfind('<') {
        Some(idx) if buffer.len() - idx <= MAX_PARTIAL_TAG => buffer.len() - idx,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_fields(event: &TurnEvent) -> (&str, &str, bool) {
        match event {
            TurnEvent::ArtifactEvent {
                id,
                content,
                is_complete,
                ..
            } => (id, content, *is_complete),
            other => panic!("expected artifact event, got {other:?}"),
        }
    }

    #[test]
    fn open_then_close_yields_streaming_then_complete() {
        let mut scanner = ArtifactScanner::new();
        let mut events = Vec::new();
        events.extend(scanner.scan(r#"Here: <artifact id="a1" title="Report" type="markdown">"#));
        events.extend(scanner.scan("# Title\nbody"));
        events.extend(scanner.scan("</artifact> done"));

        assert_eq!(events.len(), 2);
        let (id, content, complete) = artifact_fields(&events[0]);
        assert_eq!(id, "a1");
        assert!(content.is_empty());
        assert!(!complete);
        let (id, content, complete) = artifact_fields(&events[1]);
        assert_eq!(id, "a1");
        assert_eq!(content, "# Title\nbody");
        assert!(complete);
    }

    #[test]
    fn tag_split_across_deltas_is_still_detected() {
        let mut scanner = ArtifactScanner::new();
        let mut events = Vec::new();
        events.extend(scanner.scan("text <arti"));
        events.extend(scanner.scan(r#"fact id="x" title="T" type="code">fn main"#));
        events.extend(scanner.scan("() {}</arti"));
        events.extend(scanner.scan("fact>"));

        assert_eq!(events.len(), 2);
        let (_, content, complete) = artifact_fields(&events[1]);
        assert_eq!(content, "fn main() {}");
        assert!(complete);
    }

    #[test]
    fn repeated_id_counts_as_patch() {
        let mut scanner = ArtifactScanner::new();
        scanner.scan(r#"<artifact id="a1" title="v1" type="markdown">one</artifact>"#);
        assert!(scanner.is_patch("a1"));
        assert!(!scanner.is_patch("a2"));

        let events = scanner.scan(r#"<artifact id="a1" title="v2" type="markdown">two</artifact>"#);
        assert_eq!(events.len(), 2);
        let (id, content, complete) = artifact_fields(&events[1]);
        assert_eq!(id, "a1");
        assert_eq!(content, "two");
        assert!(complete);
    }

    #[test]
    fn tag_without_id_is_ignored() {
        let mut scanner = ArtifactScanner::new();
        let events = scanner.scan(r#"<artifact title="nameless">x</artifact>"#);
        assert!(events.is_empty());
    }
}
