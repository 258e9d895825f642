//! Leveled, deduplicating message log collected while a request is processed.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

/// One log entry. Uniqueness key is `(level, text)`; repeats bump `count`.
/// Serialized as `message` because that is the key the front-end reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub level: Level,
    #[serde(rename = "message")]
    pub text: String,
    pub count: u32,
}

#[derive(Clone, Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, or increment the count of an identical `(level, text)` entry.
    pub fn add(&mut self, text: impl Into<String>, level: Level) {
        let text = text.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|m| m.level == level && m.text == text)
        {
            entry.count += 1;
            return;
        }
        self.entries.push(Message {
            level,
            text,
            count: 1,
        });
    }

    pub fn debug(&mut self, text: impl Into<String>) {
        self.add(text, Level::Debug);
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.add(text, Level::Info);
    }

    pub fn success(&mut self, text: impl Into<String>) {
        self.add(text, Level::Success);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.add(text, Level::Error);
    }

    /// Entries visible to the viewer. Debug entries are only returned to a privileged
    /// viewer on a debug-enabled system.
    pub fn get(&self, privileged_debug: bool) -> Vec<Message> {
        if privileged_debug {
            return self.entries.clone();
        }
        self.exclude(Level::Debug)
    }

    pub fn exclude(&self, level: Level) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|m| m.level != level)
            .cloned()
            .collect()
    }

    pub fn has_level(&self, level: Level) -> bool {
        self.entries.iter().any(|m| m.level == level)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_messages_are_counted_once() {
        let mut log = MessageLog::new();
        log.add("Toggled published", Level::Success);
        log.add("Toggled published", Level::Success);
        let all = log.get(true);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].count, 2);
    }

    #[test]
    fn same_text_different_level_is_distinct() {
        let mut log = MessageLog::new();
        log.info("Created");
        log.success("Created");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn debug_hidden_unless_privileged() {
        let mut log = MessageLog::new();
        log.debug("html template for book not found in objects/");
        log.info("Created new genre");
        log.error("Error when setting");

        let visible = log.get(false);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|m| m.level != Level::Debug));
        assert_eq!(visible[0].text, "Created new genre");
        assert_eq!(visible[1].text, "Error when setting");

        assert_eq!(log.get(true).len(), 3);
    }

    #[test]
    fn serializes_text_as_message() {
        let mut log = MessageLog::new();
        log.success("Saved");
        let json = serde_json::to_value(log.get(false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "level": "success", "message": "Saved", "count": 1 }])
        );
    }
}
