//! Visible chat transcript and its renderings

use serde::{Deserialize, Serialize};

use crate::llm::{LlmMessage, Role};

const MARKDOWN_HEADER: &str = "# Medical Intake Chat Log";

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Bot,
    User,
}

impl Sender {
    fn speaker(self) -> &'static str {
        match self {
            Sender::Bot => "Interviewer",
            Sender::User => "Patient",
        }
    }
}

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
}

/// Append-only ordered message sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bot(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            sender: Sender::Bot,
            text: text.into(),
        });
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            sender: Sender::User,
            text: text.into(),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Render the trailing `window` messages as "Interviewer:"/"Patient:" lines
    pub fn history_window(&self, window: usize) -> String {
        let start = self.messages.len().saturating_sub(window);
        self.messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.sender.speaker(), m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Map the conversation onto chat-completion roles
    pub fn to_llm_messages(&self) -> Vec<LlmMessage> {
        self.messages
            .iter()
            .map(|m| LlmMessage {
                role: match m.sender {
                    Sender::Bot => Role::Assistant,
                    Sender::User => Role::User,
                },
                content: m.text.clone(),
            })
            .collect()
    }

    pub fn to_markdown(&self) -> String {
        generate_markdown_transcript(&self.messages)
    }
}

/// Markdown transcript: a header, then one bold-prefixed paragraph per message
pub fn generate_markdown_transcript(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .map(|m| {
            let prefix = match m.sender {
                Sender::Bot => "**Interviewer:**",
                Sender::User => "**Patient:**",
            };
            format!("{prefix} {}", m.text)
        })
        .collect();
    format!("{MARKDOWN_HEADER}\n\n{}", lines.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        let mut t = Transcript::new();
        t.push_bot("Welcome!");
        t.push_user("Hi there.");
        t.push_bot("How are you?");
        t
    }

    #[test]
    fn markdown_matches_log_format() {
        assert_eq!(
            sample().to_markdown(),
            "# Medical Intake Chat Log\n\n**Interviewer:** Welcome!\n\n**Patient:** Hi there.\n\n**Interviewer:** How are you?"
        );
    }

    #[test]
    fn markdown_of_empty_transcript_is_header_only() {
        assert_eq!(Transcript::new().to_markdown(), "# Medical Intake Chat Log\n\n");
    }

    #[test]
    fn history_window_keeps_trailing_messages() {
        let t = sample();
        assert_eq!(t.history_window(2), "Patient: Hi there.\nInterviewer: How are you?");
        assert_eq!(t.history_window(10).lines().count(), 3);
        assert_eq!(t.history_window(0), "");
    }

    #[test]
    fn llm_roles_follow_senders() {
        let msgs = sample().to_llm_messages();
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content, "Hi there.");
    }

    #[test]
    fn serializes_as_plain_message_list() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json[0]["sender"], "bot");
        assert_eq!(json[1]["text"], "Hi there.");
    }
}
