use crate::error::{Result, WeftError};
use crate::types::{ChatMessage, ContentBlock, Role};

/// Append-only conversation log, owned by a single conversation.
///
/// A thread is shared by reference across engine invocations so later
/// turns see all prior turns. The engine never truncates it; truncation,
/// if any, is a policy decision made outside this core.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    messages: Vec<ChatMessage>,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Prior entries are never mutated.
    ///
    /// Fails with `InvalidMessage` if the message is malformed:
    /// empty content, a Tool-role message without a capability result,
    /// or a capability use with an empty name.
    pub fn append(&mut self, message: ChatMessage) -> Result<()> {
        validate(&message)?;
        self.messages.push(message);
        Ok(())
    }

    /// Immutable ordered snapshot for passing to a backend call.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// The most recent message, if any.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn validate(message: &ChatMessage) -> Result<()> {
    if message.content.is_empty() {
        return Err(WeftError::InvalidMessage("message has no content".into()));
    }

    for block in &message.content {
        if let ContentBlock::CapabilityUse { name, .. } = block {
            if name.is_empty() {
                return Err(WeftError::InvalidMessage(
                    "capability use with empty name".into(),
                ));
            }
        }
    }

    if message.role == Role::Tool
        && !message
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::CapabilityResult { .. }))
    {
        return Err(WeftError::InvalidMessage(
            "tool message without a capability result".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_snapshot() {
        let mut thread = Thread::new();
        thread.append(ChatMessage::user("hi")).unwrap();
        thread.append(ChatMessage::assistant_text("hello")).unwrap();

        let snap = thread.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text(), "hi");
        assert_eq!(snap[1].text(), "hello");
        assert_eq!(thread.last().unwrap().text(), "hello");
    }

    #[test]
    fn test_append_empty_content_rejected() {
        let mut thread = Thread::new();
        let msg = ChatMessage {
            role: Role::User,
            content: vec![],
            timestamp: None,
        };
        assert!(matches!(
            thread.append(msg),
            Err(WeftError::InvalidMessage(_))
        ));
        assert!(thread.is_empty());
    }

    #[test]
    fn test_tool_message_requires_capability_result() {
        let mut thread = Thread::new();
        let msg = ChatMessage {
            role: Role::Tool,
            content: vec![ContentBlock::Text { text: "raw".into() }],
            timestamp: None,
        };
        assert!(matches!(
            thread.append(msg),
            Err(WeftError::InvalidMessage(_))
        ));

        thread
            .append(ChatMessage::capability_result("c1", "ok", false))
            .unwrap();
        assert_eq!(thread.len(), 1);
    }

    #[test]
    fn test_capability_use_empty_name_rejected() {
        let mut thread = Thread::new();
        let msg = ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::CapabilityUse {
                id: "c1".into(),
                name: "".into(),
                input: serde_json::json!({}),
            }],
            timestamp: None,
        };
        assert!(matches!(
            thread.append(msg),
            Err(WeftError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut thread = Thread::new();
        thread.append(ChatMessage::user("one")).unwrap();
        let snap = thread.snapshot();
        thread.append(ChatMessage::user("two")).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(thread.len(), 2);
    }
}
