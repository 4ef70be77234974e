//! What a routed event produces: one reply to the sender plus notices for
//! other parties, delivered after the effect has committed.

use coachline_core::{message::Button, model::Role};

/// A message for another entity, routed through its account.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub role: Role,
    pub entity_id: String,
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Notice {
    pub fn new(role: Role, entity_id: &str, text: impl Into<String>) -> Self {
        Self {
            role,
            entity_id: entity_id.to_string(),
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// The single response to the sender.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub buttons: Vec<Button>,
    pub notices: Vec<Notice>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn notify(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }

    /// Put a line in front of the text, e.g. an auto-login note.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.text = format!("{prefix}\n\n{}", self.text);
        }
        self
    }
}
