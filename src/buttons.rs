//! Button tokens: opaque strings attached to rendered buttons and returned
//! verbatim when pressed.

use coachline_core::{message::Button, model::Role};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonToken {
    /// Start registering a profile of this role.
    Register(Role),
    /// Abandon the registration session with this token.
    RegisterCancel(String),
    /// Log in as this role.
    Login(Role),
    InviteAccept(String),
    InviteReject(String),
}

impl ButtonToken {
    pub fn parse(token: &str) -> Option<Self> {
        let parts: Vec<&str> = token.trim().splitn(3, ':').collect();
        match parts.as_slice() {
            ["register", "cancel", session] if !session.is_empty() => {
                Some(Self::RegisterCancel(session.to_string()))
            }
            ["register", role] => Role::parse(role).map(Self::Register),
            ["login", role] => Role::parse(role).map(Self::Login),
            ["invite", "accept", edge] if !edge.is_empty() => {
                Some(Self::InviteAccept(edge.to_string()))
            }
            ["invite", "reject", edge] if !edge.is_empty() => {
                Some(Self::InviteReject(edge.to_string()))
            }
            _ => None,
        }
    }

    pub fn button(&self, label: &str) -> Button {
        Button::new(label, self.to_string())
    }
}

impl fmt::Display for ButtonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(role) => write!(f, "register:{role}"),
            Self::RegisterCancel(session) => write!(f, "register:cancel:{session}"),
            Self::Login(role) => write!(f, "login:{role}"),
            Self::InviteAccept(edge) => write!(f, "invite:accept:{edge}"),
            Self::InviteReject(edge) => write!(f, "invite:reject:{edge}"),
        }
    }
}

/// "I'm a trainer" / "I'm a client" buttons for the given roles.
pub fn register_buttons(roles: &[Role]) -> Vec<Button> {
    roles
        .iter()
        .map(|r| ButtonToken::Register(*r).button(&format!("I'm a {r}")))
        .collect()
}

/// Role-choice buttons for an account with both profiles.
pub fn login_buttons() -> Vec<Button> {
    Role::ALL
        .iter()
        .map(|r| ButtonToken::Login(*r).button(&format!("Continue as {r}")))
        .collect()
}

/// Accept / decline buttons for an invitation.
pub fn invite_buttons(edge_id: &str) -> Vec<Button> {
    vec![
        ButtonToken::InviteAccept(edge_id.to_string()).button("Accept"),
        ButtonToken::InviteReject(edge_id.to_string()).button("Decline"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tokens() {
        assert_eq!(
            ButtonToken::parse("register:trainer"),
            Some(ButtonToken::Register(Role::Trainer))
        );
        assert_eq!(
            ButtonToken::parse("register:cancel:ab12cd34"),
            Some(ButtonToken::RegisterCancel("ab12cd34".into()))
        );
        assert_eq!(
            ButtonToken::parse("login:client"),
            Some(ButtonToken::Login(Role::Client))
        );
        assert_eq!(
            ButtonToken::parse("invite:accept:0b6f-11"),
            Some(ButtonToken::InviteAccept("0b6f-11".into()))
        );
        assert_eq!(
            ButtonToken::parse("invite:reject:e1"),
            Some(ButtonToken::InviteReject("e1".into()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ButtonToken::parse("").is_none());
        assert!(ButtonToken::parse("register:admin").is_none());
        assert!(ButtonToken::parse("invite:accept:").is_none());
        assert!(ButtonToken::parse("login").is_none());
        assert!(ButtonToken::parse("delete:everything").is_none());
    }

    #[test]
    fn test_display_matches_parse() {
        let token = ButtonToken::InviteAccept("edge-1".into());
        assert_eq!(token.to_string(), "invite:accept:edge-1");
        assert_eq!(ButtonToken::parse(&token.to_string()), Some(token));
    }

    #[test]
    fn test_invite_buttons_carry_edge() {
        let buttons = invite_buttons("e9");
        assert_eq!(buttons[0].token, "invite:accept:e9");
        assert_eq!(buttons[1].token, "invite:reject:e9");
    }
}
