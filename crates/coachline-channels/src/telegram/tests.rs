use super::polling::to_incoming;
use super::send::{keyboard, split_message, MAX_CALLBACK_DATA};
use super::types::{TgChat, TgUpdate};
use coachline_core::message::Button;

fn update(json: &str) -> TgUpdate {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_split_short_message() {
    let chunks = split_message("hello", 4096);
    assert_eq!(chunks, vec!["hello"]);
}

#[test]
fn test_split_long_message() {
    let text = "a\n".repeat(3000);
    let chunks = split_message(&text, 4096);
    assert!(chunks.len() >= 2);
    for chunk in &chunks {
        assert!(chunk.len() <= 4096);
    }
    assert_eq!(chunks.concat(), text);
}

#[test]
fn test_split_never_cuts_inside_a_char() {
    let text = "é".repeat(10);
    let chunks = split_message(&text, 5);
    assert!(chunks.iter().all(|c| c.len() <= 5));
    assert_eq!(chunks.concat(), text);
}

#[test]
fn test_tg_chat_group_detection() {
    let group: TgChat = serde_json::from_str(r#"{"id": -100123, "type": "group"}"#).unwrap();
    let supergroup: TgChat =
        serde_json::from_str(r#"{"id": -100456, "type": "supergroup"}"#).unwrap();
    let private: TgChat = serde_json::from_str(r#"{"id": 789, "type": "private"}"#).unwrap();
    let missing: TgChat = serde_json::from_str(r#"{"id": 123}"#).unwrap();

    assert!(group.is_group());
    assert!(supergroup.is_group());
    assert!(!private.is_group());
    assert!(!missing.is_group());
}

#[test]
fn test_text_message_becomes_incoming() {
    let u = update(
        r#"{"update_id": 1, "message": {
            "message_id": 2,
            "from": {"id": 42, "first_name": "Ana", "username": "ana"},
            "chat": {"id": 42, "type": "private"},
            "text": "log water"
        }}"#,
    );
    let incoming = to_incoming(u, &[]).unwrap();
    assert_eq!(incoming.text, "log water");
    assert_eq!(incoming.sender_id, "42");
    assert_eq!(incoming.sender_name.as_deref(), Some("@ana"));
    assert_eq!(incoming.address(), "42");
    assert!(incoming.button.is_none());
}

#[test]
fn test_callback_query_becomes_button_press() {
    let u = update(
        r#"{"update_id": 5, "callback_query": {
            "id": "cb1",
            "from": {"id": 42, "first_name": "Ana", "last_name": "Lee"},
            "message": {"message_id": 9, "chat": {"id": 42, "type": "private"}},
            "data": "login:client"
        }}"#,
    );
    let incoming = to_incoming(u, &[]).unwrap();
    assert_eq!(incoming.button.as_deref(), Some("login:client"));
    assert_eq!(incoming.text, "");
    assert_eq!(incoming.sender_name.as_deref(), Some("Ana Lee"));
}

#[test]
fn test_ignored_updates() {
    // Non-text message.
    let sticker = update(
        r#"{"update_id": 1, "message": {
            "message_id": 2, "from": {"id": 42, "first_name": "Ana"},
            "chat": {"id": 42, "type": "private"}
        }}"#,
    );
    assert!(to_incoming(sticker, &[]).is_none());

    // Group chat.
    let group = update(
        r#"{"update_id": 1, "message": {
            "message_id": 2, "from": {"id": 42, "first_name": "Ana"},
            "chat": {"id": -1, "type": "group"}, "text": "/help"
        }}"#,
    );
    assert!(to_incoming(group, &[]).is_none());

    // Not on the allow list.
    let stranger = update(
        r#"{"update_id": 1, "message": {
            "message_id": 2, "from": {"id": 7, "first_name": "Bob"},
            "chat": {"id": 7, "type": "private"}, "text": "/help"
        }}"#,
    );
    assert!(to_incoming(stranger, &[42]).is_none());
}

#[test]
fn test_keyboard_one_button_per_row() {
    let buttons = vec![
        Button::new("Accept", "invite:accept:e1"),
        Button::new("Reject", "invite:reject:e1"),
    ];
    let markup = keyboard(&buttons).unwrap();
    let json = serde_json::to_value(&markup).unwrap();
    assert_eq!(json["inline_keyboard"].as_array().unwrap().len(), 2);
    assert_eq!(json["inline_keyboard"][0][0]["text"], "Accept");
    assert_eq!(json["inline_keyboard"][1][0]["callback_data"], "invite:reject:e1");

    assert!(keyboard(&[]).is_none());
    let oversized = vec![Button::new("x", "y".repeat(MAX_CALLBACK_DATA + 1))];
    assert!(keyboard(&oversized).is_none());
}
