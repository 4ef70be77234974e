//! Trainer/client relationship handshake: invite, accept, reject, remove.
//!
//! Every transition is a conditional write in the store; notices are only
//! built after that write committed, and the gateway sends them after the
//! reply.

use crate::{
    buttons::invite_buttons,
    reply::{Notice, Reply},
};
use chrono::NaiveDate;
use coachline_core::{
    error::CoachlineError,
    model::{EdgeStatus, Entity, RelationshipEdge, Role},
};
use coachline_store::{NewEntity, Store};
use serde_json::Map;
use tracing::{info, warn};

async fn entity(store: &Store, role: Role, id: &str) -> Result<Entity, CoachlineError> {
    store
        .get_entity(role, id)
        .await?
        .ok_or_else(|| CoachlineError::NotFound(format!("There is no {role} with id {id}.")))
}

fn pair(role: Role, own_id: &str, other_id: &str) -> (String, String) {
    match role {
        Role::Trainer => (own_id.to_string(), other_id.to_string()),
        Role::Client => (other_id.to_string(), own_id.to_string()),
    }
}

fn invitation_text(inviter: &Entity) -> String {
    match inviter.role {
        Role::Trainer => format!(
            "{} ({}) invited you to train with them as your trainer.",
            inviter.name, inviter.id
        ),
        Role::Client => format!(
            "{} ({}) asked you to be their trainer.",
            inviter.name, inviter.id
        ),
    }
}

/// Invite an existing counterpart by id.
pub async fn invite(
    store: &Store,
    inviter_role: Role,
    inviter_id: &str,
    invitee_id: &str,
) -> Result<Reply, CoachlineError> {
    let invitee_role = inviter_role.opposite();
    let inviter = entity(store, inviter_role, inviter_id).await?;
    let invitee = entity(store, invitee_role, invitee_id).await?;
    let (trainer_id, client_id) = pair(inviter_role, inviter_id, invitee_id);

    if let Some(open) = store.open_edge_between(&trainer_id, &client_id).await? {
        return Err(CoachlineError::Conflict(match open.status {
            EdgeStatus::Active => format!("You are already connected with {}.", invitee.name),
            _ => format!(
                "An invitation between you and {} is already pending.",
                invitee.name
            ),
        }));
    }

    let edge = store
        .create_edge(&trainer_id, &client_id, inviter_role)
        .await?;

    Ok(
        Reply::text(format!(
            "Invitation sent to {} ({}). I'll let you know when they answer.",
            invitee.name, invitee.id
        ))
        .notify(
            Notice::new(invitee_role, &invitee.id, invitation_text(&inviter))
                .with_buttons(invite_buttons(&edge.id)),
        ),
    )
}

/// Create a client profile on the trainer's behalf and invite it.
pub async fn create_and_invite(
    store: &Store,
    trainer_id: &str,
    channel: &str,
    name: &str,
    phone: &str,
    joined: NaiveDate,
) -> Result<Reply, CoachlineError> {
    let trainer = entity(store, Role::Trainer, trainer_id).await?;
    let new = NewEntity {
        role: Role::Client,
        name: name.to_string(),
        phone: Some(phone.to_string()),
        profile: Map::new(),
    };
    let (client, edge) = store
        .create_invited_client(trainer_id, channel, &new, joined)
        .await?;

    Ok(Reply::text(format!(
        "Created client {} with id {} and sent them an invitation.",
        client.name, client.id
    ))
    .notify(
        Notice::new(Role::Client, &client.id, invitation_text(&trainer))
            .with_buttons(invite_buttons(&edge.id)),
    ))
}

/// Re-issue every invitation still waiting on `role`/`id`, with fresh
/// answer buttons.
pub async fn pending_invitations(
    store: &Store,
    role: Role,
    id: &str,
) -> Result<Vec<Notice>, CoachlineError> {
    let mut notices = Vec::new();
    for edge in store.open_edges_for(role, id).await? {
        if edge.status != EdgeStatus::Pending || edge.invitee_role() != role {
            continue;
        }
        let inviter = entity(store, edge.invited_by, edge.side(edge.invited_by)).await?;
        notices.push(
            Notice::new(role, id, invitation_text(&inviter)).with_buttons(invite_buttons(&edge.id)),
        );
    }
    Ok(notices)
}

/// Load an edge and check that `responder` is its invited party.
async fn invitation_for(
    store: &Store,
    edge_id: &str,
    responder: Role,
    responder_id: &str,
) -> Result<RelationshipEdge, CoachlineError> {
    let edge = store
        .get_edge(edge_id)
        .await?
        .ok_or_else(|| CoachlineError::NotFound("That invitation doesn't exist.".into()))?;
    if edge.invitee_role() != responder || edge.side(responder) != responder_id {
        return Err(CoachlineError::NotFound(
            "That invitation isn't addressed to you.".into(),
        ));
    }
    Ok(edge)
}

/// Pending → active, then verify both sides see each other before anyone is
/// told.
pub async fn accept(
    store: &Store,
    edge_id: &str,
    responder: Role,
    responder_id: &str,
) -> Result<Reply, CoachlineError> {
    let edge = invitation_for(store, edge_id, responder, responder_id).await?;
    let edge = store.accept_edge(&edge.id).await?;

    let clients = store.clients_of(&edge.trainer_id).await?;
    let trainers = store.trainers_of(&edge.client_id).await?;
    if !clients.contains(&edge.client_id) || !trainers.contains(&edge.trainer_id) {
        warn!(
            "accepted edge {} is not visible from both sides ({} <-> {})",
            edge.id, edge.trainer_id, edge.client_id
        );
        return Err(CoachlineError::Store(format!(
            "relationship {} not visible after accept",
            edge.id
        )));
    }

    let inviter_role = edge.invited_by;
    let inviter = entity(store, inviter_role, edge.side(inviter_role)).await?;
    let invitee = entity(store, responder, responder_id).await?;
    info!("{} accepted invitation {}", invitee.id, edge.id);

    Ok(Reply::text(format!(
        "You are now connected with {} ({}).",
        inviter.name, inviter.id
    ))
    .notify(Notice::new(
        inviter_role,
        &inviter.id,
        format!(
            "{} ({}) accepted your invitation. You are now connected.",
            invitee.name, invitee.id
        ),
    )))
}

/// Pending → declined. Lists stay as they were; the inviter is told.
pub async fn reject(
    store: &Store,
    edge_id: &str,
    responder: Role,
    responder_id: &str,
) -> Result<Reply, CoachlineError> {
    let edge = invitation_for(store, edge_id, responder, responder_id).await?;
    let edge = store.decline_edge(&edge.id).await?;

    let inviter_role = edge.invited_by;
    let inviter_id = edge.side(inviter_role).to_string();
    let invitee = entity(store, responder, responder_id).await?;
    info!("{} declined invitation {}", invitee.id, edge.id);

    Ok(Reply::text("Invitation declined.").notify(Notice::new(
        inviter_role,
        &inviter_id,
        format!("{} ({}) declined your invitation.", invitee.name, invitee.id),
    )))
}

/// End a relationship from either side, dropping the pair's assignments.
pub async fn remove(
    store: &Store,
    role: Role,
    own_id: &str,
    other_id: &str,
) -> Result<Reply, CoachlineError> {
    let (trainer_id, client_id) = pair(role, own_id, other_id);
    let (_, dropped) = store.remove_edge(&trainer_id, &client_id).await?;

    let me = entity(store, role, own_id).await?;
    let other_name = store
        .get_entity(role.opposite(), other_id)
        .await?
        .map(|e| e.name)
        .unwrap_or_else(|| other_id.to_string());

    let mut text = format!("You are no longer connected with {other_name}.");
    if dropped > 0 {
        text.push_str(&format!(" {dropped} habit assignment(s) were removed."));
    }
    Ok(Reply::text(text).notify(Notice::new(
        role.opposite(),
        other_id,
        format!("{} ({}) ended your connection.", me.name, me.id),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn joined() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    async fn register(store: &Store, address: &str, role: Role, name: &str) -> Entity {
        let new = NewEntity {
            role,
            name: name.into(),
            phone: None,
            profile: Map::new(),
        };
        store
            .register_entity(address, "telegram", &new, joined())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invite_notifies_invitee_with_buttons() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;

        let reply = invite(&store, Role::Trainer, &trainer.id, &client.id)
            .await
            .unwrap();
        assert!(reply.text.contains("Invitation sent to Ann Bell"));
        assert_eq!(reply.notices.len(), 1);
        let notice = &reply.notices[0];
        assert_eq!(notice.role, Role::Client);
        assert_eq!(notice.entity_id, client.id);
        assert!(notice.buttons[0].token.starts_with("invite:accept:"));
    }

    #[tokio::test]
    async fn test_invite_unknown_and_duplicate() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;

        let err = invite(&store, Role::Trainer, &trainer.id, "ZZ999")
            .await
            .unwrap_err();
        assert!(matches!(err, CoachlineError::NotFound(_)));

        invite(&store, Role::Trainer, &trainer.id, &client.id)
            .await
            .unwrap();
        let err = invite(&store, Role::Client, &client.id, &trainer.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoachlineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_accept_updates_both_lists_and_notifies_inviter() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;
        let edge = store
            .create_edge(&trainer.id, &client.id, Role::Trainer)
            .await
            .unwrap();

        let reply = accept(&store, &edge.id, Role::Client, &client.id)
            .await
            .unwrap();
        assert!(reply.text.contains("connected with Tara Stone"));
        assert_eq!(reply.notices[0].role, Role::Trainer);
        assert_eq!(reply.notices[0].entity_id, trainer.id);
        assert_eq!(store.clients_of(&trainer.id).await.unwrap(), vec![client.id.clone()]);
        assert_eq!(store.trainers_of(&client.id).await.unwrap(), vec![trainer.id.clone()]);

        let err = accept(&store, &edge.id, Role::Client, &client.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoachlineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_only_invitee_may_answer() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;
        let edge = store
            .create_edge(&trainer.id, &client.id, Role::Trainer)
            .await
            .unwrap();

        let err = accept(&store, &edge.id, Role::Trainer, &trainer.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoachlineError::NotFound(_)));
        assert!(store.clients_of(&trainer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_leaves_lists_and_notifies_inviter() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;
        let edge = store
            .create_edge(&trainer.id, &client.id, Role::Client)
            .await
            .unwrap();

        let reply = reject(&store, &edge.id, Role::Trainer, &trainer.id)
            .await
            .unwrap();
        assert_eq!(reply.notices[0].role, Role::Client);
        assert!(reply.notices[0].text.contains("declined"));
        assert!(store.clients_of(&trainer.id).await.unwrap().is_empty());
        assert!(store.trainers_of(&client.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_assignments_and_notifies() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;
        let client = register(&store, "200", Role::Client, "Ann Bell").await;
        let edge = store
            .create_edge(&trainer.id, &client.id, Role::Trainer)
            .await
            .unwrap();
        store.accept_edge(&edge.id).await.unwrap();
        let habit = store
            .create_habit(&trainer.id, "Water", 3.0, "liters", coachline_core::model::Frequency::Daily)
            .await
            .unwrap();
        store
            .assign_habit(&habit.id, &client.id, &trainer.id)
            .await
            .unwrap();

        let reply = remove(&store, Role::Client, &client.id, &trainer.id)
            .await
            .unwrap();
        assert!(reply.text.contains("1 habit assignment"));
        assert_eq!(reply.notices[0].entity_id, trainer.id);
        assert!(store.assigned_habits(&client.id).await.unwrap().is_empty());
        assert!(store.trainers_of(&client.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_invite() {
        let store = Store::in_memory().await.unwrap();
        let trainer = register(&store, "100", Role::Trainer, "Tara Stone").await;

        let reply = create_and_invite(
            &store,
            &trainer.id,
            "telegram",
            "Carl Dune",
            "+15550001111",
            joined(),
        )
        .await
        .unwrap();
        assert!(reply.text.contains("Carl Dune"));
        let notice = &reply.notices[0];
        assert_eq!(notice.role, Role::Client);
        let account = store
            .find_account_for_entity(Role::Client, &notice.entity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.address, "+15550001111");
        assert!(account.login_role.is_none());
    }
}
