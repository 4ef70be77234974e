use super::{NewEntity, Store};
use chrono::{NaiveDate, TimeZone, Utc};
use coachline_core::{
    error::CoachlineError,
    model::{EdgeStatus, EntityStatus, Frequency, Role, Speaker, TaskStatus},
};
use serde_json::{json, Map, Value};

async fn test_store() -> Store {
    Store::in_memory().await.unwrap()
}

fn joined() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 12).unwrap()
}

fn new_entity(role: Role, name: &str) -> NewEntity {
    NewEntity {
        role,
        name: name.to_string(),
        phone: None,
        profile: Map::new(),
    }
}

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("payload must be an object"),
    }
}

/// A trainer on one address and a client on another.
async fn pair(store: &Store) -> (String, String) {
    let trainer = store
        .register_entity("100", "telegram", &new_entity(Role::Trainer, "Tom Reed"), joined())
        .await
        .unwrap();
    let client = store
        .register_entity("200", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();
    (trainer.id, client.id)
}

// --- Accounts and entities ---

#[tokio::test]
async fn test_register_links_account_and_logs_in() {
    let store = test_store().await;
    let entity = store
        .register_entity("200", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();
    assert_eq!(entity.id, "AB12C");
    assert_eq!(entity.status, EntityStatus::Active);

    let account = store.get_account("200").await.unwrap().unwrap();
    assert_eq!(account.client_id.as_deref(), Some("AB12C"));
    assert_eq!(account.trainer_id, None);
    assert_eq!(account.login_role, Some(Role::Client));
}

#[tokio::test]
async fn test_id_collision_appends_digits() {
    let store = test_store().await;
    let first = store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();
    let second = store
        .register_entity("2", "telegram", &new_entity(Role::Client, "Alan Baker"), joined())
        .await
        .unwrap();

    assert_eq!(first.id, "AB12C");
    assert_ne!(second.id, first.id);
    assert!(second.id.starts_with("AB12"));
    assert!((5..=7).contains(&second.id.len()));
}

#[tokio::test]
async fn test_same_id_allowed_across_roles() {
    let store = test_store().await;
    let client = store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();
    let trainer = store
        .register_entity("2", "telegram", &new_entity(Role::Trainer, "Alice Brown"), joined())
        .await
        .unwrap();
    assert_eq!(client.id, trainer.id);
}

#[tokio::test]
async fn test_second_profile_of_same_role_rejected() {
    let store = test_store().await;
    store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();
    let err = store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Other Name"), joined())
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::Conflict(_)));
}

#[tokio::test]
async fn test_login_role_requires_link() {
    let store = test_store().await;
    store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();

    let err = store
        .set_login_role("1", Some(Role::Trainer))
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::NotFound(_)));

    store.set_login_role("1", None).await.unwrap();
    assert_eq!(store.get_account("1").await.unwrap().unwrap().login_role, None);

    store.set_login_role("1", Some(Role::Client)).await.unwrap();
    store.unlink_entity("1", Role::Client).await.unwrap();
    let account = store.get_account("1").await.unwrap().unwrap();
    assert_eq!(account.client_id, None);
    assert_eq!(account.login_role, None);
}

#[tokio::test]
async fn test_update_entity_field_columns_and_profile() {
    let store = test_store().await;
    let entity = store
        .register_entity("1", "telegram", &new_entity(Role::Client, "Alice Brown"), joined())
        .await
        .unwrap();

    store
        .update_entity_field(Role::Client, &entity.id, "name", "Alice B.")
        .await
        .unwrap();
    store
        .update_entity_field(Role::Client, &entity.id, "goal", "run 5k")
        .await
        .unwrap();

    let updated = store.get_entity(Role::Client, &entity.id).await.unwrap().unwrap();
    assert_eq!(updated.name, "Alice B.");
    assert_eq!(updated.field("goal").as_deref(), Some("run 5k"));

    let err = store
        .update_entity_field(Role::Client, "NOPE1", "name", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_trainer_cascades() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let edge = store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();
    store.accept_edge(&edge.id).await.unwrap();
    let habit = store
        .create_habit(&trainer, "Water", 3.0, "liters", Frequency::Daily)
        .await
        .unwrap();
    store.assign_habit(&habit.id, &client, &trainer).await.unwrap();
    store
        .append_log(&habit.id, &client, 1.0, Utc::now())
        .await
        .unwrap();

    assert!(store.delete_entity(Role::Trainer, &trainer).await.unwrap());

    assert!(store.get_entity(Role::Trainer, &trainer).await.unwrap().is_none());
    assert!(store.get_habit(&habit.id).await.unwrap().is_none());
    assert!(store.assigned_habits(&client).await.unwrap().is_empty());
    assert!(store.trainers_of(&client).await.unwrap().is_empty());
    assert_eq!(
        store.get_edge(&edge.id).await.unwrap().unwrap().status,
        EdgeStatus::Removed
    );
    let account = store.get_account("100").await.unwrap().unwrap();
    assert_eq!(account.trainer_id, None);
    assert_eq!(account.login_role, None);

    assert!(!store.delete_entity(Role::Trainer, &trainer).await.unwrap());
}

// --- Tasks ---

#[tokio::test]
async fn test_one_running_task_per_entity() {
    let store = test_store().await;
    let first = store
        .insert_task(Role::Client, "AB12C", "log_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();
    assert_eq!(first.status, TaskStatus::Running);

    let err = store
        .insert_task(Role::Client, "AB12C", "edit_profile", TaskStatus::Running, &Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::Conflict(_)));

    // Other role, same id: independent.
    store
        .insert_task(Role::Trainer, "AB12C", "create_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();

    // Terminal rows never conflict.
    store
        .insert_task(Role::Client, "AB12C", "view_profile", TaskStatus::Completed, &Map::new())
        .await
        .unwrap();

    let running = store.running_task(Role::Client, "AB12C").await.unwrap().unwrap();
    assert_eq!(running.id, first.id);
}

#[tokio::test]
async fn test_task_lifecycle() {
    let store = test_store().await;
    let task = store
        .insert_task(Role::Client, "AB12C", "log_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();

    let step = payload(json!({"step": 1, "answers": {"habit": "h1"}}));
    assert!(store.update_task_payload(&task.id, &step).await.unwrap());

    let done = payload(json!({"step": 2, "answers": {"habit": "h1", "value": "1.5"}}));
    assert!(store
        .finish_task(&task.id, TaskStatus::Completed, &done)
        .await
        .unwrap());

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.payload["answers"]["value"], json!("1.5"));

    // Completed tasks are frozen.
    assert!(!store.update_task_payload(&task.id, &step).await.unwrap());
    assert!(!store
        .finish_task(&task.id, TaskStatus::Failed, &done)
        .await
        .unwrap());
    assert!(store.running_task(Role::Client, "AB12C").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_task_keeps_error() {
    let store = test_store().await;
    let task = store
        .insert_task(Role::Trainer, "TR12C", "create_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();
    let failed = payload(json!({"error": "store unavailable"}));
    store
        .finish_task(&task.id, TaskStatus::Failed, &failed)
        .await
        .unwrap();

    let stored = store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.payload["error"], json!("store unavailable"));
}

#[tokio::test]
async fn test_stop_running_task() {
    let store = test_store().await;
    assert!(store
        .stop_running_task(Role::Client, "AB12C")
        .await
        .unwrap()
        .is_none());

    let task = store
        .insert_task(Role::Client, "AB12C", "log_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();
    let stopped = store
        .stop_running_task(Role::Client, "AB12C")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stopped.id, task.id);
    assert_eq!(stopped.status, TaskStatus::Stopped);
    assert!(stopped.stopped_at.is_some());

    // A new task can start once the old one is stopped.
    store
        .insert_task(Role::Client, "AB12C", "log_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();
    assert_eq!(store.list_tasks(Role::Client, "AB12C").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_recent_completed_tasks_newest_first() {
    let store = test_store().await;
    for kind in ["view_profile", "list_habits", "view_progress"] {
        store
            .insert_task(Role::Client, "AB12C", kind, TaskStatus::Completed, &Map::new())
            .await
            .unwrap();
    }
    store
        .insert_task(Role::Client, "AB12C", "log_habit", TaskStatus::Running, &Map::new())
        .await
        .unwrap();

    let recent = store
        .recent_completed_tasks(Role::Client, "AB12C", 2)
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].task_type, "view_progress");
    assert_eq!(recent[1].task_type, "list_habits");
}

// --- Relationships ---

#[tokio::test]
async fn test_accept_updates_both_lists() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;

    let edge = store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();
    assert_eq!(edge.status, EdgeStatus::Pending);
    assert!(store.clients_of(&trainer).await.unwrap().is_empty());

    let accepted = store.accept_edge(&edge.id).await.unwrap();
    assert_eq!(accepted.status, EdgeStatus::Active);
    assert!(accepted.responded_at.is_some());
    assert_eq!(store.clients_of(&trainer).await.unwrap(), vec![client.clone()]);
    assert_eq!(store.trainers_of(&client).await.unwrap(), vec![trainer.clone()]);

    let counterparts = store.counterparts(Role::Trainer, &trainer).await.unwrap();
    assert_eq!(counterparts.len(), 1);
    assert_eq!(counterparts[0].name, "Alice Brown");
}

#[tokio::test]
async fn test_double_accept_rejected() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let edge = store.create_edge(&trainer, &client, Role::Client).await.unwrap();

    store.accept_edge(&edge.id).await.unwrap();
    let err = store.accept_edge(&edge.id).await.unwrap_err();
    assert!(matches!(err, CoachlineError::Conflict(_)));
    assert_eq!(store.clients_of(&trainer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_decline_leaves_lists_untouched() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let edge = store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();

    let declined = store.decline_edge(&edge.id).await.unwrap();
    assert_eq!(declined.status, EdgeStatus::Declined);
    assert!(store.clients_of(&trainer).await.unwrap().is_empty());
    assert!(store.trainers_of(&client).await.unwrap().is_empty());

    assert!(store.accept_edge(&edge.id).await.is_err());

    // A fresh invitation is allowed after a decline.
    store.create_edge(&trainer, &client, Role::Client).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_open_edge_rejected() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();
    let err = store
        .create_edge(&trainer, &client, Role::Client)
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::Conflict(_)));
}

#[tokio::test]
async fn test_remove_edge_drops_pair_assignments_only() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let other = store
        .register_entity("300", "telegram", &new_entity(Role::Trainer, "Olga Park"), joined())
        .await
        .unwrap();

    for t in [&trainer, &other.id] {
        let edge = store.create_edge(t, &client, Role::Trainer).await.unwrap();
        store.accept_edge(&edge.id).await.unwrap();
    }
    let mine = store
        .create_habit(&trainer, "Water", 3.0, "liters", Frequency::Daily)
        .await
        .unwrap();
    let theirs = store
        .create_habit(&other.id, "Steps", 8000.0, "steps", Frequency::Daily)
        .await
        .unwrap();
    store.assign_habit(&mine.id, &client, &trainer).await.unwrap();
    store.assign_habit(&theirs.id, &client, &other.id).await.unwrap();

    let (edge, dropped) = store.remove_edge(&trainer, &client).await.unwrap();
    assert_eq!(edge.status, EdgeStatus::Removed);
    assert_eq!(dropped, 1);

    let remaining = store.assigned_habits(&client).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, theirs.id);
    assert_eq!(store.trainers_of(&client).await.unwrap(), vec![other.id.clone()]);

    let err = store.remove_edge(&trainer, &client).await.unwrap_err();
    assert!(matches!(err, CoachlineError::NotFound(_)));
}

#[tokio::test]
async fn test_accept_after_remove_rejected() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let edge = store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();

    store.remove_edge(&trainer, &client).await.unwrap();
    let err = store.accept_edge(&edge.id).await.unwrap_err();
    assert!(matches!(err, CoachlineError::Conflict(_)));

    let edge = store.get_edge(&edge.id).await.unwrap().unwrap();
    assert_eq!(edge.status, EdgeStatus::Removed);
    assert!(store.clients_of(&trainer).await.unwrap().is_empty());
    assert!(store.trainers_of(&client).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_racing_accept_ends_removed() {
    let store = test_store().await;
    let (trainer, client) = pair(&store).await;
    let edge = store.create_edge(&trainer, &client, Role::Trainer).await.unwrap();

    let (removed, accepted) = tokio::join!(
        store.remove_edge(&trainer, &client),
        store.accept_edge(&edge.id)
    );

    // Either order is legal; an accept that lost must not have touched anything.
    removed.unwrap();
    if let Err(e) = accepted {
        assert!(matches!(e, CoachlineError::Conflict(_)));
    }
    let edge = store.get_edge(&edge.id).await.unwrap().unwrap();
    assert_eq!(edge.status, EdgeStatus::Removed);
    assert!(store.clients_of(&trainer).await.unwrap().is_empty());
    assert!(store.trainers_of(&client).await.unwrap().is_empty());
    assert!(store.open_edge_between(&trainer, &client).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_invited_client_activates_on_accept() {
    let store = test_store().await;
    let (trainer, _) = pair(&store).await;
    let mut new = new_entity(Role::Client, "Bea Cruz");
    new.phone = Some("+15550001".into());

    let (client, edge) = store
        .create_invited_client(&trainer, "telegram", &new, joined())
        .await
        .unwrap();
    assert_eq!(client.status, EntityStatus::Invited);
    assert_eq!(edge.invited_by, Role::Trainer);

    let account = store.get_account("+15550001").await.unwrap().unwrap();
    assert_eq!(account.client_id.as_deref(), Some(client.id.as_str()));
    assert_eq!(account.login_role, None);

    store.accept_edge(&edge.id).await.unwrap();
    let activated = store.get_entity(Role::Client, &client.id).await.unwrap().unwrap();
    assert_eq!(activated.status, EntityStatus::Active);
}

#[tokio::test]
async fn test_registering_with_invited_phone_claims_the_client() {
    let store = test_store().await;
    let (trainer, _) = pair(&store).await;
    let mut new = new_entity(Role::Client, "Bea Cruz");
    new.phone = Some("+15550001".into());
    let (client, _) = store
        .create_invited_client(&trainer, "telegram", &new, joined())
        .await
        .unwrap();

    let mut own = new_entity(Role::Client, "Beatriz Cruz");
    own.phone = Some("+15550001".into());
    own.profile.insert("goal".into(), "sleep more".into());
    let claimed = store
        .claim_invited_client("900", "telegram", &own)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, client.id);
    assert_eq!(claimed.name, "Beatriz Cruz");
    assert_eq!(claimed.profile["goal"], "sleep more");

    let account = store.get_account("900").await.unwrap().unwrap();
    assert_eq!(account.client_id.as_deref(), Some(client.id.as_str()));
    assert_eq!(account.login_role, Some(Role::Client));
    assert!(store.get_account("+15550001").await.unwrap().is_none());

    // Nothing left to claim for that phone.
    assert!(store
        .claim_invited_client("901", "telegram", &own)
        .await
        .unwrap()
        .is_none());
}

// --- Habits ---

#[tokio::test]
async fn test_habit_crud_and_validation() {
    let store = test_store().await;
    let err = store
        .create_habit("TR12C", "Water", 0.0, "liters", Frequency::Daily)
        .await
        .unwrap_err();
    assert!(matches!(err, CoachlineError::Validation(_)));

    let habit = store
        .create_habit("TR12C", "Water", 3.0, "liters", Frequency::Daily)
        .await
        .unwrap();
    store.update_habit_field(&habit.id, "target", "2.5").await.unwrap();
    store
        .update_habit_field(&habit.id, "frequency", "weekly")
        .await
        .unwrap();
    let updated = store.get_habit(&habit.id).await.unwrap().unwrap();
    assert_eq!(updated.target, 2.5);
    assert_eq!(updated.frequency, Frequency::Weekly);

    assert!(store.update_habit_field(&habit.id, "target", "-1").await.is_err());
    assert!(store.update_habit_field(&habit.id, "owner", "x").await.is_err());

    assert!(store.delete_habit(&habit.id).await.unwrap());
    assert!(store.habits_of_trainer("TR12C").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_assign_is_idempotent() {
    let store = test_store().await;
    let habit = store
        .create_habit("TR12C", "Water", 3.0, "liters", Frequency::Daily)
        .await
        .unwrap();
    let a = store.assign_habit(&habit.id, "AB12C", "TR12C").await.unwrap();
    let b = store.assign_habit(&habit.id, "AB12C", "TR12C").await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(store.assigned_habits_from("TR12C", "AB12C").await.unwrap().len(), 1);

    assert!(store.unassign_habit(&habit.id, "AB12C").await.unwrap());
    assert!(!store.unassign_habit(&habit.id, "AB12C").await.unwrap());
}

#[tokio::test]
async fn test_logs_are_append_only() {
    let store = test_store().await;
    let at = Utc.with_ymd_and_hms(2026, 3, 12, 8, 0, 0).unwrap();
    let entry = store.append_log("h1", "AB12C", 1.0, at).await.unwrap();

    let result = sqlx::query("UPDATE habit_logs SET value = 5 WHERE id = ?")
        .bind(entry.id)
        .execute(store.pool())
        .await;
    assert!(result.is_err());

    let logs = store
        .logs_between("AB12C", "h1", at, at + chrono::Duration::days(1))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].value, 1.0);
    assert_eq!(logs[0].logged_at, at);
}

#[tokio::test]
async fn test_logs_between_is_half_open() {
    let store = test_store().await;
    let day = Utc.with_ymd_and_hms(2026, 3, 12, 0, 0, 0).unwrap();
    let next = day + chrono::Duration::days(1);
    store.append_log("h1", "AB12C", 1.0, day).await.unwrap();
    store
        .append_log("h1", "AB12C", 1.5, day + chrono::Duration::hours(20))
        .await
        .unwrap();
    store.append_log("h1", "AB12C", 9.0, next).await.unwrap();
    store.append_log("h2", "AB12C", 4.0, day).await.unwrap();

    let logs = store.logs_between("AB12C", "h1", day, next).await.unwrap();
    let total: f64 = logs.iter().map(|l| l.value).sum();
    assert_eq!(logs.len(), 2);
    assert_eq!(total, 2.5);
}

// --- Messages ---

#[tokio::test]
async fn test_recent_turns_oldest_first_per_role() {
    let store = test_store().await;
    for i in 0..12 {
        store
            .record_turn("1", Some(Role::Client), Speaker::User, &format!("msg {i}"))
            .await
            .unwrap();
    }
    store
        .record_turn("1", Some(Role::Trainer), Speaker::Assistant, "other role")
        .await
        .unwrap();

    let turns = store.recent_turns("1", Some(Role::Client), 10).await.unwrap();
    assert_eq!(turns.len(), 10);
    assert_eq!(turns[0].text, "msg 2");
    assert_eq!(turns[9].text, "msg 11");
    assert_eq!(turns[9].speaker, "user");
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let store = test_store().await;
    Store::run_migrations(store.pool()).await.unwrap();
    assert!(store.db_size().await.unwrap() > 0);
}
