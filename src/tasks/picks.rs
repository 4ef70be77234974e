//! Live option lists for pick fields.

use super::{forms::PickSource, Actor};
use coachline_core::{
    error::CoachlineError,
    model::{Entity, Habit, Role},
};
use coachline_store::Store;
use serde_json::{Map, Value};

/// One selectable option. `id` is what lands in the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PickOption {
    pub id: String,
    pub label: String,
}

impl PickOption {
    fn entity(e: &Entity) -> Self {
        Self {
            id: e.id.clone(),
            label: format!("{} ({})", e.name, e.id),
        }
    }

    fn habit(h: &Habit) -> Self {
        Self {
            id: h.id.clone(),
            label: format!(
                "{} ({} {} {})",
                h.name,
                super::effects::fmt_num(h.target),
                h.unit,
                h.frequency.as_str()
            ),
        }
    }

    fn name(&self) -> &str {
        self.label.split(" (").next().unwrap_or(&self.label)
    }
}

/// Options available to the actor right now.
pub async fn options(
    store: &Store,
    actor: &Actor,
    source: PickSource,
    answers: &Map<String, Value>,
) -> Result<Vec<PickOption>, CoachlineError> {
    let id = actor.entity_id.as_str();
    Ok(match source {
        PickSource::Clients => store
            .counterparts(Role::Trainer, id)
            .await?
            .iter()
            .map(PickOption::entity)
            .collect(),
        PickSource::Trainers => store
            .counterparts(Role::Client, id)
            .await?
            .iter()
            .map(PickOption::entity)
            .collect(),
        PickSource::OwnedHabits => store
            .habits_of_trainer(id)
            .await?
            .iter()
            .map(PickOption::habit)
            .collect(),
        PickSource::AssignedHabits => store
            .assigned_habits(id)
            .await?
            .iter()
            .map(PickOption::habit)
            .collect(),
        PickSource::ClientAssignments => {
            let client = answers.get("client").and_then(Value::as_str).unwrap_or("");
            store
                .assigned_habits_from(id, client)
                .await?
                .iter()
                .map(PickOption::habit)
                .collect()
        }
    })
}

/// What to say when a pick has nothing to offer.
pub fn empty_message(source: PickSource) -> &'static str {
    match source {
        PickSource::Clients => {
            "You have no connected clients yet. Use /invite-client or /create-client first."
        }
        PickSource::Trainers => "You have no connected trainers yet. Use /invite-trainer first.",
        PickSource::OwnedHabits => "You haven't created any habits yet. Use /create-habit first.",
        PickSource::AssignedHabits => "You have no habits assigned yet. Ask your trainer for one.",
        PickSource::ClientAssignments => "That client has no habits from you assigned.",
    }
}

/// Numbered option list under the field prompt.
pub fn render(prompt: &str, options: &[PickOption]) -> String {
    let mut out = prompt.to_string();
    for (i, option) in options.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, option.label));
    }
    out
}

/// Match an answer by number, id, exact name, or a name fragment that picks
/// out exactly one option.
pub fn resolve<'a>(options: &'a [PickOption], input: &str) -> Option<&'a PickOption> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| options.get(i));
    }
    let lowered = input.to_lowercase();
    if let Some(hit) = options
        .iter()
        .find(|o| o.id.eq_ignore_ascii_case(input) || o.name().to_lowercase() == lowered)
    {
        return Some(hit);
    }
    let mut partial = options
        .iter()
        .filter(|o| o.name().to_lowercase().contains(&lowered));
    match (partial.next(), partial.next()) {
        (Some(only), None) if !lowered.is_empty() => Some(only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Vec<PickOption> {
        vec![
            PickOption {
                id: "h-1".into(),
                label: "Water (3 liters daily)".into(),
            },
            PickOption {
                id: "h-2".into(),
                label: "Walking (8000 steps daily)".into(),
            },
            PickOption {
                id: "h-3".into(),
                label: "Wall sits (5 minutes daily)".into(),
            },
        ]
    }

    #[test]
    fn test_resolve_by_number_id_and_name() {
        let options = opts();
        assert_eq!(resolve(&options, "2").map(|o| o.id.as_str()), Some("h-2"));
        assert_eq!(resolve(&options, "H-3").map(|o| o.id.as_str()), Some("h-3"));
        assert_eq!(resolve(&options, "water").map(|o| o.id.as_str()), Some("h-1"));
        assert!(resolve(&options, "0").is_none());
        assert!(resolve(&options, "4").is_none());
    }

    #[test]
    fn test_resolve_fragment_must_be_unambiguous() {
        let options = opts();
        assert_eq!(resolve(&options, "walk").map(|o| o.id.as_str()), Some("h-2"));
        assert!(resolve(&options, "wa").is_none());
        assert!(resolve(&options, "yoga").is_none());
    }

    #[test]
    fn test_render_numbers_options() {
        let text = render("Which habit?", &opts()[..2]);
        assert_eq!(
            text,
            "Which habit?\n1. Water (3 liters daily)\n2. Walking (8000 steps daily)"
        );
    }
}
