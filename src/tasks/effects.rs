//! Terminal side effects of every task type, run once all fields are
//! answered (or immediately for field-less views and reports).

use super::{forms::answer, types::TaskType, Actor, TaskEngine};
use crate::{
    handshake,
    reply::{Notice, Reply},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use coachline_core::{
    error::CoachlineError,
    model::{EdgeStatus, Frequency, Habit, Role},
    progress::{self, DayProgress, PeriodReport},
};
use serde_json::{Map, Value};

/// Result of a terminal step.
#[derive(Debug)]
pub(crate) enum Outcome {
    Done(Reply),
    /// The answer to `field` no longer works; clear it and ask again.
    Retry {
        field: &'static str,
        message: String,
    },
}

/// Headers of the exported monthly report.
pub const REPORT_HEADERS: [&str; 7] = [
    "date",
    "habit",
    "unit",
    "completed",
    "target",
    "due",
    "percentage",
];

/// Short number formatting: `3`, `2.5`, `0.33`.
pub fn fmt_num(n: f64) -> String {
    let s = format!("{n:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".into()
    } else {
        s.to_string()
    }
}

fn required<'a>(answers: &'a Map<String, Value>, key: &str) -> Result<&'a str, CoachlineError> {
    answer(answers, key)
        .ok_or_else(|| CoachlineError::Store(format!("task payload is missing '{key}'")))
}

fn number(answers: &Map<String, Value>, key: &str) -> Result<f64, CoachlineError> {
    let raw = required(answers, key)?;
    raw.parse()
        .map_err(|_| CoachlineError::Store(format!("task payload '{key}' is not a number: {raw}")))
}

/// Turn a not-found into a re-prompt of `field`.
fn retry_on_missing(
    result: Result<Reply, CoachlineError>,
    field: &'static str,
) -> Result<Outcome, CoachlineError> {
    match result {
        Ok(reply) => Ok(Outcome::Done(reply)),
        Err(CoachlineError::NotFound(message)) => Ok(Outcome::Retry { field, message }),
        Err(e) => Err(e),
    }
}

fn done(text: impl Into<String>) -> Result<Outcome, CoachlineError> {
    Ok(Outcome::Done(Reply::text(text)))
}

impl TaskEngine {
    pub(crate) async fn run_effect(
        &self,
        actor: &Actor,
        task: TaskType,
        answers: &Map<String, Value>,
    ) -> Result<Outcome, CoachlineError> {
        let me = actor.entity_id.as_str();
        match task {
            TaskType::ViewProfile => self.view_profile(actor).await,
            TaskType::EditProfile => {
                let field = required(answers, "field")?;
                let value = required(answers, "value")?;
                self.store
                    .update_entity_field(actor.role, me, field, value)
                    .await?;
                done(format!("Updated your {field} to {value}."))
            }
            TaskType::DeleteProfile => self.delete_profile(actor, answers).await,
            TaskType::ViewHabits => self.view_habits(actor).await,

            TaskType::InviteClient => retry_on_missing(
                handshake::invite(&self.store, Role::Trainer, me, required(answers, "client_id")?)
                    .await,
                "client_id",
            ),
            TaskType::CreateClient => {
                let today = progress::local_date(Utc::now(), self.offset);
                let reply = handshake::create_and_invite(
                    &self.store,
                    me,
                    &actor.channel,
                    required(answers, "name")?,
                    required(answers, "phone")?,
                    today,
                )
                .await?;
                Ok(Outcome::Done(reply))
            }
            TaskType::ViewClients => self.view_connections(actor).await,
            TaskType::RemoveClient => retry_on_missing(
                handshake::remove(&self.store, Role::Trainer, me, required(answers, "client")?)
                    .await,
                "client",
            ),

            TaskType::CreateHabit => {
                let name = required(answers, "name")?;
                let unit = required(answers, "unit")?;
                let frequency = Frequency::parse(required(answers, "frequency")?)
                    .ok_or_else(|| CoachlineError::Store("bad frequency in payload".into()))?;
                let habit = self
                    .store
                    .create_habit(me, name, number(answers, "target")?, unit, frequency)
                    .await?;
                done(format!(
                    "Created habit {}: {} {} {}. Assign it with /assign-habit.",
                    habit.name,
                    fmt_num(habit.target),
                    habit.unit,
                    habit.frequency.as_str()
                ))
            }
            TaskType::EditHabit => {
                let habit = match self.owned_habit(me, required(answers, "habit")?).await {
                    Ok(habit) => habit,
                    Err(CoachlineError::NotFound(message)) => {
                        return Ok(Outcome::Retry {
                            field: "habit",
                            message,
                        })
                    }
                    Err(e) => return Err(e),
                };
                let field = required(answers, "field")?;
                let value = required(answers, "value")?;
                self.store.update_habit_field(&habit.id, field, value).await?;
                done(format!("Updated the {field} of {} to {value}.", habit.name))
            }
            TaskType::DeleteHabit => {
                if required(answers, "confirm")? != "yes" {
                    return done("Okay, the habit stays.");
                }
                let habit = self.owned_habit(me, required(answers, "habit")?).await?;
                self.store.delete_habit(&habit.id).await?;
                done(format!("Deleted habit {}.", habit.name))
            }
            TaskType::AssignHabit => self.assign_habit(actor, answers).await,
            TaskType::UnassignHabit => self.unassign_habit(actor, answers).await,
            TaskType::ClientProgress => {
                let client_id = required(answers, "client")?;
                if !self.store.clients_of(me).await?.iter().any(|c| c == client_id) {
                    return Ok(Outcome::Retry {
                        field: "client",
                        message: "That client is no longer connected with you.".into(),
                    });
                }
                let habits = self.store.assigned_habits_from(me, client_id).await?;
                let name = self
                    .store
                    .get_entity(Role::Client, client_id)
                    .await?
                    .map(|e| e.name)
                    .unwrap_or_else(|| client_id.to_string());
                let today = progress::local_date(Utc::now(), self.offset);
                let reports = self
                    .reports(client_id, &habits, today - Duration::days(6), today)
                    .await?;
                done(format!(
                    "{name}, last 7 days:\n{}",
                    summarize(&habits, &reports, "No habits from you are assigned to this client.")
                ))
            }

            TaskType::InviteTrainer => retry_on_missing(
                handshake::invite(&self.store, Role::Client, me, required(answers, "trainer_id")?)
                    .await,
                "trainer_id",
            ),
            TaskType::ViewTrainers => self.view_connections(actor).await,
            TaskType::RemoveTrainer => retry_on_missing(
                handshake::remove(&self.store, Role::Client, me, required(answers, "trainer")?)
                    .await,
                "trainer",
            ),
            TaskType::LogHabit => self.log_habit(actor, answers).await,
            TaskType::ViewProgress => self.view_progress(actor).await,
            TaskType::WeeklyReport => {
                let habits = self.store.assigned_habits(me).await?;
                let today = progress::local_date(Utc::now(), self.offset);
                let reports = self
                    .reports(me, &habits, today - Duration::days(6), today)
                    .await?;
                done(format!(
                    "Your last 7 days:\n{}",
                    summarize(&habits, &reports, "You have no habits assigned yet.")
                ))
            }
            TaskType::MonthlyReport => self.monthly_report(actor).await,
        }
    }

    async fn view_profile(&self, actor: &Actor) -> Result<Outcome, CoachlineError> {
        let entity = self
            .store
            .get_entity(actor.role, &actor.entity_id)
            .await?
            .ok_or_else(|| CoachlineError::NotFound("Your profile no longer exists.".into()))?;
        let (extra, label) = match actor.role {
            Role::Trainer => ("specialty", "Specialty"),
            Role::Client => ("goal", "Goal"),
        };
        done(format!(
            "Your {} profile\nID: {}\nName: {}\nPhone: {}\n{label}: {}",
            actor.role,
            entity.id,
            entity.name,
            entity.phone.as_deref().unwrap_or("-"),
            entity.field(extra).unwrap_or_else(|| "-".into())
        ))
    }

    async fn delete_profile(
        &self,
        actor: &Actor,
        answers: &Map<String, Value>,
    ) -> Result<Outcome, CoachlineError> {
        if required(answers, "confirm")? != "yes" {
            return done("Okay, your profile stays.");
        }
        let me = self
            .store
            .get_entity(actor.role, &actor.entity_id)
            .await?
            .ok_or_else(|| CoachlineError::NotFound("Your profile no longer exists.".into()))?;
        let others = self.store.counterparts(actor.role, &me.id).await?;

        self.store.delete_entity(actor.role, &me.id).await?;

        let mut reply = Reply::text(format!(
            "Your {} profile was deleted. Send /register to create a new one.",
            actor.role
        ));
        for other in others {
            reply = reply.notify(Notice::new(
                other.role,
                &other.id,
                format!(
                    "{} ({}) deleted their profile, so your connection ended.",
                    me.name, me.id
                ),
            ));
        }
        Ok(Outcome::Done(reply))
    }

    async fn view_habits(&self, actor: &Actor) -> Result<Outcome, CoachlineError> {
        let (habits, empty) = match actor.role {
            Role::Trainer => (
                self.store.habits_of_trainer(&actor.entity_id).await?,
                "You haven't created any habits yet. Try /create-habit.",
            ),
            Role::Client => (
                self.store.assigned_habits(&actor.entity_id).await?,
                "You have no habits assigned yet.",
            ),
        };
        if habits.is_empty() {
            return done(empty);
        }
        let lines: Vec<String> = habits
            .iter()
            .map(|h| {
                format!(
                    "- {}: {} {} {}",
                    h.name,
                    fmt_num(h.target),
                    h.unit,
                    h.frequency.as_str()
                )
            })
            .collect();
        done(format!("Your habits:\n{}", lines.join("\n")))
    }

    /// Connected counterparts plus open invitations either way.
    async fn view_connections(&self, actor: &Actor) -> Result<Outcome, CoachlineError> {
        let other = actor.role.opposite();
        let connected = self.store.counterparts(actor.role, &actor.entity_id).await?;
        let mut text = if connected.is_empty() {
            format!("You have no connected {other}s yet.")
        } else {
            let lines: Vec<String> = connected
                .iter()
                .map(|e| format!("- {} ({})", e.name, e.id))
                .collect();
            format!("Your {other}s:\n{}", lines.join("\n"))
        };

        let mut pending = Vec::new();
        for edge in self.store.open_edges_for(actor.role, &actor.entity_id).await? {
            if edge.status != EdgeStatus::Pending {
                continue;
            }
            let other_id = edge.side(other);
            let name = self
                .store
                .get_entity(other, other_id)
                .await?
                .map(|e| e.name)
                .unwrap_or_else(|| other_id.to_string());
            let direction = if edge.invited_by == actor.role {
                "waiting for their answer"
            } else {
                "waiting for yours"
            };
            pending.push(format!("- {name} ({other_id}), {direction}"));
        }
        if !pending.is_empty() {
            text.push_str(&format!("\n\nPending invitations:\n{}", pending.join("\n")));
        }
        done(text)
    }

    async fn owned_habit(&self, trainer_id: &str, habit_id: &str) -> Result<Habit, CoachlineError> {
        match self.store.get_habit(habit_id).await? {
            Some(habit) if habit.trainer_id == trainer_id => Ok(habit),
            _ => Err(CoachlineError::NotFound(
                "That habit no longer exists.".into(),
            )),
        }
    }

    async fn assign_habit(
        &self,
        actor: &Actor,
        answers: &Map<String, Value>,
    ) -> Result<Outcome, CoachlineError> {
        let me = actor.entity_id.as_str();
        let client_id = required(answers, "client")?;
        if !self.store.clients_of(me).await?.iter().any(|c| c == client_id) {
            return Ok(Outcome::Retry {
                field: "client",
                message: "That client is no longer connected with you.".into(),
            });
        }
        let habit = match self.owned_habit(me, required(answers, "habit")?).await {
            Ok(h) => h,
            Err(CoachlineError::NotFound(message)) => {
                return Ok(Outcome::Retry {
                    field: "habit",
                    message,
                })
            }
            Err(e) => return Err(e),
        };

        self.store.assign_habit(&habit.id, client_id, me).await?;

        let trainer_name = self
            .store
            .get_entity(Role::Trainer, me)
            .await?
            .map(|e| e.name)
            .unwrap_or_else(|| me.to_string());
        Ok(Outcome::Done(
            Reply::text(format!("Assigned {} to {client_id}.", habit.name)).notify(Notice::new(
                Role::Client,
                client_id,
                format!(
                    "{trainer_name} assigned you a habit: {} ({} {} {}). Log it with /log.",
                    habit.name,
                    fmt_num(habit.target),
                    habit.unit,
                    habit.frequency.as_str()
                ),
            )),
        ))
    }

    async fn unassign_habit(
        &self,
        actor: &Actor,
        answers: &Map<String, Value>,
    ) -> Result<Outcome, CoachlineError> {
        let me = actor.entity_id.as_str();
        let client_id = required(answers, "client")?;
        let habit = self.owned_habit(me, required(answers, "habit")?).await?;
        if !self.store.unassign_habit(&habit.id, client_id).await? {
            return Ok(Outcome::Retry {
                field: "habit",
                message: format!("{} isn't assigned to that client.", habit.name),
            });
        }
        Ok(Outcome::Done(
            Reply::text(format!("Removed {} from {client_id}.", habit.name)).notify(
                Notice::new(
                    Role::Client,
                    client_id,
                    format!("Your trainer removed the habit {} from your list.", habit.name),
                ),
            ),
        ))
    }

    async fn log_habit(
        &self,
        actor: &Actor,
        answers: &Map<String, Value>,
    ) -> Result<Outcome, CoachlineError> {
        let me = actor.entity_id.as_str();
        let habit_id = required(answers, "habit")?;
        let Some(habit) = self
            .store
            .assigned_habits(me)
            .await?
            .into_iter()
            .find(|h| h.id == habit_id)
        else {
            return Ok(Outcome::Retry {
                field: "habit",
                message: "That habit is no longer assigned to you.".into(),
            });
        };
        let value = number(answers, "value")?;

        let now = Utc::now();
        self.store.append_log(&habit.id, me, value, now).await?;

        let today = progress::local_date(now, self.offset);
        let day = self.progress_for(me, &habit, today).await?;
        done(format!(
            "Logged {} {} of {}.\n{}",
            fmt_num(value),
            habit.unit,
            habit.name,
            progress_line(&habit, &day)
        ))
    }

    async fn view_progress(&self, actor: &Actor) -> Result<Outcome, CoachlineError> {
        let habits = self.store.assigned_habits(&actor.entity_id).await?;
        if habits.is_empty() {
            return done("You have no habits assigned yet.");
        }
        let today = progress::local_date(Utc::now(), self.offset);
        let mut lines = Vec::with_capacity(habits.len());
        for habit in &habits {
            let day = self.progress_for(&actor.entity_id, habit, today).await?;
            lines.push(format!("{}: {}", habit.name, progress_line(habit, &day)));
        }
        done(format!("Your progress:\n{}", lines.join("\n")))
    }

    async fn monthly_report(&self, actor: &Actor) -> Result<Outcome, CoachlineError> {
        let me = actor.entity_id.as_str();
        let habits = self.store.assigned_habits(me).await?;
        if habits.is_empty() {
            return done("You have no habits assigned yet.");
        }
        let today = progress::local_date(Utc::now(), self.offset);
        let from = today - Duration::days(29);
        let reports = self.reports(me, &habits, from, today).await?;

        let mut rows = Vec::new();
        for (habit, report) in habits.iter().zip(&reports) {
            for row in &report.rows {
                rows.push(vec![
                    row.date.to_string(),
                    habit.name.clone(),
                    habit.unit.clone(),
                    fmt_num(row.completed),
                    fmt_num(habit.target),
                    fmt_num(row.due),
                    format!("{:.1}", row.percentage),
                ]);
            }
        }
        let artifact = self
            .exporter
            .export(&format!("monthly-{me}-{today}"), &REPORT_HEADERS, &rows)
            .await?;

        done(format!(
            "Your last 30 days:\n{}\n\nFull report: {artifact}",
            summarize(&habits, &reports, "")
        ))
    }

    async fn progress_for(
        &self,
        client_id: &str,
        habit: &Habit,
        date: NaiveDate,
    ) -> Result<DayProgress, CoachlineError> {
        let from = date - Duration::days(6);
        let entries = self
            .store
            .logs_between(
                client_id,
                &habit.id,
                self.day_start(from)?,
                self.day_start(date + Duration::days(1))?,
            )
            .await?;
        progress::progress_on(habit, client_id, &entries, date, self.offset)
            .map_err(|e| CoachlineError::Config(e.to_string()))
    }

    async fn reports(
        &self,
        client_id: &str,
        habits: &[Habit],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PeriodReport>, CoachlineError> {
        let mut out = Vec::with_capacity(habits.len());
        for habit in habits {
            let entries = self
                .store
                .logs_between(
                    client_id,
                    &habit.id,
                    self.day_start(from)?,
                    self.day_start(to + Duration::days(1))?,
                )
                .await?;
            out.push(
                progress::report(habit, client_id, &entries, from, to, self.offset)
                    .map_err(|e| CoachlineError::Config(e.to_string()))?,
            );
        }
        Ok(out)
    }

    /// UTC instant where a local calendar day starts.
    fn day_start(&self, date: NaiveDate) -> Result<DateTime<Utc>, CoachlineError> {
        self.offset
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| CoachlineError::Config(format!("no local midnight on {date}")))
    }
}

fn progress_line(habit: &Habit, day: &DayProgress) -> String {
    let period = match habit.frequency {
        Frequency::Daily => "Today",
        Frequency::Weekly => "This week",
    };
    let tail = if day.due > 0.0 {
        format!("{} to go", fmt_num(day.due))
    } else if day.due == 0.0 {
        "target reached".to_string()
    } else {
        format!("{} over target", fmt_num(-day.due))
    };
    format!(
        "{period}: {} / {} {} ({:.1}%), {tail}.",
        fmt_num(day.completed),
        fmt_num(habit.target),
        habit.unit,
        day.percentage
    )
}

fn summarize(habits: &[Habit], reports: &[PeriodReport], empty: &str) -> String {
    if habits.is_empty() {
        return empty.to_string();
    }
    habits
        .iter()
        .zip(reports)
        .map(|(habit, r)| {
            format!(
                "- {}: average {:.1}%, logged {} of {} {}, target met {} time(s)",
                habit.name,
                r.mean_percentage,
                r.logged_days,
                r.rows.len(),
                match habit.frequency {
                    Frequency::Daily => "days",
                    Frequency::Weekly => "weeks",
                },
                r.completed_days
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
