//! Task lifecycle engine.
//!
//! A task collects the fields of its form one message at a time, keeping the
//! answers in its payload, and runs its terminal effect once the form is
//! complete. The store guarantees at most one running task per (role, entity);
//! the engine never replaces a running task, it resumes or reports it.

mod effects;
pub mod forms;
pub mod picks;
pub mod types;


use crate::reply::Reply;
use coachline_core::{
    error::CoachlineError,
    model::{Role, TaskRecord, TaskStatus},
    traits::Exporter,
};
use coachline_store::Store;
use effects::Outcome;
use forms::{FieldKind, FieldSpec, FormSource};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::TaskType;

/// Shown when a terminal step fails for reasons the user can't fix.
const FAILED_MESSAGE: &str = "Sorry, that action did not complete. Please try again later.";

/// Who is acting: the logged-in role and entity behind a channel address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub entity_id: String,
    pub address: String,
    pub channel: String,
}

/// Question for the next unanswered field.
enum Step {
    Ask(String),
    /// A pick field with nothing to choose from.
    Nothing(&'static str),
}

pub struct TaskEngine {
    store: Store,
    forms: Arc<dyn FormSource>,
    exporter: Arc<dyn Exporter>,
    offset: chrono::FixedOffset,
}

fn label_of(task_type: &str) -> String {
    TaskType::parse(task_type)
        .map(|t| t.label().to_string())
        .unwrap_or_else(|| task_type.replace('_', " "))
}

impl TaskEngine {
    pub fn new(
        store: Store,
        forms: Arc<dyn FormSource>,
        exporter: Arc<dyn Exporter>,
        offset: chrono::FixedOffset,
    ) -> Self {
        Self {
            store,
            forms,
            exporter,
            offset,
        }
    }

    pub fn forms(&self) -> &dyn FormSource {
        self.forms.as_ref()
    }

    fn fields(&self, role: Role, task: TaskType) -> Result<&'static [FieldSpec], CoachlineError> {
        self.forms.task_fields(role, task).ok_or_else(|| {
            CoachlineError::Config(format!("no form for {role} task {}", task.as_str()))
        })
    }

    /// Start a task, or resume/report the one already running.
    pub async fn start(&self, actor: &Actor, task: TaskType) -> Result<Reply, CoachlineError> {
        if let Some(running) = self
            .store
            .running_task(actor.role, &actor.entity_id)
            .await?
        {
            return self.resume(actor, &running, task).await;
        }

        let fields = self.fields(actor.role, task)?;
        if fields.is_empty() {
            return self.run_immediately(actor, task).await;
        }

        let record = match self
            .store
            .insert_task(
                actor.role,
                &actor.entity_id,
                task.as_str(),
                TaskStatus::Running,
                &Map::new(),
            )
            .await
        {
            Ok(record) => record,
            Err(CoachlineError::Conflict(_)) => {
                let running = self
                    .store
                    .running_task(actor.role, &actor.entity_id)
                    .await?
                    .ok_or_else(|| {
                        CoachlineError::Store("running task vanished after conflict".into())
                    })?;
                return self.resume(actor, &running, task).await;
            }
            Err(e) => return Err(e),
        };
        info!(
            "{} {} started {} ({})",
            actor.role, actor.entity_id, task, record.id
        );
        self.ask_next(actor, &record.id, task, fields, Map::new(), None)
            .await
    }

    /// Re-prompt the current step of a running task.
    async fn resume(
        &self,
        actor: &Actor,
        running: &TaskRecord,
        requested: TaskType,
    ) -> Result<Reply, CoachlineError> {
        let current = TaskType::parse(&running.task_type).ok_or_else(|| {
            CoachlineError::Store(format!("unknown task type '{}'", running.task_type))
        })?;
        let prefix = if current == requested {
            format!("Resuming {}.", current.label())
        } else {
            format!(
                "You already have {} in progress. Finish it first, or send /stop to cancel it.",
                current.label()
            )
        };
        let fields = self.fields(actor.role, current)?;
        self.ask_next(
            actor,
            &running.id,
            current,
            fields,
            running.payload.clone(),
            Some(prefix),
        )
        .await
    }

    /// Field-less tasks: run the effect and record the result in one write.
    async fn run_immediately(&self, actor: &Actor, task: TaskType) -> Result<Reply, CoachlineError> {
        let mut payload = Map::new();
        let (status, reply) = match self.run_effect(actor, task, &payload).await {
            Ok(Outcome::Done(reply)) => (TaskStatus::Completed, reply),
            Ok(Outcome::Retry { message, .. }) => {
                payload.insert("outcome".into(), Value::String(message.clone()));
                (TaskStatus::Completed, Reply::text(message))
            }
            Err(e) => match e.user_message() {
                Some(message) => {
                    payload.insert("outcome".into(), Value::String(message.to_string()));
                    (TaskStatus::Completed, Reply::text(message))
                }
                None => {
                    warn!("{task} failed for {} {}: {e}", actor.role, actor.entity_id);
                    payload.insert("error".into(), Value::String(e.to_string()));
                    (TaskStatus::Failed, Reply::text(FAILED_MESSAGE))
                }
            },
        };
        if let Err(e) = self
            .store
            .insert_task(actor.role, &actor.entity_id, task.as_str(), status, &payload)
            .await
        {
            error!("{task} ran for {} {} but was not recorded: {e}", actor.role, actor.entity_id);
        }
        Ok(reply)
    }

    /// Feed a message to the running task, if the most recent task is running.
    /// `None` means there is nothing to continue.
    pub async fn continue_running(
        &self,
        actor: &Actor,
        text: &str,
    ) -> Result<Option<Reply>, CoachlineError> {
        let Some(task) = self
            .store
            .latest_task(actor.role, &actor.entity_id)
            .await?
        else {
            return Ok(None);
        };
        if task.status != TaskStatus::Running {
            return Ok(None);
        }

        let task_type = TaskType::parse(&task.task_type).ok_or_else(|| {
            CoachlineError::Store(format!("unknown task type '{}'", task.task_type))
        })?;
        let fields = self.fields(actor.role, task_type)?;
        let mut answers = task.payload.clone();

        let Some(field) = forms::next_field(fields, &answers) else {
            return self
                .complete(actor, &task.id, task_type, fields, answers)
                .await
                .map(Some);
        };

        let value = match self.accept_answer(actor, field, text, &answers).await? {
            Ok(value) => value,
            Err(message) => {
                debug!("{} rejected for {}: {message}", field.key, task.id);
                return self
                    .ask_next(actor, &task.id, task_type, fields, answers, Some(message))
                    .await
                    .map(Some);
            }
        };
        answers.insert(field.key.to_string(), Value::String(value));

        if forms::next_field(fields, &answers).is_some() {
            if !self.store.update_task_payload(&task.id, &answers).await? {
                return Ok(Some(Reply::text(
                    "That task is no longer running. Send a command to start again.",
                )));
            }
            return self
                .ask_next(actor, &task.id, task_type, fields, answers, None)
                .await
                .map(Some);
        }

        self.complete(actor, &task.id, task_type, fields, answers)
            .await
            .map(Some)
    }

    /// Stop the running task of the actor.
    pub async fn stop(&self, actor: &Actor) -> Result<Reply, CoachlineError> {
        match self
            .store
            .stop_running_task(actor.role, &actor.entity_id)
            .await?
        {
            Some(task) => {
                info!("{} {} stopped {}", actor.role, actor.entity_id, task.id);
                Ok(Reply::text(format!(
                    "Stopped {}. Nothing was saved.",
                    label_of(&task.task_type)
                )))
            }
            None => Ok(Reply::text("There's no task in progress to stop.")),
        }
    }

    /// Validate one answer. `Ok(Err(message))` is a retry-in-place.
    async fn accept_answer(
        &self,
        actor: &Actor,
        field: &FieldSpec,
        text: &str,
        answers: &Map<String, Value>,
    ) -> Result<Result<String, String>, CoachlineError> {
        let FieldKind::Pick(source) = field.kind else {
            return Ok(forms::validate(field.kind, text, answers));
        };
        let options = picks::options(&self.store, actor, source, answers).await?;
        Ok(match picks::resolve(&options, text) {
            Some(option) => Ok(option.id.clone()),
            None => Err("Please pick one of the options by number or name.".to_string()),
        })
    }

    async fn step(
        &self,
        actor: &Actor,
        field: &FieldSpec,
        answers: &Map<String, Value>,
    ) -> Result<Step, CoachlineError> {
        let FieldKind::Pick(source) = field.kind else {
            return Ok(Step::Ask(forms::prompt(field)));
        };
        let options = picks::options(&self.store, actor, source, answers).await?;
        if options.is_empty() {
            return Ok(Step::Nothing(picks::empty_message(source)));
        }
        Ok(Step::Ask(picks::render(field.prompt, &options)))
    }

    /// Prompt the next unanswered field, or finish the task when none is left.
    async fn ask_next(
        &self,
        actor: &Actor,
        task_id: &str,
        task_type: TaskType,
        fields: &'static [FieldSpec],
        answers: Map<String, Value>,
        prefix: Option<String>,
    ) -> Result<Reply, CoachlineError> {
        match forms::next_field(fields, &answers) {
            Some(field) => {
                self.prompt_field(actor, task_id, field, answers, prefix)
                    .await
            }
            None => {
                self.complete(actor, task_id, task_type, fields, answers)
                    .await
            }
        }
    }

    async fn prompt_field(
        &self,
        actor: &Actor,
        task_id: &str,
        field: &FieldSpec,
        mut answers: Map<String, Value>,
        prefix: Option<String>,
    ) -> Result<Reply, CoachlineError> {
        let reply = match self.step(actor, field, &answers).await? {
            Step::Ask(question) => Reply::text(question),
            Step::Nothing(message) => {
                answers.insert("outcome".into(), Value::String(message.to_string()));
                self.finish(task_id, TaskStatus::Completed, &answers).await?;
                Reply::text(message)
            }
        };
        Ok(reply.prefixed(prefix.as_deref().unwrap_or("")))
    }

    /// Run the terminal effect of a complete form and settle the task.
    async fn complete(
        &self,
        actor: &Actor,
        task_id: &str,
        task_type: TaskType,
        fields: &'static [FieldSpec],
        mut answers: Map<String, Value>,
    ) -> Result<Reply, CoachlineError> {
        match self.run_effect(actor, task_type, &answers).await {
            Ok(Outcome::Done(reply)) => {
                self.settle_committed(task_id, task_type, &answers).await;
                Ok(reply)
            }
            Ok(Outcome::Retry { field, message }) => {
                answers.remove(field);
                if !self.store.update_task_payload(task_id, &answers).await? {
                    return Ok(Reply::text(message));
                }
                let next = forms::next_field(fields, &answers).ok_or_else(|| {
                    CoachlineError::Store(format!("retry of '{field}' left nothing to ask"))
                })?;
                self.prompt_field(actor, task_id, next, answers, Some(message))
                    .await
            }
            Err(e) => match e.user_message() {
                Some(message) => {
                    let message = message.to_string();
                    answers.insert("outcome".into(), Value::String(message.clone()));
                    self.finish(task_id, TaskStatus::Completed, &answers).await?;
                    Ok(Reply::text(message))
                }
                None => {
                    warn!("task {task_id} ({task_type}) failed: {e}");
                    answers.insert("error".into(), Value::String(e.to_string()));
                    self.finish(task_id, TaskStatus::Failed, &answers).await?;
                    Ok(Reply::text(FAILED_MESSAGE))
                }
            },
        }
    }

    /// Close a task whose effect already committed. The task must not stay
    /// running, or the next message would run the effect again; when it
    /// can't be marked completed it is stopped instead.
    async fn settle_committed(&self, task_id: &str, task_type: TaskType, answers: &Map<String, Value>) {
        match self.finish(task_id, TaskStatus::Completed, answers).await {
            Ok(()) => info!("task {task_id} ({task_type}) completed"),
            Err(e) => {
                error!("task {task_id} ({task_type}) committed but could not be completed: {e}");
                if let Err(e) = self.finish(task_id, TaskStatus::Stopped, answers).await {
                    error!("task {task_id} ({task_type}) left running after its effect: {e}");
                }
            }
        }
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        answers: &Map<String, Value>,
    ) -> Result<(), CoachlineError> {
        if !self.store.finish_task(task_id, status, answers).await? {
            debug!("task {task_id} was no longer running when it finished as {status}");
        }
        Ok(())
    }
}
