//! Free-text intent fallback.
//!
//! The classifier runs without the address lock and under a timeout. Its
//! output is parsed into an [`Intent`] and applied after the lock is taken
//! again; any failure ends in the generic reply.

use super::{router::FallbackRequest, Gateway};
use crate::reply::Reply;
use coachline_core::{
    context::{Context, ContextEntry},
    error::CoachlineError,
    model::{Role, TaskRecord},
    sanitize,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

const MAX_CLASSIFIER_TOKENS: u32 = 256;

/// What the classifier decided.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Intent {
    StartTask { command: String, confidence: f64 },
    Conversation { reply: Option<String> },
}

#[derive(Deserialize)]
struct RawIntent {
    kind: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reply: Option<String>,
}

/// Parse classifier output. Tolerates code fences and prose around the JSON
/// object (first `{` to last `}`).
pub(crate) fn parse_classification(raw: &str) -> Option<Intent> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: RawIntent = serde_json::from_str(&raw[start..=end]).ok()?;
    match parsed.kind.trim().to_lowercase().as_str() {
        "task" => {
            let command = parsed.command?.trim().to_string();
            if command.is_empty() {
                return None;
            }
            Some(Intent::StartTask {
                command,
                confidence: parsed.confidence.unwrap_or(1.0),
            })
        }
        "conversation" => Some(Intent::Conversation {
            reply: parsed.reply.filter(|r| !r.trim().is_empty()),
        }),
        _ => None,
    }
}

pub(crate) fn classifier_prompt(role: Role, commands: &str, recent: &[TaskRecord]) -> String {
    let history = if recent.is_empty() {
        "none".to_string()
    } else {
        recent
            .iter()
            .map(|t| {
                format!(
                    "- {} ({})",
                    t.task_type,
                    t.completed_at.as_deref().unwrap_or(&t.started_at)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You route messages for a habit-coaching assistant. The user is logged in as a {role}.\n\n\
         Commands available to them:\n{commands}\n\n\
         Their most recently completed tasks:\n{history}\n\n\
         Decide whether the latest message asks to run one of the commands. \
         Answer with exactly one JSON object and nothing else:\n\
         {{\"kind\":\"task\",\"command\":\"/name\",\"confidence\":0.0-1.0}} to run a command, or\n\
         {{\"kind\":\"conversation\",\"reply\":\"short helpful answer\"}} otherwise. \
         Only name commands from the list. Never claim that anything was done."
    )
}

impl Gateway {
    /// Ask the classifier about a message that matched nothing else.
    pub(super) async fn classify(&self, req: &FallbackRequest) -> Result<Intent, CoachlineError> {
        if !self.intent_config.enabled {
            return Err(CoachlineError::Provider("intent fallback disabled".into()));
        }
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CoachlineError::Provider("no provider configured".into()))?;

        let role = req.actor.role;
        let recent = self
            .store
            .recent_completed_tasks(role, &req.actor.entity_id, self.intent_config.recent_tasks)
            .await?;
        let turns = self
            .store
            .recent_turns(
                &req.actor.address,
                Some(role),
                self.intent_config.recent_messages,
            )
            .await?;

        let clean = sanitize::sanitize(&req.text);
        if clean.was_modified {
            warn!(
                "sanitized fallback input from {}: {:?}",
                req.actor.address, clean.warnings
            );
        }

        let mut context = Context::new(
            &classifier_prompt(role, &self.registry.describe(role), &recent),
            &clean.text,
        );
        context.history = turns
            .into_iter()
            .map(|t| ContextEntry {
                role: t.speaker,
                content: t.text,
            })
            .collect();
        context.model = self.intent_config.model.clone();
        context.max_tokens = Some(MAX_CLASSIFIER_TOKENS);

        let response =
            match tokio::time::timeout(self.intent_config.timeout(), provider.complete(&context))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(CoachlineError::Timeout(format!(
                        "{} did not answer within {}s",
                        provider.name(),
                        self.intent_config.timeout_secs
                    )))
                }
            };

        debug!("classifier output: {}", response.text);
        parse_classification(&response.text).ok_or_else(|| {
            CoachlineError::Provider(format!("unparseable classifier output: {}", response.text))
        })
    }

    /// Apply a classification under the re-acquired lock. The login role and
    /// entity are checked again since they may have changed meanwhile.
    pub(super) async fn apply_intent(
        &self,
        req: FallbackRequest,
        intent: Result<Intent, CoachlineError>,
    ) -> Result<Reply, CoachlineError> {
        let actor = &req.actor;
        let unchanged = self
            .store
            .get_account(&actor.address)
            .await?
            .is_some_and(|a| {
                a.login_role == Some(actor.role)
                    && a.entity_id(actor.role) == Some(actor.entity_id.as_str())
            });
        if !unchanged {
            info!("login changed for {} during classification", actor.address);
            return Ok(Reply::text(
                "Your login changed while I was thinking. Please send that again.",
            ));
        }

        let reply = match intent {
            Ok(Intent::StartTask {
                command,
                confidence,
            }) if confidence >= self.intent_config.min_confidence => {
                match self.registry.find_by_name(actor.role, &command) {
                    Some(spec) => {
                        info!(
                            "intent {} ({confidence:.2}) for {} {}",
                            spec.name, actor.role, actor.entity_id
                        );
                        self.engine.start(actor, spec.task).await?
                    }
                    None => {
                        debug!("classifier named unknown command {command}");
                        self.generic_reply(actor.role)
                    }
                }
            }
            Ok(Intent::StartTask { confidence, .. }) => {
                debug!("task intent below threshold ({confidence:.2})");
                self.generic_reply(actor.role)
            }
            Ok(Intent::Conversation { reply: Some(text) }) => Reply::text(text),
            Ok(Intent::Conversation { reply: None }) => self.generic_reply(actor.role),
            Err(e) => {
                warn!("intent fallback failed for {}: {e}", actor.address);
                self.generic_reply(actor.role)
            }
        };
        Ok(reply.prefixed(&req.prefix))
    }

    /// "Ask me to do X" with the role's commands.
    pub(super) fn generic_reply(&self, role: Role) -> Reply {
        Reply::text(format!(
            "I'm not sure what you mean. Here's what I can do:\n{}",
            self.registry.describe(role)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_intent() {
        let intent =
            parse_classification(r#"{"kind":"task","command":"/log","confidence":0.92}"#).unwrap();
        assert_eq!(
            intent,
            Intent::StartTask {
                command: "/log".into(),
                confidence: 0.92
            }
        );
    }

    #[test]
    fn test_parse_tolerates_fences_and_prose() {
        let raw = "Sure!\n```json\n{\"kind\": \"task\", \"command\": \"log\"}\n```\nDone.";
        assert_eq!(
            parse_classification(raw),
            Some(Intent::StartTask {
                command: "log".into(),
                confidence: 1.0
            })
        );
    }

    #[test]
    fn test_parse_conversation() {
        assert_eq!(
            parse_classification(r#"{"kind":"conversation","reply":"Try /log."}"#),
            Some(Intent::Conversation {
                reply: Some("Try /log.".into())
            })
        );
        assert_eq!(
            parse_classification(r#"{"kind":"conversation","reply":"  "}"#),
            Some(Intent::Conversation { reply: None })
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_classification("no json here").is_none());
        assert!(parse_classification("} backwards {").is_none());
        assert!(parse_classification(r#"{"kind":"task"}"#).is_none());
        assert!(parse_classification(r#"{"kind":"dance"}"#).is_none());
        assert!(parse_classification(r#"{"command":"/log"}"#).is_none());
    }

    #[test]
    fn test_prompt_lists_commands_and_history() {
        let prompt = classifier_prompt(Role::Client, "/log - log progress", &[]);
        assert!(prompt.contains("logged in as a client"));
        assert!(prompt.contains("/log - log progress"));
        assert!(prompt.contains("none"));
    }
}
