//! Deterministic routing of one event, in a fixed order: buttons, guests,
//! universal commands, registration answers, login resolution, role
//! commands, the running task. Whatever is left goes to the intent fallback.

use super::{registration::role_from_vocabulary, registration::Session, Gateway};
use crate::{
    buttons::{login_buttons, register_buttons, ButtonToken},
    commands::{UniversalCommand, GUEST_HELP, WELCOME},
    handshake,
    reply::Reply,
    tasks::{
        forms::{answer, next_field, prompt, validate},
        Actor,
    },
};
use chrono::Utc;
use coachline_core::{
    error::CoachlineError,
    message::IncomingMessage,
    model::{Account, Role},
    progress,
};
use coachline_store::NewEntity;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// A message that needs the classifier. Carries everything needed to finish
/// routing after the lock was released and taken again.
#[derive(Debug, Clone)]
pub(crate) struct FallbackRequest {
    pub actor: Actor,
    pub text: String,
    /// Auto-login note to put in front of the eventual reply.
    pub prefix: String,
}

pub(crate) enum Routed {
    Done {
        reply: Reply,
        route: &'static str,
        role: Option<Role>,
    },
    Fallback(FallbackRequest),
}

fn done(reply: Reply, route: &'static str, role: Option<Role>) -> Routed {
    Routed::Done { reply, route, role }
}

/// Turn a user-facing error into reply text; anything else propagates.
fn soften(result: Result<Reply, CoachlineError>) -> Result<Reply, CoachlineError> {
    match result {
        Err(e) if e.is_user_facing() => Ok(Reply::text(e.user_message().unwrap_or_default())),
        other => other,
    }
}

fn counterpart_noun(role: Role) -> &'static str {
    match role {
        Role::Trainer => "clients",
        Role::Client => "trainer",
    }
}

impl Gateway {
    pub(super) async fn route(&self, incoming: &IncomingMessage) -> Result<Routed, CoachlineError> {
        let address = incoming.address();
        let account = self.store.get_account(address).await?;

        if let Some(token) = incoming.button.as_deref() {
            let role = account.as_ref().and_then(|a| a.login_role);
            let reply = self.route_button(incoming, account.as_ref(), token).await?;
            return Ok(done(reply, "button", role));
        }

        let text = incoming.text.trim();
        let Some(account) = account.filter(|a| !a.linked_roles().is_empty()) else {
            let reply = self.route_guest(incoming, text).await?;
            return Ok(done(reply, "guest", None));
        };

        if let Some(cmd) = UniversalCommand::parse(text) {
            let reply = self.universal(cmd, incoming, &account).await?;
            return Ok(done(reply, "universal", account.login_role));
        }

        let login = account
            .login_role
            .filter(|r| account.entity_id(*r).is_some());

        if login.is_none() {
            if let Some(session) = self.registrations.get(address) {
                let reply = self.answer_registration(incoming, session, text).await?;
                return Ok(done(reply, "registration", None));
            }
        }

        let (role, prefix) = match login {
            Some(role) => (role, String::new()),
            None => match account.linked_roles().as_slice() {
                [only] => {
                    self.store.set_login_role(address, Some(*only)).await?;
                    info!("auto-login {address} as {only}");
                    (*only, format!("Logged in as {only}."))
                }
                _ => {
                    let reply = Reply::text(
                        "You have both a trainer and a client profile. Which one do you want to use?",
                    )
                    .with_buttons(login_buttons());
                    return Ok(done(reply, "disambiguation", None));
                }
            },
        };

        let actor = self.actor(&account, role, &incoming.channel)?;
        if self
            .store
            .get_entity(role, &actor.entity_id)
            .await?
            .is_none()
        {
            warn!("{address} linked to missing {role} {}", actor.entity_id);
            self.store.unlink_entity(address, role).await?;
            let reply = Reply::text(format!(
                "Your {role} profile no longer exists. Send /register to create a new one."
            ));
            return Ok(done(reply, "stale-link", None));
        }

        if let Some(spec) = self.registry.lookup(role, text) {
            debug!("{} -> {}", spec.name, spec.task);
            let reply = self.engine.start(&actor, spec.task).await?;
            return Ok(done(reply.prefixed(&prefix), "command", Some(role)));
        }

        if let Some(reply) = self.engine.continue_running(&actor, text).await? {
            return Ok(done(reply.prefixed(&prefix), "task", Some(role)));
        }

        if text.starts_with('/') {
            let reply = Reply::text(format!(
                "I don't know that command. Here's what I can do:\n{}",
                self.registry.describe(role)
            ));
            return Ok(done(reply.prefixed(&prefix), "unknown-command", Some(role)));
        }

        if text.is_empty() {
            let reply = self.generic_reply(role);
            return Ok(done(reply.prefixed(&prefix), "empty", Some(role)));
        }

        Ok(Routed::Fallback(FallbackRequest {
            actor,
            text: text.to_string(),
            prefix,
        }))
    }

    fn actor(&self, account: &Account, role: Role, channel: &str) -> Result<Actor, CoachlineError> {
        let entity_id = account.entity_id(role).ok_or_else(|| {
            CoachlineError::Store(format!("{} has no {role} link", account.address))
        })?;
        Ok(Actor {
            role,
            entity_id: entity_id.to_string(),
            address: account.address.clone(),
            channel: channel.to_string(),
        })
    }

    async fn route_button(
        &self,
        incoming: &IncomingMessage,
        account: Option<&Account>,
        token: &str,
    ) -> Result<Reply, CoachlineError> {
        let address = incoming.address();
        let Some(token) = ButtonToken::parse(token) else {
            debug!("unknown button token {token:?} from {address}");
            return Ok(Reply::text("That button has expired."));
        };

        match token {
            ButtonToken::Register(role) => Ok(self.begin_registration(address, account, role)),
            ButtonToken::RegisterCancel(session) => {
                Ok(if self.registrations.cancel(address, Some(&session)) {
                    Reply::text("Registration cancelled.")
                } else {
                    Reply::text("That registration is no longer open.")
                })
            }
            ButtonToken::Login(role) => {
                if !account.is_some_and(|a| a.entity_id(role).is_some()) {
                    return Ok(Reply::text(format!(
                        "You don't have a {role} profile. Send /register to create one."
                    )));
                }
                self.store.set_login_role(address, Some(role)).await?;
                info!("{address} logged in as {role}");
                Ok(Reply::text(format!(
                    "Logged in as {role}.\n\n{}",
                    self.registry.help(role)
                )))
            }
            ButtonToken::InviteAccept(edge) => self.answer_invitation(account, &edge, true).await,
            ButtonToken::InviteReject(edge) => self.answer_invitation(account, &edge, false).await,
        }
    }

    async fn answer_invitation(
        &self,
        account: Option<&Account>,
        edge_id: &str,
        accept: bool,
    ) -> Result<Reply, CoachlineError> {
        let Some(edge) = self.store.get_edge(edge_id).await? else {
            return Ok(Reply::text("That invitation no longer exists."));
        };
        let role = edge.invitee_role();
        let invitee = edge.side(role);
        if account.and_then(|a| a.entity_id(role)) != Some(invitee) {
            return Ok(Reply::text("That invitation isn't addressed to you."));
        }

        soften(if accept {
            handshake::accept(&self.store, edge_id, role, invitee).await
        } else {
            handshake::reject(&self.store, edge_id, role, invitee).await
        })
    }

    async fn route_guest(&self, incoming: &IncomingMessage, text: &str) -> Result<Reply, CoachlineError> {
        let address = incoming.address();

        if let Some(session) = self.registrations.get(address) {
            return match UniversalCommand::parse(text) {
                Some(UniversalCommand::Help) => Ok(Reply::text(GUEST_HELP)),
                Some(UniversalCommand::Stop) => {
                    self.registrations.cancel(address, None);
                    Ok(Reply::text("Registration cancelled."))
                }
                _ if text.starts_with('/') => {
                    let question = self.registration_question(&session).unwrap_or_default();
                    Ok(Reply::text(format!(
                        "Let's finish your registration first, or send /stop to cancel.\n\n{question}"
                    )))
                }
                _ => self.answer_registration(incoming, session, text).await,
            };
        }

        match UniversalCommand::parse(text) {
            Some(UniversalCommand::Register) => Ok(Reply::text(
                "Which profile do you want to create?",
            )
            .with_buttons(register_buttons(&Role::ALL))),
            Some(UniversalCommand::Help) => Ok(Reply::text(GUEST_HELP)),
            _ => Ok(match role_from_vocabulary(text) {
                Some(role) => self.begin_registration(address, None, role),
                None => Reply::text(WELCOME).with_buttons(register_buttons(&Role::ALL)),
            }),
        }
    }

    fn registration_question(&self, session: &Session) -> Option<String> {
        let fields = self.engine.forms().registration_fields(session.role);
        next_field(fields, &session.answers).map(prompt)
    }

    fn begin_registration(&self, address: &str, account: Option<&Account>, role: Role) -> Reply {
        if let Some(account) = account {
            if account.entity_id(role).is_some() {
                return Reply::text(format!(
                    "You already have a {role} profile. Use /switch-role to use it."
                ));
            }
            if account.login_role.is_some() {
                return Reply::text(
                    "Log out first (/logout), then send /register to add your other profile.",
                );
            }
        }

        let session = self.registrations.begin(address, role);
        info!("registration started for {address} as {role}");
        let question = self.registration_question(&session).unwrap_or_default();
        Reply::text(format!("Let's set up your {role} profile.\n\n{question}"))
            .with_buttons(vec![ButtonToken::RegisterCancel(session.token).button("Cancel")])
    }

    async fn answer_registration(
        &self,
        incoming: &IncomingMessage,
        mut session: Session,
        text: &str,
    ) -> Result<Reply, CoachlineError> {
        let address = incoming.address();
        let role = session.role;
        let fields = self.engine.forms().registration_fields(role);

        if let Some(field) = next_field(fields, &session.answers) {
            match validate(field.kind, text, &session.answers) {
                Ok(value) => {
                    session
                        .answers
                        .insert(field.key.to_string(), Value::String(value));
                }
                Err(message) => {
                    return Ok(Reply::text(format!("{message}\n\n{}", prompt(field))));
                }
            }
        }

        if let Some(next) = next_field(fields, &session.answers) {
            let question = prompt(next);
            self.registrations.save(address, session);
            return Ok(Reply::text(question));
        }

        let profile: Map<String, Value> = session
            .answers
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "name" | "phone"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let new = NewEntity {
            role,
            name: answer(&session.answers, "name").unwrap_or_default().to_string(),
            phone: answer(&session.answers, "phone").map(str::to_string),
            profile,
        };
        let today = progress::local_date(Utc::now(), self.offset);

        if role == Role::Client {
            if let Some(entity) = self
                .store
                .claim_invited_client(address, &incoming.channel, &new)
                .await?
            {
                self.registrations.finish(address);
                let mut reply = Reply::text(format!(
                    "Welcome, {}! Your trainer already set up your client profile, id {}.\n\n{}",
                    entity.name,
                    entity.id,
                    self.registry.help(role)
                ));
                for notice in handshake::pending_invitations(&self.store, role, &entity.id).await? {
                    reply = reply.notify(notice);
                }
                return Ok(reply);
            }
        }

        let entity = match self
            .store
            .register_entity(address, &incoming.channel, &new, today)
            .await
        {
            Ok(entity) => entity,
            Err(e) if e.is_user_facing() => {
                self.registrations.finish(address);
                return Ok(Reply::text(e.user_message().unwrap_or_default()));
            }
            Err(e) => return Err(e),
        };
        self.registrations.finish(address);

        Ok(Reply::text(format!(
            "Welcome, {}! Your {role} id is {}. Share it with your {} so you can connect.\n\n{}",
            entity.name,
            entity.id,
            counterpart_noun(role),
            self.registry.help(role)
        )))
    }

    async fn universal(
        &self,
        cmd: UniversalCommand,
        incoming: &IncomingMessage,
        account: &Account,
    ) -> Result<Reply, CoachlineError> {
        let address = incoming.address();
        match cmd {
            UniversalCommand::Logout => match account.login_role {
                Some(role) => {
                    self.store.set_login_role(address, None).await?;
                    info!("{address} logged out of {role}");
                    Ok(Reply::text(format!(
                        "Logged out of your {role} profile. Send any message to log in again."
                    )))
                }
                None => Ok(Reply::text("You're not logged in.")),
            },
            UniversalCommand::SwitchRole => match account.login_role {
                None if account.linked_roles().len() == 2 => Ok(Reply::text(
                    "Which profile do you want to use?",
                )
                .with_buttons(login_buttons())),
                None => {
                    let role = account.linked_roles().first().copied().unwrap_or(Role::Client);
                    Ok(Reply::text(format!(
                        "You only have a {role} profile. Send /register to add a {} profile.",
                        role.opposite()
                    )))
                }
                Some(current) => {
                    let other = current.opposite();
                    if account.entity_id(other).is_none() {
                        return Ok(Reply::text(format!(
                            "You don't have a {other} profile yet. Log out (/logout) and send /register to create one."
                        )));
                    }
                    self.store.set_login_role(address, Some(other)).await?;
                    info!("{address} switched {current} -> {other}");
                    Ok(Reply::text(format!(
                        "Switched to your {other} profile.\n\n{}",
                        self.registry.help(other)
                    )))
                }
            },
            UniversalCommand::Register => {
                if account.login_role.is_some() {
                    return Ok(Reply::text(
                        "Log out first (/logout), then send /register to add your other profile.",
                    ));
                }
                let missing: Vec<Role> = Role::ALL
                    .into_iter()
                    .filter(|r| account.entity_id(*r).is_none())
                    .collect();
                Ok(if missing.is_empty() {
                    Reply::text("You already have both a trainer and a client profile.")
                } else {
                    Reply::text("Which profile do you want to create?")
                        .with_buttons(register_buttons(&missing))
                })
            }
            UniversalCommand::Stop => {
                if self.registrations.cancel(address, None) {
                    return Ok(Reply::text("Registration cancelled."));
                }
                match account.login_role.filter(|r| account.entity_id(*r).is_some()) {
                    Some(role) => {
                        let actor = self.actor(account, role, &incoming.channel)?;
                        self.engine.stop(&actor).await
                    }
                    None => Ok(Reply::text("There's no task in progress to stop.")),
                }
            }
            UniversalCommand::Help => Ok(Reply::text(match account.login_role {
                Some(role) => self.registry.help(role),
                None => "You're logged out. Send any message to log in again.\n\
                         /switch-role - choose a profile\n\
                         /register - add a profile\n\
                         /help - this message"
                    .to_string(),
            })),
        }
    }
}
