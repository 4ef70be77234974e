//! Gateway: the event loop connecting channels, the router and the store.
//!
//! Events for one address are routed in arrival order and handled one at a
//! time under a keyed lock.
//! Auth enforcement and audit logging happen here; routing decisions live in
//! `router`, the classifier fallback in `intent`.

mod intent;
mod locks;
mod registration;
mod router;


pub(crate) use intent::{classifier_prompt, parse_classification, Intent};

use crate::{
    commands::{CommandRegistry, COMMANDS},
    reply::{Notice, Reply},
    tasks::{forms::BuiltinForms, TaskEngine},
};
use coachline_core::{
    config::{AuthConfig, ChannelConfig, Config, IntentConfig},
    error::CoachlineError,
    message::{IncomingMessage, MessageMetadata, OutgoingMessage},
    model::{Role, Speaker},
    traits::{Channel, Exporter, Provider},
};
use coachline_store::{AuditEntry, AuditLogger, AuditStatus, Store};
use locks::AddressLocks;
use registration::Registrations;
use router::Routed;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shown when routing fails for reasons the user can't fix.
const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

/// An event waiting on the classifier.
struct PendingFallback {
    incoming: IncomingMessage,
    request: router::FallbackRequest,
    started: Instant,
}

/// The central gateway that routes events between channels and the engine.
pub struct Gateway {
    pub(super) provider: Option<Arc<dyn Provider>>,
    pub(super) channels: HashMap<String, Arc<dyn Channel>>,
    pub(super) store: Store,
    pub(super) audit: AuditLogger,
    pub(super) engine: TaskEngine,
    pub(super) registry: CommandRegistry,
    pub(super) auth_config: AuthConfig,
    pub(super) channel_config: ChannelConfig,
    pub(super) intent_config: IntentConfig,
    pub(super) offset: chrono::FixedOffset,
    locks: AddressLocks,
    registrations: Registrations,
    /// Events waiting behind the one being routed for the same address.
    queued: std::sync::Mutex<HashMap<String, VecDeque<IncomingMessage>>>,
}

impl Gateway {
    /// Create a new gateway. Fails if the command table doesn't match the
    /// form configuration.
    pub fn new(
        config: &Config,
        store: Store,
        provider: Option<Arc<dyn Provider>>,
        channels: HashMap<String, Arc<dyn Channel>>,
        exporter: Arc<dyn Exporter>,
    ) -> Result<Self, CoachlineError> {
        let offset = config.progress.offset()?;
        let forms = Arc::new(BuiltinForms);
        let registry = CommandRegistry::new(COMMANDS, forms.as_ref())?;
        let engine = TaskEngine::new(store.clone(), forms, exporter, offset);
        let audit = AuditLogger::new(store.pool().clone());
        Ok(Self {
            provider,
            channels,
            store,
            audit,
            engine,
            registry,
            auth_config: config.auth.clone(),
            channel_config: config.channel.clone(),
            intent_config: config.intent.clone(),
            offset,
            locks: AddressLocks::new(),
            registrations: Registrations::new(Duration::from_secs(
                config.registration.ttl_minutes * 60,
            )),
            queued: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Run the main event loop until ctrl-c.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "Coachline gateway running | classifier: {} | channels: {} | auth: {}",
            self.provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            self.channels.keys().cloned().collect::<Vec<_>>().join(", "),
            if self.auth_config.enabled {
                "enforced"
            } else {
                "disabled"
            },
        );

        let (tx, mut rx) = mpsc::channel::<IncomingMessage>(256);

        for (name, channel) in &self.channels {
            let mut channel_rx = channel
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start channel {name}: {e}"))?;
            let tx = tx.clone();
            let channel_name = name.clone();

            tokio::spawn(async move {
                while let Some(msg) = channel_rx.recv().await {
                    if tx.send(msg).await.is_err() {
                        info!("gateway receiver dropped, stopping {channel_name} forwarder");
                        break;
                    }
                }
            });

            info!("Channel started: {name}");
        }

        drop(tx);

        loop {
            tokio::select! {
                Some(incoming) = rx.recv() => {
                    self.clone().enqueue(incoming);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Route events of one address in arrival order. The first event starts
    /// a worker that drains the address queue; later ones wait in it.
    fn enqueue(self: Arc<Self>, incoming: IncomingMessage) {
        let address = incoming.address().to_string();
        {
            let Ok(mut queued) = self.queued.lock() else {
                error!("event queue poisoned, dropping event from {address}");
                return;
            };
            if let Some(waiting) = queued.get_mut(&address) {
                waiting.push_back(incoming);
                debug!("queued event for {address} ({} waiting)", waiting.len());
                return;
            }
            queued.insert(address.clone(), VecDeque::new());
        }

        tokio::spawn(async move {
            let mut next = Some(incoming);
            while let Some(incoming) = next {
                if let Some(pending) = self.begin(incoming).await {
                    // The classifier runs off the queue so the address can
                    // keep talking, e.g. send /stop.
                    tokio::spawn(self.clone().finish_fallback(pending));
                }
                next = match self.queued.lock() {
                    Ok(mut queued) => {
                        let popped = queued.get_mut(&address).and_then(VecDeque::pop_front);
                        if popped.is_none() {
                            queued.remove(&address);
                        }
                        popped
                    }
                    Err(_) => None,
                };
            }
        });
    }

    /// Handle one inbound event end to end, classifier included.
    #[cfg(test)]
    pub(crate) async fn dispatch(self: Arc<Self>, incoming: IncomingMessage) {
        if let Some(pending) = self.begin(incoming).await {
            self.finish_fallback(pending).await;
        }
    }

    /// Everything up to the classifier. Returns the event when it still
    /// needs one; the address lock is released by then.
    async fn begin(&self, incoming: IncomingMessage) -> Option<PendingFallback> {
        let started = Instant::now();
        let preview = if incoming.button.is_some() {
            format!("[button {}]", incoming.button.as_deref().unwrap_or_default())
        } else if incoming.text.chars().count() > 60 {
            format!("{}...", incoming.text.chars().take(60).collect::<String>())
        } else {
            incoming.text.clone()
        };
        info!(
            "[{}] {} | {}",
            incoming.channel,
            incoming.sender_name.as_deref().unwrap_or(&incoming.sender_id),
            preview
        );

        if let Some(reason) = self.check_auth(&incoming) {
            warn!("denied {}: {reason}", incoming.sender_id);
            self.write_audit(&incoming, None, "denied", None, AuditStatus::Denied, Some(reason))
                .await;
            self.send_reply(&incoming, Reply::text(self.auth_config.deny_message.clone()))
                .await;
            return None;
        }

        let address = incoming.address().to_string();
        let guard = self.locks.acquire(&address).await;

        let outcome = match self.route(&incoming).await {
            Ok(Routed::Done { reply, route, role }) => Ok((reply, route, role)),
            Ok(Routed::Fallback(request)) => {
                drop(guard);
                return Some(PendingFallback {
                    incoming,
                    request,
                    started,
                });
            }
            Err(e) => Err(e),
        };
        self.settle(&incoming, outcome, started).await;
        drop(guard);
        None
    }

    /// Classify with the address unlocked, then apply the result under the
    /// lock again.
    async fn finish_fallback(self: Arc<Self>, pending: PendingFallback) {
        let PendingFallback {
            incoming,
            request,
            started,
        } = pending;
        let address = incoming.address().to_string();

        let typing_target = incoming.reply_target.as_deref().unwrap_or(&address);
        if let Some(channel) = self.channels.get(&incoming.channel) {
            let _ = channel.send_typing(typing_target).await;
        }
        let role = request.actor.role;
        let intent = self.classify(&request).await;

        let guard = self.locks.acquire(&address).await;
        let outcome = self
            .apply_intent(request, intent)
            .await
            .map(|reply| (reply, "intent", Some(role)));
        self.settle(&incoming, outcome, started).await;
        drop(guard);
    }

    /// Reply, notify, record history and audit. Runs under the address lock.
    async fn settle(
        &self,
        incoming: &IncomingMessage,
        outcome: Result<(Reply, &'static str, Option<Role>), CoachlineError>,
        started: Instant,
    ) {
        let address = incoming.address();
        let elapsed = started.elapsed().as_millis() as i64;
        match outcome {
            Ok((reply, route, role)) => {
                let text = reply.text.clone();
                let notices = reply.notices.clone();
                self.send_reply(incoming, reply).await;
                for notice in notices {
                    self.deliver_notice(notice).await;
                }
                self.record_history(address, role, &incoming.text, &text)
                    .await;
                self.write_audit(
                    incoming,
                    Some(text),
                    route,
                    Some(elapsed),
                    AuditStatus::Ok,
                    None,
                )
                .await;
            }
            Err(e) => {
                error!("routing failed for {address}: {e}");
                self.send_reply(incoming, Reply::text(APOLOGY)).await;
                self.write_audit(
                    incoming,
                    Some(e.to_string()),
                    "error",
                    Some(elapsed),
                    AuditStatus::Error,
                    None,
                )
                .await;
            }
        }
    }

    /// Check whether the sender is allowed. Returns a denial reason if not.
    fn check_auth(&self, incoming: &IncomingMessage) -> Option<String> {
        if !self.auth_config.enabled {
            return None;
        }
        match incoming.channel.as_str() {
            "telegram" => {
                let allowed = self
                    .channel_config
                    .telegram
                    .as_ref()
                    .map(|tg| &tg.allowed_users);
                match allowed {
                    // Empty list = allow all.
                    Some(users) if users.is_empty() => None,
                    Some(users) => {
                        let sender_id: i64 = incoming.sender_id.parse().unwrap_or(-1);
                        if users.contains(&sender_id) {
                            None
                        } else {
                            Some(format!(
                                "telegram user {} not in allowed_users",
                                incoming.sender_id
                            ))
                        }
                    }
                    None => Some("telegram channel not configured".to_string()),
                }
            }
            other => Some(format!("unknown channel: {other}")),
        }
    }

    /// Send the reply back to where the event came from.
    async fn send_reply(&self, incoming: &IncomingMessage, reply: Reply) {
        let msg = OutgoingMessage {
            text: reply.text,
            metadata: MessageMetadata::default(),
            reply_target: incoming
                .reply_target
                .clone()
                .or_else(|| Some(incoming.sender_id.clone())),
            buttons: reply.buttons,
        };
        match self.channels.get(&incoming.channel) {
            Some(channel) => {
                if let Err(e) = channel.send(msg).await {
                    error!("failed to send reply: {e}");
                }
            }
            None => warn!("no channel named {}", incoming.channel),
        }
    }

    /// Deliver a notice to another entity through its linked account. Failure
    /// never affects the already-committed effect.
    async fn deliver_notice(&self, notice: Notice) {
        let account = match self
            .store
            .find_account_for_entity(notice.role, &notice.entity_id)
            .await
        {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(
                    "no account for {} {}, notice dropped",
                    notice.role, notice.entity_id
                );
                return;
            }
            Err(e) => {
                warn!("notice lookup for {} failed: {e}", notice.entity_id);
                return;
            }
        };
        let Some(channel) = self.channels.get(&account.channel) else {
            warn!(
                "no channel {} for {} {}, notice dropped",
                account.channel, notice.role, notice.entity_id
            );
            return;
        };
        let msg = OutgoingMessage {
            text: notice.text,
            metadata: MessageMetadata::default(),
            reply_target: Some(account.address.clone()),
            buttons: notice.buttons,
        };
        if let Err(e) = channel.send(msg).await {
            warn!("failed to notify {}: {e}", account.address);
        }
    }

    async fn record_history(&self, address: &str, role: Option<Role>, input: &str, output: &str) {
        let input = input.trim();
        if !input.is_empty() {
            if let Err(e) = self
                .store
                .record_turn(address, role, Speaker::User, input)
                .await
            {
                warn!("failed to record turn: {e}");
            }
        }
        if !output.is_empty() {
            if let Err(e) = self
                .store
                .record_turn(address, role, Speaker::Assistant, output)
                .await
            {
                warn!("failed to record turn: {e}");
            }
        }
    }

    async fn write_audit(
        &self,
        incoming: &IncomingMessage,
        output_text: Option<String>,
        route: &str,
        processing_ms: Option<i64>,
        status: AuditStatus,
        denial_reason: Option<String>,
    ) {
        let entry = AuditEntry {
            channel: incoming.channel.clone(),
            sender_id: incoming.sender_id.clone(),
            sender_name: incoming.sender_name.clone(),
            input_text: incoming
                .button
                .clone()
                .unwrap_or_else(|| incoming.text.clone()),
            output_text,
            route: route.to_string(),
            processing_ms,
            status,
            denial_reason,
        };
        if let Err(e) = self.audit.log(&entry).await {
            warn!("audit write failed: {e}");
        }
    }

    /// Graceful shutdown: stop channels.
    async fn shutdown(&self) {
        info!("Shutting down...");
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!("failed to stop channel {name}: {e}");
            }
        }
        info!("Shutdown complete.");
    }
}
