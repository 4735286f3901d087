//! Per-room actor.
//!
//! Every joined room runs one actor task that owns all of the room's
//! mutable state: its ACL, its enabled plugin set, one handler instance per
//! registered plugin, and the transient sender flags delivered out-of-band
//! before a message. Events for the room are processed strictly in arrival
//! order; different rooms never block each other.
//!
//! The actor stops when its mailbox closes, when the room is parted, or
//! when the bot-wide shutdown signal fires; in every case it fires its
//! `alive` signal on the way out so the owner can retire the handle.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use tmi_proto::{InboundEvent, Rank, RoomStateEvent, TextEvent};

use crate::acl::{Acl, GROUPS};
use crate::db::Database;
use crate::dictionary::Dictionary;
use crate::error::{BotError, Result};
use crate::plugin::{Caps, Command, PluginContext, PluginHandler, PluginRegistry};
use crate::sender::Sender;
use crate::signal::{signal, Signal, SignalHandle};

/// Mailbox depth per room.
const MAILBOX_SIZE: usize = 32;

/// Messages a room actor accepts.
pub enum RoomCommand {
    /// An inbound event addressed to this room.
    Event(InboundEvent),
    /// Enable a plugin. Replies whether the set changed.
    EnablePlugin {
        /// Plugin name.
        name: String,
        /// Outcome channel.
        reply: oneshot::Sender<Result<bool>>,
    },
    /// Disable a plugin. Replies whether the set changed.
    DisablePlugin {
        /// Plugin name.
        name: String,
        /// Outcome channel.
        reply: oneshot::Sender<Result<bool>>,
    },
    /// List enabled plugins.
    EnabledPlugins {
        /// Outcome channel.
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Handle to a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    name: String,
    tx: mpsc::Sender<RoomCommand>,
    alive: Signal,
}

impl RoomHandle {
    /// Canonical room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fires when the actor has stopped, for any reason.
    pub fn alive(&self) -> Signal {
        self.alive.clone()
    }

    /// Whether two handles point at the same actor.
    pub fn same_actor(&self, other: &RoomHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Queue an event for processing.
    pub async fn deliver(&self, event: InboundEvent) -> Result<()> {
        self.tx
            .send(RoomCommand::Event(event))
            .await
            .map_err(|_| BotError::RoomClosed(self.name.clone()))
    }

    /// Enable a plugin in this room, persisting the change.
    pub async fn enable_plugin(&self, name: &str) -> Result<bool> {
        self.request(|reply| RoomCommand::EnablePlugin {
            name: name.to_owned(),
            reply,
        })
        .await?
    }

    /// Disable a plugin in this room, persisting the change.
    pub async fn disable_plugin(&self, name: &str) -> Result<bool> {
        self.request(|reply| RoomCommand::DisablePlugin {
            name: name.to_owned(),
            reply,
        })
        .await?
    }

    /// Names of plugins currently enabled here.
    pub async fn enabled_plugins(&self) -> Result<Vec<String>> {
        self.request(|reply| RoomCommand::EnabledPlugins { reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| BotError::RoomClosed(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| BotError::RoomClosed(self.name.clone()))
    }
}

/// Sender attributes announced ahead of the message they describe.
/// Consumed by the next text event, then cleared.
#[derive(Default)]
struct PendingFlags {
    subscriber: Option<bool>,
    turbo: Option<bool>,
    staff: Option<bool>,
    admin: Option<bool>,
}

/// One plugin's handler instance in this room.
struct HandlerSlot {
    name: &'static str,
    caps: Caps,
    handler: Box<dyn PluginHandler>,
}

/// Spawn a room actor, loading its persisted state first. The `shutdown`
/// signal stops the actor after notifying its enabled handlers.
pub async fn spawn(
    name: &str,
    registry: Arc<PluginRegistry>,
    sender: Sender,
    db: Database,
    operator: &str,
    dictionary: Arc<Dictionary>,
    shutdown: Signal,
) -> Result<RoomHandle> {
    let name = tmi_proto::normalize_room(name);
    let acl = Acl::load(db.clone(), &name, operator).await?;
    let enabled: HashSet<String> = db.plugins().load(&name).await?.into_iter().collect();
    let handlers = registry
        .all()
        .iter()
        .map(|plugin| HandlerSlot {
            name: plugin.name(),
            caps: plugin.caps(),
            handler: plugin.create_handler(&name),
        })
        .collect();

    let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
    let (alive_handle, alive) = signal();
    let actor = RoomActor {
        name: name.clone(),
        registry,
        sender,
        acl,
        dictionary,
        db,
        enabled,
        handlers,
        pending: PendingFlags::default(),
        emote_sets: None,
    };
    tokio::spawn(actor.run(rx, shutdown, alive_handle));

    Ok(RoomHandle { name, tx, alive })
}

struct RoomActor {
    name: String,
    registry: Arc<PluginRegistry>,
    sender: Sender,
    acl: Acl,
    dictionary: Arc<Dictionary>,
    db: Database,
    enabled: HashSet<String>,
    handlers: Vec<HandlerSlot>,
    pending: PendingFlags,
    emote_sets: Option<Vec<u32>>,
}

/// Builds a [`PluginContext`] from the actor's fields without borrowing the
/// handler list, so hooks can take `&mut self.handlers` alongside it.
macro_rules! context {
    ($actor:ident) => {
        PluginContext {
            room: &$actor.name,
            sender: &$actor.sender,
            acl: &$actor.acl,
            dictionary: &$actor.dictionary,
        }
    };
}

impl RoomActor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<RoomCommand>,
        shutdown: Signal,
        alive: SignalHandle,
    ) {
        debug!(room = %self.name, "room actor started");
        self.announce_enabled().await;

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(RoomCommand::Event(event)) => {
                        if self.handle_event(event).await {
                            break;
                        }
                    }
                    Some(RoomCommand::EnablePlugin { name, reply }) => {
                        let _ = reply.send(self.enable(&name).await);
                    }
                    Some(RoomCommand::DisablePlugin { name, reply }) => {
                        let _ = reply.send(self.disable(&name).await);
                    }
                    Some(RoomCommand::EnabledPlugins { reply }) => {
                        let _ = reply.send(self.enabled_sorted());
                    }
                    None => break,
                },
                _ = shutdown.wait() => {
                    self.notify_shutdown().await;
                    break;
                }
            }
        }

        alive.fire();
        debug!(room = %self.name, "room actor stopped");
    }

    /// Handlers for plugins enabled in an earlier run learn they are active.
    async fn announce_enabled(&mut self) {
        let ctx = context!(self);
        for slot in self.handlers.iter_mut() {
            if self.enabled.contains(slot.name) {
                slot.handler.on_enable(&ctx).await;
            }
        }
    }

    /// Process one event. Returns whether the actor should stop.
    async fn handle_event(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::Join { .. } => {
                info!(room = %self.name, "joined");
            }
            InboundEvent::Part { .. } => {
                info!(room = %self.name, "left");
                self.notify_part().await;
                return true;
            }
            InboundEvent::RoomState(state) => {
                self.absorb_room_state(&state);
                let ctx = context!(self);
                for slot in self.handlers.iter_mut() {
                    if slot.caps.room_state && self.enabled.contains(slot.name) {
                        slot.handler.on_room_state(&ctx, &state).await;
                    }
                }
            }
            InboundEvent::Text(mut text) => {
                self.apply_pending(&mut text);
                self.dispatch_text(text).await;
            }
            InboundEvent::ClearChat(event) => {
                let ctx = context!(self);
                for slot in self.handlers.iter_mut() {
                    if slot.caps.clear_chat && self.enabled.contains(slot.name) {
                        slot.handler.on_clear_chat(&ctx, &event).await;
                    }
                }
            }
            InboundEvent::SubscriberNotice(notice) => {
                let ctx = context!(self);
                for slot in self.handlers.iter_mut() {
                    if slot.caps.subscriber_notices && self.enabled.contains(slot.name) {
                        slot.handler.on_subscriber_notice(&ctx, &notice).await;
                    }
                }
            }
        }
        false
    }

    async fn notify_part(&mut self) {
        let ctx = context!(self);
        for slot in self.handlers.iter_mut() {
            if self.enabled.contains(slot.name) {
                slot.handler.on_part(&ctx).await;
            }
        }
    }

    async fn notify_shutdown(&mut self) {
        let ctx = context!(self);
        for slot in self.handlers.iter_mut() {
            if self.enabled.contains(slot.name) {
                slot.handler.on_shutdown(&ctx).await;
            }
        }
    }

    fn absorb_room_state(&mut self, state: &RoomStateEvent) {
        if state.subscriber.is_some() {
            self.pending.subscriber = state.subscriber;
        }
        if state.turbo.is_some() {
            self.pending.turbo = state.turbo;
        }
        if state.staff.is_some() {
            self.pending.staff = state.staff;
        }
        if state.admin.is_some() {
            self.pending.admin = state.admin;
        }
        if let Some(sets) = &state.emote_sets {
            self.emote_sets = Some(sets.clone());
        }
    }

    /// Merge carried flags and emote sets into the message's sender, then
    /// clear them.
    fn apply_pending(&mut self, text: &mut TextEvent) {
        let pending = std::mem::take(&mut self.pending);
        if pending.subscriber == Some(true) {
            text.user.subscriber = true;
        }
        if pending.turbo == Some(true) {
            text.user.turbo = true;
        }
        if pending.staff == Some(true) && text.user.rank < Rank::Staff {
            text.user.rank = Rank::Staff;
        }
        if pending.admin == Some(true) && text.user.rank < Rank::Admin {
            text.user.rank = Rank::Admin;
        }
        if let Some(sets) = self.emote_sets.take() {
            text.user.emote_sets = sets;
        }
    }

    async fn dispatch_text(&mut self, text: TextEvent) {
        let command = Command::parse(&text.text);

        if let Some(command) = command {
            if self.handle_builtin(&command, &text).await {
                return;
            }
            let ctx = context!(self);
            for slot in self.handlers.iter_mut() {
                if slot.caps.commands && self.enabled.contains(slot.name) {
                    slot.handler.on_command(&ctx, &command, &text).await;
                }
            }
        } else {
            let ctx = context!(self);
            for slot in self.handlers.iter_mut() {
                if slot.caps.text && self.enabled.contains(slot.name) {
                    slot.handler.on_text(&ctx, &text).await;
                }
            }
        }
    }

    /// Room management commands, handled here rather than by a plugin.
    /// Gated by the `admin` permission; the operator and the broadcaster
    /// always pass. Returns whether the command was consumed.
    async fn handle_builtin(&mut self, command: &Command, text: &TextEvent) -> bool {
        match command.name.as_str() {
            "enable" | "disable" | "plugins" | "allow" | "deny" | "allowed" => {}
            _ => return false,
        }
        if !self.acl.is_allowed(&text.user, "admin") {
            return true;
        }

        match (command.name.as_str(), command.args.as_slice()) {
            ("enable", [name]) => {
                let reply = match self.enable(name).await {
                    Ok(true) => format!("plugin {name} enabled"),
                    Ok(false) => format!("plugin {name} is already enabled"),
                    Err(BotError::UnknownPlugin(_)) => format!("unknown plugin: {name}"),
                    Err(e) => {
                        error!(room = %self.name, error = %e, "enable failed");
                        return true;
                    }
                };
                self.sender.say(&self.name, reply);
            }
            ("disable", [name]) => {
                let reply = match self.disable(name).await {
                    Ok(true) => format!("plugin {name} disabled"),
                    Ok(false) => format!("plugin {name} is not enabled"),
                    Err(e) => {
                        error!(room = %self.name, error = %e, "disable failed");
                        return true;
                    }
                };
                self.sender.say(&self.name, reply);
            }
            ("plugins", _) => {
                let enabled = self.enabled_sorted();
                let reply = if enabled.is_empty() {
                    format!("no plugins enabled; available: {}", self.registry.names().join(", "))
                } else {
                    format!("enabled plugins: {}", enabled.join(", "))
                };
                self.sender.say(&self.name, reply);
            }
            ("allow", [permission, ident]) => {
                if let Some(reply) = self.check_grant(permission, ident) {
                    self.sender.say(&self.name, reply);
                    return true;
                }
                match self.acl.allow(permission, ident).await {
                    Ok(true) => {
                        self.sender
                            .say(&self.name, format!("permission {permission} granted to {ident}"));
                    }
                    Ok(false) => {
                        self.sender
                            .say(&self.name, format!("{ident} already has permission {permission}"));
                    }
                    Err(e) => error!(room = %self.name, error = %e, "allow failed"),
                }
            }
            ("deny", [permission, ident]) => {
                match self.acl.deny(permission, ident).await {
                    Ok(true) => {
                        self.sender.say(
                            &self.name,
                            format!("permission {permission} revoked from {ident}"),
                        );
                    }
                    Ok(false) => {
                        self.sender
                            .say(&self.name, format!("{ident} does not have permission {permission}"));
                    }
                    Err(e) => error!(room = %self.name, error = %e, "deny failed"),
                }
            }
            ("allowed", [permission]) => {
                let idents = self.acl.allowed_idents(permission);
                let reply = if idents.is_empty() {
                    format!("nobody is allowed to use {permission}")
                } else {
                    format!("allowed to use {permission}: {}", idents.join(", "))
                };
                self.sender.say(&self.name, reply);
            }
            _ => {
                // Right command, wrong arity. Swallow it rather than let
                // plugins see a half-formed management command.
            }
        }
        true
    }

    fn check_grant(&self, permission: &str, ident: &str) -> Option<String> {
        if ident.starts_with('$') && !GROUPS.contains(&ident.to_ascii_lowercase().as_str()) {
            return Some(format!("unknown group: {ident}"));
        }
        let known = permission == "admin"
            || self
                .registry
                .all()
                .iter()
                .any(|p| p.permissions().contains(&permission));
        if !known {
            return Some(format!("unknown permission: {permission}"));
        }
        None
    }

    async fn enable(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.handlers.iter().position(|slot| slot.name == name) else {
            return Err(BotError::UnknownPlugin(name.to_owned()));
        };
        let canonical = self.handlers[index].name;
        if self.enabled.contains(canonical) {
            return Ok(false);
        }
        self.db.plugins().enable(&self.name, canonical).await?;
        self.enabled.insert(canonical.to_owned());
        let ctx = context!(self);
        self.handlers[index].handler.on_enable(&ctx).await;
        info!(room = %self.name, plugin = canonical, "plugin enabled");
        Ok(true)
    }

    async fn disable(&mut self, name: &str) -> Result<bool> {
        if !self.enabled.contains(name) {
            return Ok(false);
        }
        self.db.plugins().disable(&self.name, name).await?;
        self.enabled.remove(name);
        if let Some(index) = self.handlers.iter().position(|slot| slot.name == name) {
            let ctx = context!(self);
            self.handlers[index].handler.on_disable(&ctx).await;
        }
        info!(room = %self.name, plugin = name, "plugin disabled");
        Ok(true)
    }

    fn enabled_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enabled.iter().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use crate::queue::SendQueue;
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use parking_lot::Mutex;
    use tmi_proto::User;

    async fn setup() -> (RoomHandle, Arc<SendQueue>, SignalHandle) {
        setup_with(Arc::new(PluginRegistry::builtin())).await
    }

    async fn setup_with(
        registry: Arc<PluginRegistry>,
    ) -> (RoomHandle, Arc<SendQueue>, SignalHandle) {
        let db = Database::connect(":memory:").await.unwrap();
        setup_in(registry, db, "#testchan").await
    }

    async fn setup_in(
        registry: Arc<PluginRegistry>,
        db: Database,
        room: &str,
    ) -> (RoomHandle, Arc<SendQueue>, SignalHandle) {
        let dictionary = Arc::new(Dictionary::load(db.clone()).await.unwrap());
        let queue = Arc::new(SendQueue::new());
        let (shutdown_handle, shutdown) = signal();
        let handle = spawn(
            room,
            registry,
            Sender::new(queue.clone()),
            db,
            "the_op",
            dictionary,
            shutdown,
        )
        .await
        .unwrap();
        (handle, queue, shutdown_handle)
    }

    fn text_from(name: &str, text: &str) -> InboundEvent {
        InboundEvent::Text(TextEvent {
            room: "testchan".to_owned(),
            user: User {
                name: name.to_owned(),
                ..User::default()
            },
            text: text.to_owned(),
        })
    }

    async fn drain(queue: &SendQueue) -> Vec<String> {
        let mut lines = Vec::new();
        while !queue.is_empty() {
            let (event, _) = queue.pop().now_or_never().unwrap();
            lines.push(event.to_message().to_string());
        }
        lines
    }

    async fn settle(handle: &RoomHandle) {
        // A round-trip request means every earlier event was processed.
        let _ = handle.enabled_plugins().await.unwrap();
    }

    /// Records every hook invocation into a shared log.
    struct RecorderPlugin {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for RecorderPlugin {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn caps(&self) -> Caps {
            Caps::text()
        }

        fn create_handler(&self, _room: &str) -> Box<dyn PluginHandler> {
            Box::new(RecorderHandler {
                log: self.log.clone(),
            })
        }
    }

    struct RecorderHandler {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PluginHandler for RecorderHandler {
        async fn on_enable(&mut self, _ctx: &PluginContext<'_>) {
            self.log.lock().push("enable".to_owned());
        }

        async fn on_disable(&mut self, _ctx: &PluginContext<'_>) {
            self.log.lock().push("disable".to_owned());
        }

        async fn on_part(&mut self, _ctx: &PluginContext<'_>) {
            self.log.lock().push("part".to_owned());
        }

        async fn on_shutdown(&mut self, _ctx: &PluginContext<'_>) {
            self.log.lock().push("shutdown".to_owned());
        }
    }

    fn recorder() -> (Arc<PluginRegistry>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(RecorderPlugin { log: log.clone() }));
        (Arc::new(registry), log)
    }

    /// Counts texts seen; count lives in the per-room handler.
    struct CounterPlugin;

    impl Plugin for CounterPlugin {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn caps(&self) -> Caps {
            Caps::text()
        }

        fn create_handler(&self, _room: &str) -> Box<dyn PluginHandler> {
            Box::new(CounterHandler { seen: 0 })
        }
    }

    struct CounterHandler {
        seen: u32,
    }

    #[async_trait]
    impl PluginHandler for CounterHandler {
        async fn on_text(&mut self, ctx: &PluginContext<'_>, _text: &TextEvent) {
            self.seen += 1;
            ctx.sender.say(ctx.room, self.seen.to_string());
        }
    }

    /// Stores a copy of every text event's sender.
    struct CapturePlugin {
        seen: Arc<Mutex<Vec<User>>>,
    }

    impl Plugin for CapturePlugin {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn caps(&self) -> Caps {
            Caps::text()
        }

        fn create_handler(&self, _room: &str) -> Box<dyn PluginHandler> {
            Box::new(CaptureHandler {
                seen: self.seen.clone(),
            })
        }
    }

    struct CaptureHandler {
        seen: Arc<Mutex<Vec<User>>>,
    }

    #[async_trait]
    impl PluginHandler for CaptureHandler {
        async fn on_text(&mut self, _ctx: &PluginContext<'_>, text: &TextEvent) {
            self.seen.lock().push(text.user.clone());
        }
    }

    #[tokio::test]
    async fn enable_is_idempotent_and_persisted() {
        let (handle, _queue, _shutdown) = setup().await;
        assert!(handle.enable_plugin("ping").await.unwrap());
        assert!(!handle.enable_plugin("ping").await.unwrap());
        assert_eq!(handle.enabled_plugins().await.unwrap(), vec!["ping"]);

        assert!(handle.disable_plugin("ping").await.unwrap());
        assert!(!handle.disable_plugin("ping").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_plugin_is_an_error() {
        let (handle, _queue, _shutdown) = setup().await;
        assert!(matches!(
            handle.enable_plugin("nope").await,
            Err(BotError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_hooks_fire_on_genuine_transitions_only() {
        let (registry, log) = recorder();
        let (handle, _queue, _shutdown) = setup_with(registry).await;

        assert!(handle.enable_plugin("recorder").await.unwrap());
        assert_eq!(*log.lock(), vec!["enable"]);

        // A refused re-enable must not notify the handler again.
        assert!(!handle.enable_plugin("recorder").await.unwrap());
        assert_eq!(*log.lock(), vec!["enable"]);

        assert!(handle.disable_plugin("recorder").await.unwrap());
        assert_eq!(*log.lock(), vec!["enable", "disable"]);

        assert!(!handle.disable_plugin("recorder").await.unwrap());
        assert_eq!(*log.lock(), vec!["enable", "disable"]);
    }

    #[tokio::test]
    async fn persisted_plugins_are_announced_at_actor_start() {
        let (registry, log) = recorder();
        let db = Database::connect(":memory:").await.unwrap();

        let (handle, _queue, _shutdown) =
            setup_in(registry.clone(), db.clone(), "#testchan").await;
        handle.enable_plugin("recorder").await.unwrap();
        assert_eq!(*log.lock(), vec!["enable"]);

        // A fresh actor for the same room finds the plugin enabled in the
        // database and tells its new handler so.
        let (rejoined, _queue2, _shutdown2) = setup_in(registry, db, "#testchan").await;
        settle(&rejoined).await;
        assert_eq!(*log.lock(), vec!["enable", "enable"]);
    }

    #[tokio::test]
    async fn part_notifies_handlers_and_stops_the_actor() {
        let (registry, log) = recorder();
        let (handle, _queue, _shutdown) = setup_with(registry).await;
        handle.enable_plugin("recorder").await.unwrap();

        handle
            .deliver(InboundEvent::Part {
                room: "testchan".to_owned(),
            })
            .await
            .unwrap();
        handle.alive().wait().await;

        assert_eq!(*log.lock(), vec!["enable", "part"]);
        assert!(matches!(
            handle.enabled_plugins().await,
            Err(BotError::RoomClosed(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_signal_notifies_handlers_and_stops_the_actor() {
        let (registry, log) = recorder();
        let (handle, _queue, shutdown) = setup_with(registry).await;
        handle.enable_plugin("recorder").await.unwrap();

        shutdown.fire();
        handle.alive().wait().await;

        assert_eq!(*log.lock(), vec!["enable", "shutdown"]);
    }

    #[tokio::test]
    async fn disabled_handlers_miss_lifecycle_notices() {
        let (registry, log) = recorder();
        let (handle, _queue, shutdown) = setup_with(registry).await;

        shutdown.fire();
        handle.alive().wait().await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn handlers_keep_state_per_room() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(CounterPlugin));
        let registry = Arc::new(registry);
        let db = Database::connect(":memory:").await.unwrap();

        let (first, queue_a, _sa) = setup_in(registry.clone(), db.clone(), "#aaa").await;
        let (second, queue_b, _sb) = setup_in(registry, db, "#bbb").await;
        first.enable_plugin("counter").await.unwrap();
        second.enable_plugin("counter").await.unwrap();

        first.deliver(text_from("x", "one")).await.unwrap();
        first.deliver(text_from("x", "two")).await.unwrap();
        second.deliver(text_from("x", "one")).await.unwrap();
        settle(&first).await;
        settle(&second).await;

        assert_eq!(
            drain(&queue_a).await,
            vec!["PRIVMSG #aaa :1", "PRIVMSG #aaa :2"]
        );
        assert_eq!(drain(&queue_b).await, vec!["PRIVMSG #bbb :1"]);
    }

    #[tokio::test]
    async fn enabled_plugin_answers_commands() {
        let (handle, queue, _shutdown) = setup().await;
        handle.enable_plugin("ping").await.unwrap();

        handle.deliver(text_from("somebody", "!ping")).await.unwrap();
        settle(&handle).await;
        assert_eq!(drain(&queue).await, vec!["PRIVMSG #testchan :pong"]);

        handle.disable_plugin("ping").await.unwrap();
        handle.deliver(text_from("somebody", "!ping")).await.unwrap();
        settle(&handle).await;
        assert!(drain(&queue).await.is_empty());
    }

    #[tokio::test]
    async fn operator_runs_builtins_others_do_not() {
        let (handle, queue, _shutdown) = setup().await;

        handle.deliver(text_from("rando", "!enable ping")).await.unwrap();
        settle(&handle).await;
        assert!(drain(&queue).await.is_empty());

        handle.deliver(text_from("the_op", "!enable ping")).await.unwrap();
        settle(&handle).await;
        assert_eq!(
            drain(&queue).await,
            vec!["PRIVMSG #testchan :plugin ping enabled"]
        );
        assert_eq!(handle.enabled_plugins().await.unwrap(), vec!["ping"]);
    }

    #[tokio::test]
    async fn broadcaster_counts_as_admin() {
        let (handle, queue, _shutdown) = setup().await;
        handle
            .deliver(text_from("testchan", "!enable echo"))
            .await
            .unwrap();
        settle(&handle).await;
        assert_eq!(
            drain(&queue).await,
            vec!["PRIVMSG #testchan :plugin echo enabled"]
        );
    }

    #[tokio::test]
    async fn acl_grants_through_chat_commands() {
        let (handle, queue, _shutdown) = setup().await;
        handle.enable_plugin("echo").await.unwrap();

        // Not allowed yet.
        handle.deliver(text_from("someone", "!echo hi")).await.unwrap();
        settle(&handle).await;
        assert!(drain(&queue).await.is_empty());

        handle
            .deliver(text_from("the_op", "!allow echo someone"))
            .await
            .unwrap();
        handle.deliver(text_from("someone", "!echo hi there")).await.unwrap();
        settle(&handle).await;
        assert_eq!(
            drain(&queue).await,
            vec![
                "PRIVMSG #testchan :permission echo granted to someone",
                "PRIVMSG #testchan :hi there",
            ]
        );
    }

    #[tokio::test]
    async fn grant_validation_rejects_unknown_names() {
        let (handle, queue, _shutdown) = setup().await;
        handle
            .deliver(text_from("the_op", "!allow echo $nonsense"))
            .await
            .unwrap();
        handle
            .deliver(text_from("the_op", "!allow frobnicate $all"))
            .await
            .unwrap();
        settle(&handle).await;
        assert_eq!(
            drain(&queue).await,
            vec![
                "PRIVMSG #testchan :unknown group: $nonsense",
                "PRIVMSG #testchan :unknown permission: frobnicate",
            ]
        );
    }

    #[tokio::test]
    async fn carried_flags_apply_to_next_message_only() {
        let (handle, queue, _shutdown) = setup().await;
        handle.enable_plugin("echo").await.unwrap();
        handle
            .deliver(text_from("the_op", "!allow echo $subs"))
            .await
            .unwrap();

        let state = RoomStateEvent {
            room: "testchan".to_owned(),
            subscriber: Some(true),
            ..RoomStateEvent::default()
        };
        handle.deliver(InboundEvent::RoomState(state)).await.unwrap();

        // First message from the flagged sender passes the $subs check.
        handle.deliver(text_from("viewer", "!echo one")).await.unwrap();
        // Flags were consumed; the second does not.
        handle.deliver(text_from("viewer", "!echo two")).await.unwrap();
        settle(&handle).await;

        assert_eq!(
            drain(&queue).await,
            vec![
                "PRIVMSG #testchan :permission echo granted to $subs",
                "PRIVMSG #testchan :one",
            ]
        );
    }

    #[tokio::test]
    async fn carried_emote_sets_apply_to_next_message_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(CapturePlugin { seen: seen.clone() }));
        let (handle, _queue, _shutdown) = setup_with(Arc::new(registry)).await;
        handle.enable_plugin("capture").await.unwrap();

        let state = RoomStateEvent {
            room: "testchan".to_owned(),
            emote_sets: Some(vec![1, 33, 42]),
            ..RoomStateEvent::default()
        };
        handle.deliver(InboundEvent::RoomState(state)).await.unwrap();
        handle.deliver(text_from("viewer", "first")).await.unwrap();
        handle.deliver(text_from("viewer", "second")).await.unwrap();
        settle(&handle).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].emote_sets, vec![1, 33, 42]);
        assert!(seen[1].emote_sets.is_empty());
    }
}
