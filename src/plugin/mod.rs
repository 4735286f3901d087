//! Plugin interface and registry.
//!
//! A [`Plugin`] is a process-wide factory: for every room the bot joins it
//! creates one [`PluginHandler`], which owns any per-room state and receives
//! the room's events. The plugin declares the event kinds its handlers want
//! via its [`Caps`] record; room actors consult the record and only call the
//! matching hooks. Hooks run on the room's actor task, so they serialize per
//! room but never block other rooms.
//!
//! Handlers are also told about their own lifecycle: `on_enable` and
//! `on_disable` fire on genuine transitions of the room's enabled set,
//! `on_part` when the bot leaves the room, and `on_shutdown` when the bot
//! stops.

mod echo;
mod ping;

pub use echo::EchoPlugin;
pub use ping::PingPlugin;

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use tmi_proto::{ClearChatEvent, RoomStateEvent, SubscriberNoticeEvent, TextEvent};

use crate::acl::Acl;
use crate::dictionary::Dictionary;
use crate::sender::Sender;

lazy_static! {
    static ref COMMAND: Regex = Regex::new(r"^!([a-zA-Z0-9_-]+)(?:\s+(.*))?$").unwrap();
}

/// A `!name arg arg...` invocation extracted from a text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    /// Command name, lowercased, without the `!`.
    pub name: String,
    /// Whitespace-split arguments.
    pub args: Vec<String>,
}

impl Command {
    /// Parse a chat line as a command invocation.
    pub fn parse(text: &str) -> Option<Command> {
        let captures = COMMAND.captures(text.trim())?;
        let args = captures
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        Some(Command {
            name: captures[1].to_ascii_lowercase(),
            args,
        })
    }
}

/// Which hooks a plugin's handlers want called.
#[derive(Clone, Copy, Debug, Default)]
pub struct Caps {
    /// Deliver plain chat messages.
    pub text: bool,
    /// Deliver `!command`-style invocations.
    pub commands: bool,
    /// Deliver room metadata updates.
    pub room_state: bool,
    /// Deliver chat clears.
    pub clear_chat: bool,
    /// Deliver subscription announcements.
    pub subscriber_notices: bool,
}

impl Caps {
    /// Commands only.
    pub fn commands() -> Self {
        Caps {
            commands: true,
            ..Caps::default()
        }
    }

    /// Plain text only.
    pub fn text() -> Self {
        Caps {
            text: true,
            ..Caps::default()
        }
    }
}

/// Per-invocation context handed to plugin hooks.
pub struct PluginContext<'a> {
    /// The room the event belongs to.
    pub room: &'a str,
    /// Outbound traffic handle.
    pub sender: &'a Sender,
    /// The room's access control list.
    pub acl: &'a Acl,
    /// The bot-wide dictionary.
    pub dictionary: &'a Dictionary,
}

/// A chat plugin: name, capabilities, and a handler factory.
pub trait Plugin: Send + Sync {
    /// Unique plugin name, used for enable/disable and persistence.
    fn name(&self) -> &'static str;

    /// Which hooks to call on this plugin's handlers.
    fn caps(&self) -> Caps;

    /// Permissions this plugin checks, so operators know what to grant.
    fn permissions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Create the handler instance for one room.
    fn create_handler(&self, room: &str) -> Box<dyn PluginHandler>;
}

/// One plugin's presence in one room. All hooks default to no-ops;
/// implement the ones the plugin's [`Caps`] record enables.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// The plugin was enabled in this room. Also fires once at actor start
    /// when the plugin was enabled in an earlier run.
    async fn on_enable(&mut self, _ctx: &PluginContext<'_>) {}

    /// The plugin was disabled in this room.
    async fn on_disable(&mut self, _ctx: &PluginContext<'_>) {}

    /// The bot is leaving this room.
    async fn on_part(&mut self, _ctx: &PluginContext<'_>) {}

    /// The bot is shutting down.
    async fn on_shutdown(&mut self, _ctx: &PluginContext<'_>) {}

    /// A plain chat message arrived.
    async fn on_text(&mut self, _ctx: &PluginContext<'_>, _text: &TextEvent) {}

    /// A command invocation arrived.
    async fn on_command(
        &mut self,
        _ctx: &PluginContext<'_>,
        _command: &Command,
        _text: &TextEvent,
    ) {
    }

    /// Room metadata changed.
    async fn on_room_state(&mut self, _ctx: &PluginContext<'_>, _state: &RoomStateEvent) {}

    /// Chat was cleared.
    async fn on_clear_chat(&mut self, _ctx: &PluginContext<'_>, _event: &ClearChatEvent) {}

    /// Someone subscribed.
    async fn on_subscriber_notice(
        &mut self,
        _ctx: &PluginContext<'_>,
        _notice: &SubscriberNoticeEvent,
    ) {
    }
}

/// The set of plugins known to the bot. Rooms enable a subset by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in plugins.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PingPlugin));
        registry.register(Arc::new(EchoPlugin));
        registry
    }

    /// Add a plugin. Later registrations with the same name are ignored.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        if self.find(plugin.name()).is_none() {
            self.plugins.push(plugin);
        }
    }

    /// Look a plugin up by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// All registered plugins, in registration order.
    pub fn all(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// All registered plugin names.
    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}
