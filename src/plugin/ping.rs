//! Liveness check plugin.

use async_trait::async_trait;

use tmi_proto::TextEvent;

use super::{Caps, Command, Plugin, PluginContext, PluginHandler};

/// Replies to `!ping` with `pong`. Open to everyone.
pub struct PingPlugin;

impl Plugin for PingPlugin {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn caps(&self) -> Caps {
        Caps::commands()
    }

    fn create_handler(&self, _room: &str) -> Box<dyn PluginHandler> {
        Box::new(PingHandler)
    }
}

struct PingHandler;

#[async_trait]
impl PluginHandler for PingHandler {
    async fn on_command(&mut self, ctx: &PluginContext<'_>, command: &Command, _text: &TextEvent) {
        if command.name == "ping" {
            ctx.sender.say(ctx.room, "pong");
        }
    }
}
