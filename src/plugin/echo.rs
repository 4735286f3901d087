//! Echo plugin, mostly useful for exercising the ACL.

use async_trait::async_trait;

use tmi_proto::TextEvent;

use super::{Caps, Command, Plugin, PluginContext, PluginHandler};

/// Repeats the arguments of `!echo` back into the room. Gated by the
/// `echo` permission.
pub struct EchoPlugin;

impl Plugin for EchoPlugin {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn caps(&self) -> Caps {
        Caps::commands()
    }

    fn permissions(&self) -> &'static [&'static str] {
        &["echo"]
    }

    fn create_handler(&self, _room: &str) -> Box<dyn PluginHandler> {
        Box::new(EchoHandler)
    }
}

struct EchoHandler;

#[async_trait]
impl PluginHandler for EchoHandler {
    async fn on_command(&mut self, ctx: &PluginContext<'_>, command: &Command, text: &TextEvent) {
        if command.name != "echo" || command.args.is_empty() {
            return;
        }
        if !ctx.acl.is_allowed(&text.user, "echo") {
            return;
        }
        ctx.sender.say(ctx.room, command.args.join(" "));
    }
}
