//! Scripted chat server and bot process management.
//!
//! Tests bind a local listener, spawn the bot binary pointed at it, and
//! then assert on the exact lines the bot writes while feeding it scripted
//! server traffic.

use std::process::{Child, Command};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

/// How long to wait for a single expected line.
const LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// A listener standing in for the chat server.
pub struct TestServer {
    listener: TcpListener,
    port: u16,
}

impl TestServer {
    /// Bind on an ephemeral local port.
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the bot to connect.
    pub async fn accept(&self) -> anyhow::Result<BotConnection> {
        let (stream, _) = tokio::time::timeout(LINE_TIMEOUT, self.listener.accept()).await??;
        let (read, write) = stream.into_split();
        Ok(BotConnection {
            lines: BufReader::new(read).lines(),
            write,
        })
    }
}

/// One accepted bot connection.
pub struct BotConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl BotConnection {
    /// Read the next line the bot sent.
    pub async fn next_line(&mut self) -> anyhow::Result<String> {
        let line = tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line())
            .await??
            .ok_or_else(|| anyhow::anyhow!("bot closed the connection"))?;
        Ok(line.trim_end().to_owned())
    }

    /// Assert the next line is exactly `expected`.
    pub async fn expect(&mut self, expected: &str) -> anyhow::Result<()> {
        let line = self.next_line().await?;
        anyhow::ensure!(line == expected, "expected {expected:?}, bot sent {line:?}");
        Ok(())
    }

    /// Send one line of server traffic.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.write.write_all(line.as_bytes()).await?;
        self.write.write_all(b"\r\n").await?;
        self.write.flush().await?;
        Ok(())
    }

    /// Drive the login and capability handshake: assert the PASS/NICK/USER
    /// sequence, answer with the welcome numeric, assert the capability
    /// requests, and acknowledge them.
    pub async fn complete_handshake(&mut self, username: &str) -> anyhow::Result<()> {
        self.expect("PASS oauth:integration").await?;
        self.expect(&format!("NICK {username}")).await?;
        self.expect(&format!("USER {username} 8 * :{username}"))
            .await?;

        self.send(&format!(":tmi.twitch.tv 001 {username} :Welcome, GLHF!"))
            .await?;

        for cap in ["membership", "commands", "tags"] {
            self.expect(&format!("CAP REQ :twitch.tv/{cap}")).await?;
            self.send(&format!(":tmi.twitch.tv CAP * ACK :twitch.tv/{cap}"))
                .await?;
        }
        Ok(())
    }

    /// Acknowledge a JOIN the bot requested by echoing it back.
    pub async fn echo_join(&mut self, username: &str, room: &str) -> anyhow::Result<()> {
        self.expect(&format!("JOIN #{room}")).await?;
        self.send(&format!(":{username}!{username}@{username}.tmi.twitch.tv JOIN #{room}"))
            .await?;
        Ok(())
    }
}

/// A running bot process with its scratch directory.
pub struct BotProcess {
    child: Child,
    _dir: tempfile::TempDir,
}

impl BotProcess {
    /// Write a config pointing at the given server port and spawn the bot.
    pub fn spawn(port: u16, username: &str, operator: &str) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("config.toml");
        let config = format!(
            r#"
[account]
username = "{username}"
password = "oauth:integration"
operator = "{operator}"

[server]
host = "127.0.0.1"
port = {port}
send_delay_ms = 0

[database]
path = "{}/bot.db"
"#,
            dir.path().display()
        );
        std::fs::write(&config_path, config)?;

        let child = Command::new(env!("CARGO_BIN_EXE_kappabot"))
            .arg(&config_path)
            .env("RUST_LOG", "debug")
            .spawn()?;

        Ok(Self { child, _dir: dir })
    }
}

impl Drop for BotProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
