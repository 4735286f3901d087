//! The bot orchestrator.
//!
//! Owns the client, the room table, and the routing loop. Every inbound
//! event is fanned out to dispatcher listeners and then delivered to the
//! actor of the room it belongs to. Room membership changes only here:
//! `join` spawns the actor and queues the wire request, the PART echo
//! retires the actor, and a watcher task drops the table entry of any
//! actor that dies on its own.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tmi_proto::{normalize_room, InboundEvent, Message, OutboundEvent, TextEvent};

use crate::client::Client;
use crate::config::Config;
use crate::db::Database;
use crate::dictionary::Dictionary;
use crate::dispatcher::Dispatcher;
use crate::error::{BotError, Result};
use crate::plugin::{Command, PluginRegistry};
use crate::queue::Receipt;
use crate::room::{self, RoomHandle};
use crate::sender::Sender;
use crate::signal::{signal, Signal, SignalHandle};

/// How long shutdown waits for the room actors and the farewell line.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Chat bot: connection, room table, and routing.
pub struct Bot {
    config: Config,
    client: Client,
    sender: Sender,
    db: Database,
    dictionary: Arc<Dictionary>,
    registry: Arc<PluginRegistry>,
    dispatcher: Arc<Dispatcher>,
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
    rooms_shutdown_handle: SignalHandle,
    rooms_shutdown: Signal,
    home: String,
}

impl Bot {
    /// Build a bot: open the database, load the dictionary, prepare the
    /// client. No connection is made until [`Bot::run`].
    pub async fn new(config: Config, registry: PluginRegistry) -> Result<Self> {
        let db = Database::connect(&config.database.path).await?;
        let dictionary = Arc::new(Dictionary::load(db.clone()).await?);
        let client = Client::new(&config);
        let sender = client.sender();
        let home = config.home_room();
        let (rooms_shutdown_handle, rooms_shutdown) = signal();

        Ok(Bot {
            config,
            client,
            sender,
            db,
            dictionary,
            registry: Arc::new(registry),
            dispatcher: Arc::new(Dispatcher::new()),
            rooms: Arc::new(Mutex::new(HashMap::new())),
            rooms_shutdown_handle,
            rooms_shutdown,
            home,
        })
    }

    /// The bot-level event dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Outbound traffic handle.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// The shared dictionary.
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// The home room's canonical name.
    pub fn home_room(&self) -> &str {
        &self.home
    }

    /// Canonical names of currently joined rooms, sorted.
    pub fn joined(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Join a room: spawn its actor, persist it, queue the wire request.
    /// Joining a room twice yields a negative receipt.
    pub async fn join(&self, name: &str) -> Result<Receipt> {
        let name = normalize_room(name);
        if self.rooms.lock().contains_key(&name) {
            debug!(room = %name, "join refused, already joined");
            return Ok(Receipt::resolved(false));
        }

        let handle = room::spawn(
            &name,
            self.registry.clone(),
            self.sender.clone(),
            self.db.clone(),
            &self.config.account.operator,
            self.dictionary.clone(),
            self.rooms_shutdown.clone(),
        )
        .await?;

        // Persist before registering, so a failed write leaves no entry.
        self.db.channels().add(&name).await?;

        match self.rooms.lock().entry(name.clone()) {
            Entry::Occupied(_) => {
                // Lost a race against a concurrent join; the incumbent
                // keeps the room and the fresh handle drops, stopping its
                // actor.
                return Ok(Receipt::resolved(false));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }
        self.watch_actor(&name, &handle);

        Ok(self.client.send(OutboundEvent::Join(name)))
    }

    /// Drop the table entry when the actor stops, unless a newer actor has
    /// taken the room over in the meantime.
    fn watch_actor(&self, name: &str, handle: &RoomHandle) {
        let rooms = self.rooms.clone();
        let name = name.to_owned();
        let handle = handle.clone();
        let alive = handle.alive();
        tokio::spawn(async move {
            alive.wait().await;
            let mut rooms = rooms.lock();
            if rooms.get(&name).is_some_and(|h| h.same_actor(&handle)) {
                rooms.remove(&name);
                debug!(room = %name, "room actor retired");
            }
        });
    }

    /// Leave a room. The home room can never be left.
    pub async fn part(&self, name: &str) -> Result<Receipt> {
        let name = normalize_room(name);
        if name == self.home {
            warn!(room = %name, "part refused, home room");
            return Ok(Receipt::resolved(false));
        }
        if !self.rooms.lock().contains_key(&name) {
            return Ok(Receipt::resolved(false));
        }

        self.db.channels().remove(&name).await?;
        Ok(self.client.send(OutboundEvent::Part(name)))
    }

    /// Enable a plugin in a joined room.
    pub async fn enable_plugin(&self, room: &str, plugin: &str) -> Result<bool> {
        self.room_handle(room)?.enable_plugin(plugin).await
    }

    /// Disable a plugin in a joined room.
    pub async fn disable_plugin(&self, room: &str, plugin: &str) -> Result<bool> {
        self.room_handle(room)?.disable_plugin(plugin).await
    }

    fn room_handle(&self, room: &str) -> Result<RoomHandle> {
        let room = normalize_room(room);
        self.rooms
            .lock()
            .get(&room)
            .cloned()
            .ok_or(BotError::RoomClosed(room))
    }

    /// Connect and run until the connection dies or the process is told
    /// to stop.
    pub async fn run(&self) -> Result<()> {
        let mut conn = self.client.connect().await?;

        tokio::select! {
            _ = conn.ready.wait() => {}
            _ = conn.alive.wait() => return Err(BotError::NotConnected),
        }

        self.join_initial_rooms().await?;

        loop {
            tokio::select! {
                maybe = conn.events.recv() => match maybe {
                    Some(event) => self.route(event).await,
                    None => break,
                },
                _ = conn.alive.wait() => {
                    info!("connection lost, stopping");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Home room first, then configured rooms, then rooms remembered in
    /// the database. Duplicates collapse.
    async fn join_initial_rooms(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut initial = vec![self.home.clone()];
        initial.extend(self.config.rooms.iter().map(|r| normalize_room(r)));
        initial.extend(self.db.channels().list().await?);

        for name in initial {
            if seen.insert(name.clone()) {
                self.join(&name).await?;
            }
        }

        info!(rooms = seen.len(), "initial rooms joined");
        Ok(())
    }

    async fn route(&self, event: InboundEvent) {
        self.dispatcher.fire(&event);

        if let InboundEvent::Part { room } = &event {
            let handle = self.rooms.lock().remove(room);
            if let Some(handle) = handle {
                let _ = handle.deliver(event).await;
            }
            return;
        }

        if let InboundEvent::Text(text) = &event {
            if text.room == self.home && self.handle_home_command(text).await {
                return;
            }
        }

        let handle = self.rooms.lock().get(event.room()).cloned();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.deliver(event).await {
                    warn!(error = %e, "event delivery failed");
                }
            }
            None => debug!(room = %event.room(), "dropping event for unjoined room"),
        }
    }

    /// Bot-level commands, accepted in the home room from the operator or
    /// the bot account itself. Returns whether the message was consumed.
    async fn handle_home_command(&self, text: &TextEvent) -> bool {
        let Some(command) = Command::parse(&text.text) else {
            return false;
        };
        let name = text.user.name.to_ascii_lowercase();
        if name != self.config.account.operator.to_ascii_lowercase() && name != self.home {
            return false;
        }

        match (command.name.as_str(), command.args.as_slice()) {
            ("join", [room]) => {
                let room_name = normalize_room(room);
                if self.rooms.lock().contains_key(&room_name) {
                    self.sender
                        .say(&self.home, format!("already in {room_name}"));
                } else {
                    match self.join(room).await {
                        Ok(_) => {
                            self.sender.say(&self.home, format!("joining {room_name}"));
                        }
                        Err(e) => warn!(room = %room_name, error = %e, "join failed"),
                    }
                }
                true
            }
            ("part", [room]) => {
                let room_name = normalize_room(room);
                if room_name == self.home {
                    self.sender.say(&self.home, "cannot leave the home room");
                } else if !self.rooms.lock().contains_key(&room_name) {
                    self.sender.say(&self.home, format!("not in {room_name}"));
                } else {
                    match self.part(room).await {
                        Ok(_) => {
                            self.sender.say(&self.home, format!("leaving {room_name}"));
                        }
                        Err(e) => warn!(room = %room_name, error = %e, "part failed"),
                    }
                }
                true
            }
            ("rooms", _) => {
                self.sender
                    .say(&self.home, format!("joined rooms: {}", self.joined().join(", ")));
                true
            }
            _ => false,
        }
    }

    /// Stop the room actors, queue the farewell, then cut the line. Every
    /// actor gets its shutdown notice and the barrier waits until all have
    /// confirmed, so no handler hook is cut short.
    async fn shutdown(&self) {
        info!("shutting down");

        let handles: Vec<RoomHandle> = self.rooms.lock().values().cloned().collect();
        self.rooms_shutdown_handle.fire();
        let barrier = async {
            for handle in &handles {
                handle.alive().wait().await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, barrier).await.is_err() {
            warn!("room actors did not stop in time");
        }

        if self.client.is_connected() {
            let receipt = self.client.send(OutboundEvent::Raw(Message::with_trailing(
                "QUIT",
                vec![],
                "bye",
            )));
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, receipt.wait()).await;
        }
        self.client.disconnect().await;
    }
}
