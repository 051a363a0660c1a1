//! Failure isolation around adapter calls.
//!
//! Every adapter method runs through [`Guard`]. A failure is forwarded to the
//! emitter's error channel when a listener is attached; with nobody listening
//! it is logged at error level. Lifecycle calls (`start`/`stop`) have their
//! failure absorbed once a listener took it, every command still returns the
//! error so awaiting call sites observe it.

use async_trait::async_trait;
use gb_core::{
    Ban, CommandOutput, GameKind, Item, MessageOpts, Player, PlayerReference, Position,
    TestReachabilityOutput,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::emitter::Emitter;
use crate::error::{AdapterError, Result};
use crate::surface::{EventSource, GameServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    GetPlayer,
    GetPlayers,
    GetPlayerLocation,
    GetPlayerInventory,
    GiveItem,
    ListItems,
    ExecuteConsoleCommand,
    SendMessage,
    TeleportPlayer,
    TestReachability,
    KickPlayer,
    BanPlayer,
    UnbanPlayer,
    ListBans,
    Shutdown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::GetPlayer => "getPlayer",
            Operation::GetPlayers => "getPlayers",
            Operation::GetPlayerLocation => "getPlayerLocation",
            Operation::GetPlayerInventory => "getPlayerInventory",
            Operation::GiveItem => "giveItem",
            Operation::ListItems => "listItems",
            Operation::ExecuteConsoleCommand => "executeConsoleCommand",
            Operation::SendMessage => "sendMessage",
            Operation::TeleportPlayer => "teleportPlayer",
            Operation::TestReachability => "testReachability",
            Operation::KickPlayer => "kickPlayer",
            Operation::BanPlayer => "banPlayer",
            Operation::UnbanPlayer => "unbanPlayer",
            Operation::ListBans => "listBans",
            Operation::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Guard {
    emitter: Arc<Emitter>,
}

impl Guard {
    pub fn new(emitter: Arc<Emitter>) -> Self {
        Self { emitter }
    }

    pub fn game(&self) -> GameKind {
        self.emitter.game()
    }

    /// Runs a command, reporting any failure and returning it to the caller.
    pub async fn call<T, F>(&self, operation: Operation, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        match fut.await {
            Ok(value) => {
                debug!(
                    game = %self.game(),
                    operation = %operation,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "adapter call completed"
                );
                Ok(value)
            }
            Err(err) => {
                warn!(game = %self.game(), operation = %operation, error = %err, "adapter call failed");
                // Without a listener emit_error logs and hands the error back;
                // either way the caller gets it.
                let _ = self.emitter.emit_error(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Runs a lifecycle call. A failure taken by the error listener counts as handled.
    pub async fn lifecycle<F>(&self, operation: Operation, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match fut.await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(game = %self.game(), operation = %operation, error = %err, "lifecycle call failed");
                self.emitter.emit_error(err).await
            }
        }
    }

    /// Reports a failure raised inside a background driver.
    ///
    /// Returns `true` when an error listener took it and the driver may keep
    /// going; `false` means nobody is watching and the driver must stop.
    pub async fn background(&self, err: AdapterError) -> bool {
        self.emitter.emit_error(err).await.is_ok()
    }
}

/// Decorator routing every method of an adapter through one [`Guard`].
pub struct Guarded<A> {
    inner: A,
    guard: Guard,
}

impl<A: GameServer> Guarded<A> {
    pub fn new(inner: A) -> Self {
        let guard = Guard::new(inner.emitter());
        Self { inner, guard }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: GameServer> EventSource for Guarded<A> {
    fn game(&self) -> GameKind {
        self.inner.game()
    }

    fn emitter(&self) -> Arc<Emitter> {
        self.inner.emitter()
    }

    async fn start(&self) -> Result<()> {
        self.guard
            .lifecycle(Operation::Start, self.inner.start())
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.guard.lifecycle(Operation::Stop, self.inner.stop()).await
    }
}

#[async_trait]
impl<A: GameServer> GameServer for Guarded<A> {
    async fn get_player(&self, player: &PlayerReference) -> Result<Option<Player>> {
        self.guard
            .call(Operation::GetPlayer, self.inner.get_player(player))
            .await
    }

    async fn get_players(&self) -> Result<Vec<Player>> {
        self.guard
            .call(Operation::GetPlayers, self.inner.get_players())
            .await
    }

    async fn get_player_location(&self, player: &PlayerReference) -> Result<Option<Position>> {
        self.guard
            .call(
                Operation::GetPlayerLocation,
                self.inner.get_player_location(player),
            )
            .await
    }

    async fn get_player_inventory(&self, player: &PlayerReference) -> Result<Vec<Item>> {
        self.guard
            .call(
                Operation::GetPlayerInventory,
                self.inner.get_player_inventory(player),
            )
            .await
    }

    async fn give_item(
        &self,
        player: &PlayerReference,
        item: &str,
        amount: u32,
        quality: Option<&str>,
    ) -> Result<()> {
        self.guard
            .call(
                Operation::GiveItem,
                self.inner.give_item(player, item, amount, quality),
            )
            .await
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        self.guard
            .call(Operation::ListItems, self.inner.list_items())
            .await
    }

    async fn execute_console_command(&self, raw_command: &str) -> Result<CommandOutput> {
        self.guard
            .call(
                Operation::ExecuteConsoleCommand,
                self.inner.execute_console_command(raw_command),
            )
            .await
    }

    async fn send_message(&self, message: &str, opts: &MessageOpts) -> Result<()> {
        self.guard
            .call(Operation::SendMessage, self.inner.send_message(message, opts))
            .await
    }

    async fn teleport_player(&self, player: &PlayerReference, position: Position) -> Result<()> {
        self.guard
            .call(
                Operation::TeleportPlayer,
                self.inner.teleport_player(player, position),
            )
            .await
    }

    async fn test_reachability(&self) -> Result<TestReachabilityOutput> {
        self.guard
            .call(Operation::TestReachability, self.inner.test_reachability())
            .await
    }

    async fn kick_player(&self, player: &PlayerReference, reason: &str) -> Result<()> {
        self.guard
            .call(Operation::KickPlayer, self.inner.kick_player(player, reason))
            .await
    }

    async fn ban_player(&self, ban: &Ban) -> Result<()> {
        self.guard
            .call(Operation::BanPlayer, self.inner.ban_player(ban))
            .await
    }

    async fn unban_player(&self, player: &PlayerReference) -> Result<()> {
        self.guard
            .call(Operation::UnbanPlayer, self.inner.unban_player(player))
            .await
    }

    async fn list_bans(&self) -> Result<Vec<Ban>> {
        self.guard
            .call(Operation::ListBans, self.inner.list_bans())
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        self.guard
            .call(Operation::Shutdown, self.inner.shutdown())
            .await
    }
}
