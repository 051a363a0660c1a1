use async_trait::async_trait;
use gb_core::{
    Ban, CommandOutput, GameKind, Item, MessageOpts, Player, PlayerReference, Position,
    TestReachabilityOutput,
};
use std::sync::Arc;

use crate::emitter::Emitter;
use crate::error::Result;

/// Lifecycle of the live event feed, shared by every adapter.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn game(&self) -> GameKind;

    fn emitter(&self) -> Arc<Emitter>;

    /// Opens the transport and starts publishing events on the emitter.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// The command surface every adapter implements.
///
/// Console-backed adapters implement the higher-level commands by formatting
/// a native command and delegating to `execute_console_command`.
#[async_trait]
pub trait GameServer: EventSource {
    async fn get_player(&self, player: &PlayerReference) -> Result<Option<Player>>;

    async fn get_players(&self) -> Result<Vec<Player>>;

    async fn get_player_location(&self, player: &PlayerReference) -> Result<Option<Position>>;

    async fn get_player_inventory(&self, player: &PlayerReference) -> Result<Vec<Item>>;

    async fn give_item(
        &self,
        player: &PlayerReference,
        item: &str,
        amount: u32,
        quality: Option<&str>,
    ) -> Result<()>;

    async fn list_items(&self) -> Result<Vec<Item>>;

    /// Backend failures come back as `CommandOutput { success: false, .. }`.
    async fn execute_console_command(&self, raw_command: &str) -> Result<CommandOutput>;

    async fn send_message(&self, message: &str, opts: &MessageOpts) -> Result<()>;

    async fn teleport_player(&self, player: &PlayerReference, position: Position) -> Result<()>;

    async fn test_reachability(&self) -> Result<TestReachabilityOutput>;

    async fn kick_player(&self, player: &PlayerReference, reason: &str) -> Result<()>;

    async fn ban_player(&self, ban: &Ban) -> Result<()>;

    async fn unban_player(&self, player: &PlayerReference) -> Result<()>;

    async fn list_bans(&self) -> Result<Vec<Ban>>;

    async fn shutdown(&self) -> Result<()>;
}
