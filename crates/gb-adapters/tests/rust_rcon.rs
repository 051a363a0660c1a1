mod support;

use gb_adapters::reachability::Unreachable;
use gb_adapters::{AdapterError, EventSource, GameServer, RustRcon};
use gb_core::{
    Ban, ChatChannel, EventName, GameEvent, GameKind, MessageOpts, Player, PlayerReference,
    Position,
};
use serde_json::json;
use support::{collect_all, collect_errors, fast_settings, next, FakeRust};
use time::OffsetDateTime;

const EMIEL: &str = "76561198035925898";

fn emiel_online() -> String {
    json!([{
        "SteamID": EMIEL,
        "OwnerSteamID": "0",
        "DisplayName": "Emiel",
        "Ping": 12,
        "Address": "10.0.0.3:51234",
        "ConnectedSeconds": 120,
        "Health": 100.0,
    }])
    .to_string()
}

#[tokio::test]
async fn test_join_line_becomes_player_connected() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let mut events = collect_all(&adapter.emitter());

    adapter.start().await?;
    fake.wait_connected().await;
    let line = format!("10.0.0.3:51234/{EMIEL}/Emiel joined [windows/{EMIEL}]");
    fake.push_line(&line);

    match next(&mut events).await {
        GameEvent::PlayerConnected(e) => {
            assert_eq!(e.player.game_id, EMIEL);
            assert_eq!(e.player.steam_id.as_deref(), Some(EMIEL));
            assert_eq!(e.player.ip.as_deref(), Some("10.0.0.3"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match next(&mut events).await {
        GameEvent::LogLine(raw) => assert_eq!(raw.msg, line),
        other => panic!("unexpected {other:?}"),
    }

    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_chat_frame_becomes_chat_message() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let mut events = collect_all(&adapter.emitter());
    adapter.start().await?;
    fake.wait_connected().await;

    fake.push_chat(EMIEL, "Emiel", "anyone got wood?", 1);
    match next(&mut events).await {
        GameEvent::ChatMessage(chat) => {
            assert_eq!(chat.msg, "anyone got wood?");
            assert_eq!(chat.channel, ChatChannel::Team);
            assert_eq!(chat.player.map(|p| p.game_id).as_deref(), Some(EMIEL));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(next(&mut events).await.name(), EventName::LogLine);

    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_item_given_resolves_player_by_name() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    fake.reply("playerlist", &emiel_online());
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let mut events = collect_all(&adapter.emitter());
    adapter.start().await?;
    fake.wait_connected().await;

    fake.push_line("[ServerVar] giving Emiel 1000 x Wood");
    match next(&mut events).await {
        GameEvent::ItemGivenTo(e) => {
            assert_eq!(e.player.game_id, EMIEL);
            assert_eq!(e.item, "Wood");
            assert_eq!(e.amount, 1000);
        }
        other => panic!("unexpected {other:?}"),
    }

    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_player_reports_parse_error_and_keeps_raw_line() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    fake.reply("playerlist", "[]");
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let mut events = collect_all(&adapter.emitter());
    let mut errors = collect_errors(&adapter.emitter());
    adapter.start().await?;
    fake.wait_connected().await;

    fake.push_line("[ServerVar] giving Ghost 1 x Stones");
    match next(&mut events).await {
        GameEvent::LogLine(raw) => assert_eq!(raw.msg, "[ServerVar] giving Ghost 1 x Stones"),
        other => panic!("unexpected {other:?}"),
    }
    match next(&mut errors).await {
        AdapterError::Parse(err) => assert_eq!(err.game(), GameKind::Rust),
        other => panic!("unexpected {other:?}"),
    }

    // The stream is still alive after a handled error.
    fake.push_line("some unrelated console output");
    assert_eq!(next(&mut events).await.name(), EventName::LogLine);

    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_ban_uses_whole_hours() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());

    let timed = Ban {
        player: Player::new(EMIEL, "Emiel"),
        reason: "cheating".into(),
        expires_at: Some(OffsetDateTime::now_utc() + time::Duration::days(2)),
    };
    adapter.ban_player(&timed).await?;
    let permanent = Ban {
        expires_at: None,
        ..timed
    };
    adapter.ban_player(&permanent).await?;
    adapter.unban_player(&PlayerReference::new(EMIEL)).await?;

    assert_eq!(
        fake.commands(),
        vec![
            format!("banid \"{EMIEL}\" \"Emiel\" \"cheating\" 48"),
            format!("banid \"{EMIEL}\" \"Emiel\" \"cheating\""),
            format!("unban \"{EMIEL}\""),
        ]
    );
    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_console_surface_commands() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let emiel = PlayerReference::new(EMIEL);

    adapter.send_message("hi \"all\"", &MessageOpts::default()).await?;
    adapter.give_item(&emiel, "rifle.ak", 1, None).await?;
    adapter
        .teleport_player(&emiel, Position::new(10.0, 20.5, -3.0))
        .await?;
    adapter.kick_player(&emiel, "afk").await?;
    adapter.shutdown().await?;

    assert_eq!(
        fake.commands(),
        vec![
            "say \"hi 'all'\"".to_string(),
            format!("inventory.giveto \"{EMIEL}\" \"rifle.ak\" 1"),
            format!("teleportpos \"10,20.5,-3\" \"{EMIEL}\""),
            format!("kick \"{EMIEL}\" \"afk\""),
            "quit".to_string(),
        ]
    );
    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_operations_without_console_equivalent_are_unsupported() {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());
    let emiel = PlayerReference::new(EMIEL);

    for err in [
        adapter.list_items().await.unwrap_err(),
        adapter.get_player_inventory(&emiel).await.unwrap_err(),
        adapter
            .send_message("psst", &MessageOpts::to(emiel.clone()))
            .await
            .unwrap_err(),
    ] {
        assert!(matches!(err, AdapterError::Unsupported { game: GameKind::Rust, .. }));
    }
    assert!(fake.commands().is_empty());
}

#[tokio::test]
async fn test_players_and_location() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    fake.reply("playerlist", &emiel_online());
    fake.reply(
        "playerlistpos",
        &format!(
            "SteamID           DisplayName POS                        ROT\n\
             {EMIEL} Emiel       (-12.5, 3.0, 88.25)       (0.0, 1.0, 0.0)\n"
        ),
    );
    let adapter = RustRcon::new(fake.info(), fast_settings());

    let players = adapter.get_players().await?;
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].name, "Emiel");

    let position = adapter
        .get_player_location(&PlayerReference::new(EMIEL))
        .await?;
    assert_eq!(position, Some(Position::new(-12.5, 3.0, 88.25)));
    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_reachability_over_websocket() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let adapter = RustRcon::new(fake.info(), fast_settings());

    let output = adapter.test_reachability().await?;
    assert!(output.connectable, "{output:?}");
    let mut commands = fake.commands();
    commands.sort();
    assert_eq!(commands, vec!["echo reachability", "serverinfo"]);
    adapter.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_reachability_with_wrong_password_gets_no_response() -> anyhow::Result<()> {
    let fake = FakeRust::start().await;
    let mut info = fake.info();
    info.rcon_password = "nope".into();
    let adapter = RustRcon::new(info, fast_settings());

    let output = adapter.test_reachability().await?;
    assert!(!output.connectable);
    assert_eq!(output.reason.as_deref(), Some(Unreachable::NoResponse.reason()));
    Ok(())
}
