use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, anyhow};
use connect_four_server::{
    board::{DEFAULT_ROWS, PlayerId},
    game::GameConfig,
    message::{ClientToServer, GameSnapshot, ServerToClient, read_message, write_message},
    server::{Server, ServerConfig},
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Result<Self> {
        Self::start_with(GameConfig::default()).await
    }

    async fn start_with(game: GameConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let config = ServerConfig {
            game,
            ..ServerConfig::new(addr)
        };
        let server = Server::new(listener, &config);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = server.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.task.await;
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Connects, joins, and consumes the welcome, join notice, and first update.
    async fn join(addr: SocketAddr, username: &str) -> Result<(Self, PlayerId)> {
        let mut client = Self::connect(addr).await?;
        client
            .send(&ClientToServer::Join {
                username: username.to_string(),
            })
            .await?;

        let player_id = match client.recv().await? {
            ServerToClient::Welcome {
                player_id,
                username: welcomed,
            } => {
                assert_eq!(welcomed, username);
                player_id
            }
            other => return Err(anyhow!("unexpected handshake response: {other:?}")),
        };
        assert_eq!(
            client.recv().await?,
            ServerToClient::Join {
                message: format!("{username} joined the game")
            }
        );
        client.recv_update().await?;

        Ok((client, player_id))
    }

    async fn send(&mut self, message: &ClientToServer) -> Result<()> {
        write_message(&mut self.writer, message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<ServerToClient> {
        timeout(READ_TIMEOUT, read_message::<_, ServerToClient>(&mut self.reader))
            .await??
            .ok_or_else(|| anyhow!("server closed the connection"))
    }

    async fn recv_update(&mut self) -> Result<GameSnapshot> {
        match self.recv().await? {
            ServerToClient::Update(snapshot) => Ok(snapshot),
            other => Err(anyhow!("expected update, got {other:?}")),
        }
    }

    async fn expect_closed(&mut self) -> Result<()> {
        match timeout(READ_TIMEOUT, read_message::<_, ServerToClient>(&mut self.reader)).await?? {
            None => Ok(()),
            Some(message) => Err(anyhow!("expected close, got {message:?}")),
        }
    }

    async fn expect_silence(&mut self) -> Result<()> {
        match timeout(QUIET_PERIOD, read_message::<_, ServerToClient>(&mut self.reader)).await {
            Err(_) => Ok(()),
            Ok(result) => Err(anyhow!("expected no message, got {result:?}")),
        }
    }
}

/// Starts a server with Alice and Bob seated and both clients drained.
async fn two_player_game() -> Result<(TestServer, Client, PlayerId, Client, PlayerId)> {
    two_player_game_on(GameConfig::default()).await
}

async fn two_player_game_on(
    game: GameConfig,
) -> Result<(TestServer, Client, PlayerId, Client, PlayerId)> {
    let server = TestServer::start_with(game).await?;
    let (mut alice, alice_id) = Client::join(server.addr, "Alice").await?;
    let (bob, bob_id) = Client::join(server.addr, "Bob").await?;

    assert_eq!(
        alice.recv().await?,
        ServerToClient::Join {
            message: "Bob joined the game".into()
        }
    );
    let snapshot = alice.recv_update().await?;
    assert_eq!(snapshot.turn, Some(alice_id.clone()));

    Ok((server, alice, alice_id, bob, bob_id))
}

/// Sends a move and checks that both clients see the notice and the new state.
async fn play(
    mover: &mut Client,
    other: &mut Client,
    mover_name: &str,
    column: i64,
) -> Result<GameSnapshot> {
    mover.send(&ClientToServer::Move { column }).await?;
    let notice = ServerToClient::Move {
        message: format!("{mover_name} dropped a token in column {column}"),
    };
    assert_eq!(mover.recv().await?, notice);
    assert_eq!(other.recv().await?, notice);
    let snapshot = mover.recv_update().await?;
    assert_eq!(other.recv_update().await?, snapshot);
    Ok(snapshot)
}

#[tokio::test]
async fn players_alternate_and_tokens_stack() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, bob_id) = two_player_game().await?;

    let snapshot = play(&mut alice, &mut bob, "Alice", 3).await?;
    assert_eq!(snapshot.board[DEFAULT_ROWS - 1][3], Some(alice_id.clone()));
    assert_eq!(snapshot.turn, Some(bob_id.clone()));

    let snapshot = play(&mut bob, &mut alice, "Bob", 3).await?;
    assert_eq!(snapshot.board[DEFAULT_ROWS - 1][3], Some(alice_id.clone()));
    assert_eq!(snapshot.board[DEFAULT_ROWS - 2][3], Some(bob_id));
    assert_eq!(snapshot.turn, Some(alice_id));
    assert_eq!(
        snapshot
            .players
            .iter()
            .map(|p| p.username.as_str())
            .collect::<Vec<_>>(),
        vec!["Alice", "Bob"]
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn out_of_range_column_is_rejected_without_mutation() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, _) = two_player_game().await?;

    alice.send(&ClientToServer::Move { column: 10 }).await?;
    assert_eq!(
        alice.recv().await?,
        ServerToClient::Error {
            message: "column 10 is out of range".into()
        }
    );
    bob.expect_silence().await?;

    // Alice still holds the turn and the board only gains her next token.
    let snapshot = play(&mut alice, &mut bob, "Alice", 0).await?;
    let occupied = snapshot.board.iter().flatten().filter(|c| c.is_some()).count();
    assert_eq!(occupied, 1);
    assert_eq!(snapshot.board[DEFAULT_ROWS - 1][0], Some(alice_id));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn moves_out_of_turn_are_rejected() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, _) = two_player_game().await?;

    bob.send(&ClientToServer::Move { column: 2 }).await?;
    assert_eq!(
        bob.recv().await?,
        ServerToClient::Error {
            message: "it is not your turn".into()
        }
    );
    alice.expect_silence().await?;

    let snapshot = play(&mut alice, &mut bob, "Alice", 2).await?;
    assert_eq!(snapshot.board[DEFAULT_ROWS - 1][2], Some(alice_id));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn diagonal_run_ends_the_game() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, _) = two_player_game().await?;

    for (alice_column, bob_column) in [(0, 1), (1, 2), (3, 2), (2, 3), (6, 3)] {
        play(&mut alice, &mut bob, "Alice", alice_column).await?;
        play(&mut bob, &mut alice, "Bob", bob_column).await?;
    }

    alice.send(&ClientToServer::Move { column: 3 }).await?;
    let notice = ServerToClient::Move {
        message: "Alice dropped a token in column 3".into(),
    };
    let game_over = ServerToClient::GameOver {
        message: "Alice wins!".into(),
    };
    for client in [&mut alice, &mut bob] {
        assert_eq!(client.recv().await?, notice);
        assert_eq!(client.recv().await?, game_over);
        let snapshot = client.recv_update().await?;
        assert_eq!(snapshot.turn, None);
        assert_eq!(snapshot.board[DEFAULT_ROWS - 4][3], Some(alice_id.clone()));
    }

    bob.send(&ClientToServer::Move { column: 5 }).await?;
    assert!(matches!(bob.recv().await?, ServerToClient::Error { .. }));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn new_game_resets_board_and_keeps_players() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, _) = two_player_game().await?;
    play(&mut alice, &mut bob, "Alice", 4).await?;

    bob.send(&ClientToServer::NewGame).await?;
    let notice = ServerToClient::NewGame {
        message: "Bob started a new game".into(),
    };
    for client in [&mut alice, &mut bob] {
        assert_eq!(client.recv().await?, notice);
        let snapshot = client.recv_update().await?;
        assert!(snapshot.board.iter().flatten().all(Option::is_none));
        assert_eq!(snapshot.turn, Some(alice_id.clone()));
        assert_eq!(snapshot.players.len(), 2);
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn chat_reaches_everyone_but_the_sender() -> Result<()> {
    let (server, mut alice, _, mut bob, _) = two_player_game().await?;

    alice
        .send(&ClientToServer::Chat {
            message: "good luck".into(),
        })
        .await?;
    assert_eq!(
        bob.recv().await?,
        ServerToClient::Chat {
            message: "Alice: good luck".into()
        }
    );
    alice.expect_silence().await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn messages_before_join_are_ignored() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, _) = Client::join(server.addr, "Alice").await?;
    let mut lurker = Client::connect(server.addr).await?;

    lurker
        .send(&ClientToServer::Chat {
            message: "hello?".into(),
        })
        .await?;
    lurker.send(&ClientToServer::Move { column: 0 }).await?;

    alice.expect_silence().await?;
    lurker.expect_silence().await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn malformed_lines_get_an_error_and_keep_the_connection() -> Result<()> {
    let (server, mut alice, _, mut bob, _) = two_player_game().await?;

    alice.writer.write_all(b"{this is not json\n").await?;
    assert!(matches!(alice.recv().await?, ServerToClient::Error { .. }));

    alice
        .send(&ClientToServer::Chat {
            message: "still here".into(),
        })
        .await?;
    assert_eq!(
        bob.recv().await?,
        ServerToClient::Chat {
            message: "Alice: still here".into()
        }
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn invalid_utf8_gets_an_error_and_keeps_the_connection() -> Result<()> {
    let (server, mut alice, _, mut bob, _) = two_player_game().await?;

    alice
        .writer
        .write_all(b"{\"type\":\"chat\",\"message\":\"\xff\xfe\"}\n")
        .await?;
    assert!(matches!(alice.recv().await?, ServerToClient::Error { .. }));
    bob.expect_silence().await?;

    alice
        .send(&ClientToServer::Chat {
            message: "still here".into(),
        })
        .await?;
    assert_eq!(
        bob.recv().await?,
        ServerToClient::Chat {
            message: "Alice: still here".into()
        }
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn full_board_without_a_run_ends_in_a_tie() -> Result<()> {
    let (server, mut alice, _, mut bob, _) =
        two_player_game_on(GameConfig { rows: 4, cols: 4 }).await?;

    // Alice fills the lower half of columns 0 and 2 and the upper half of 1
    // and 3; Bob takes the rest, so no line of four is ever uniform.
    let moves = [0, 1, 0, 1, 1, 0, 1, 0, 2, 3, 2, 3, 3, 2, 3];
    for (turn, column) in moves.into_iter().enumerate() {
        let snapshot = if turn % 2 == 0 {
            play(&mut alice, &mut bob, "Alice", column).await?
        } else {
            play(&mut bob, &mut alice, "Bob", column).await?
        };
        assert!(snapshot.turn.is_some());
    }

    bob.send(&ClientToServer::Move { column: 2 }).await?;
    let notice = ServerToClient::Move {
        message: "Bob dropped a token in column 2".into(),
    };
    let tie = ServerToClient::GameTie {
        message: "The game ended in a tie".into(),
    };
    for client in [&mut alice, &mut bob] {
        assert_eq!(client.recv().await?, notice);
        assert_eq!(client.recv().await?, tie);
        let snapshot = client.recv_update().await?;
        assert_eq!(snapshot.turn, None);
        assert!(snapshot.board.iter().flatten().all(Option::is_some));
    }

    alice.send(&ClientToServer::Move { column: 0 }).await?;
    assert_eq!(
        alice.recv().await?,
        ServerToClient::Error {
            message: "the game is over; start a new game".into()
        }
    );
    bob.expect_silence().await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn third_player_is_turned_away() -> Result<()> {
    let (server, mut alice, _, _bob, _) = two_player_game().await?;

    let mut carol = Client::connect(server.addr).await?;
    carol
        .send(&ClientToServer::Join {
            username: "Carol".into(),
        })
        .await?;
    assert_eq!(
        carol.recv().await?,
        ServerToClient::Error {
            message: "the game already has two players".into()
        }
    );
    carol.expect_closed().await?;
    alice.expect_silence().await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn quitting_turn_holder_clears_the_turn() -> Result<()> {
    let (server, mut alice, alice_id, mut bob, _) = two_player_game().await?;
    play(&mut alice, &mut bob, "Alice", 1).await?;

    bob.send(&ClientToServer::Quit).await?;
    bob.expect_closed().await?;

    assert_eq!(
        alice.recv().await?,
        ServerToClient::Quit {
            message: "Bob left the game".into()
        }
    );
    let snapshot = alice.recv_update().await?;
    assert_eq!(snapshot.turn, None);
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(snapshot.players[0].id, alice_id);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn dropped_connection_frees_the_seat() -> Result<()> {
    let (server, mut alice, alice_id, bob, _) = two_player_game().await?;
    drop(bob);

    assert_eq!(
        alice.recv().await?,
        ServerToClient::Quit {
            message: "Bob disconnected".into()
        }
    );
    let snapshot = alice.recv_update().await?;
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(snapshot.turn, Some(alice_id.clone()));

    // The freed seat can be taken again and Alice keeps the first move.
    let (_carol, carol_id) = Client::join(server.addr, "Carol").await?;
    assert!(matches!(alice.recv().await?, ServerToClient::Join { .. }));
    let snapshot = alice.recv_update().await?;
    assert_eq!(snapshot.turn, Some(alice_id));
    assert_eq!(snapshot.players[1].id, carol_id);

    server.stop().await;
    Ok(())
}
