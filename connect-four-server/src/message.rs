use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{board::PlayerId, error::ProtocolError};

/// Longest inbound line accepted, not counting the final newline.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LINE_ENDINGS: &[u8] = b"\r\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    Join { username: String },
    Move { column: i64 },
    Chat { message: String },
    Quit,
    NewGame,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    Welcome { player_id: PlayerId, username: String },
    Update(GameSnapshot),
    Join { message: String },
    Move { message: String },
    Chat { message: String },
    Quit { message: String },
    NewGame { message: String },
    Error { message: String },
    GameOver { message: String },
    GameTie { message: String },
}

impl ServerToClient {
    pub fn error(err: impl ToString) -> Self {
        ServerToClient::Error {
            message: err.to_string(),
        }
    }
}

/// Board, turn, and seat list as carried by an `update` envelope.
///
/// Row 0 is the top of the board; each cell holds the owning player's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSnapshot {
    pub board: Vec<Vec<Option<PlayerId>>>,
    pub turn: Option<PlayerId>,
    pub players: Vec<PlayerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub username: String,
}

/// Reads the next non-blank line as raw bytes with its line ending stripped.
///
/// Returns `Ok(None)` once the peer has closed the stream. A line longer than
/// [`MAX_FRAME_LEN`] is an `InvalidData` error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    // One JSON object per line; several may arrive in a single segment and the
    // buffered reader hands them out one at a time. Bytes are kept as they
    // arrived so that invalid UTF-8 surfaces as a decode error, not a read error.
    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes = (&mut *reader)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }
        if line.len() > MAX_FRAME_LEN && line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_FRAME_LEN} bytes"),
            ));
        }

        let end = line
            .iter()
            .rposition(|byte| !LINE_ENDINGS.contains(byte))
            .map_or(0, |last| last + 1);
        line.truncate(end);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        return Ok(Some(line));
    }
}

pub fn decode<T>(frame: &[u8]) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_slice(frame)?)
}

/// Serializes `message` as a single newline-terminated JSON line.
pub fn encode<T>(message: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Reads and decodes the next envelope, treating undecodable input as an I/O error.
///
/// Intended for clients; the server decodes frames itself so that a bad line
/// does not end the connection.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(frame) => decode(&frame).map(Some).map_err(to_io_error),
        None => Ok(None),
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode(message).map_err(to_io_error)?;
    write_frame(writer, &encoded).await
}

fn to_io_error<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
