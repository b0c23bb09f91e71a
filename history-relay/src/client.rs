use anyhow::{Context, Result};
use rand::Rng;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, protocol::ClientId};

const READ_BUFFER: usize = 1024;

pub async fn run(args: ClientArgs) -> Result<()> {
    let identity = choose_identity(args.id);
    let (mut reader, mut writer) = establish_connection(&args).await?;
    send_handshake(&mut writer, identity).await?;
    info!(%identity, "joined relay");

    let mut stdin = BufReader::new(tokio::io::stdin());
    run_client_loop(&mut reader, &mut writer, &mut stdin).await
}

/// Uses the requested identity when it fits in four digits, otherwise picks
/// a random one.
pub fn choose_identity(requested: Option<i64>) -> ClientId {
    match requested {
        Some(id @ 1..=9999) => ClientId(id as u32),
        _ => ClientId(rand::thread_rng().gen_range(1000..=9999)),
    }
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);
    Ok(stream.into_split())
}

async fn send_handshake(writer: &mut OwnedWriteHalf, identity: ClientId) -> Result<()> {
    writer
        .write_all(format!("{identity}\n").as_bytes())
        .await
        .context("failed to send handshake")?;
    Ok(())
}

async fn run_client_loop(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
) -> Result<()> {
    let mut input = String::new();
    let mut received = vec![0; READ_BUFFER];
    let mut stdin_open = true;

    loop {
        select! {
            bytes_read = reader.read(&mut received) => {
                if !handle_server_bytes(bytes_read, &received).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input), if stdin_open => {
                stdin_open = handle_stdin_input(bytes_read, &input, writer).await?;
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    Ok(())
}

async fn handle_server_bytes(bytes_read: io::Result<usize>, buffer: &[u8]) -> Result<bool> {
    let bytes_read = bytes_read.context("failed to read from relay")?;
    if bytes_read == 0 {
        write_stdout(b"*** server closed the connection\n").await?;
        return Ok(false);
    }

    write_stdout(&buffer[..bytes_read]).await?;
    Ok(true)
}

/// Forwards one stdin line verbatim. Returns `false` once stdin is exhausted,
/// after half-closing the connection so the relay sees the end of input.
async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        if let Err(error) = writer.shutdown().await {
            warn!(?error, "failed to half-close connection");
        }
        return Ok(false);
    }

    writer
        .write_all(input.as_bytes())
        .await
        .context("failed to send line")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await
}
