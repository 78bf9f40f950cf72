use std::{env, path::PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::UnixStream,
};
use uuid::Uuid;

const USAGE: &str = "usage: eipkeeper-cli [--socket-path <path>] <start|stop|status> <session-id> [--region <region>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    socket_path: PathBuf,
    command: Command,
    session_id: String,
    region: Option<String>,
}

fn cli_options_from_args() -> Result<CliOptions> {
    parse_cli_options(env::args().skip(1))
}

fn parse_cli_options<I>(mut args: I) -> Result<CliOptions>
where
    I: Iterator<Item = String>,
{
    let mut socket_path = PathBuf::from("./eipkeeper.sock");
    let mut region = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--socket-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --socket-path"))?;
                socket_path = PathBuf::from(value);
            }
            "--region" => {
                region = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("missing value for --region"))?,
                );
            }
            other if other.starts_with("--") => {
                bail!("unknown argument: {other}. {USAGE}");
            }
            _ => positional.push(arg),
        }
    }

    let [command, session_id] = <[String; 2]>::try_from(positional)
        .map_err(|_| anyhow!("expected a command and a session id. {USAGE}"))?;
    let command = match command.as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        other => bail!("unknown command: {other}. {USAGE}"),
    };
    if session_id.trim().is_empty() {
        bail!("session id cannot be empty");
    }

    Ok(CliOptions {
        socket_path,
        command,
        session_id,
        region,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientRequest {
    Start {
        request_id: String,
        session_id: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
        region: String,
    },
    Stop {
        request_id: String,
        session_id: String,
    },
    Status {
        request_id: String,
        session_id: String,
    },
}

fn build_request<F>(options: &CliOptions, lookup: F) -> Result<ClientRequest>
where
    F: Fn(&str) -> Option<String>,
{
    let request_id = format!("cli:{}", Uuid::new_v4());
    let session_id = options.session_id.clone();
    let request = match options.command {
        Command::Start => {
            let required = |name: &str| {
                lookup(name)
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| anyhow!("{name} must be set to start a session"))
            };
            let region = match &options.region {
                Some(region) => region.clone(),
                None => required("AWS_REGION")?,
            };
            ClientRequest::Start {
                request_id,
                session_id,
                access_key_id: required("AWS_ACCESS_KEY_ID")?,
                secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
                session_token: lookup("AWS_SESSION_TOKEN"),
                region,
            }
        }
        Command::Stop => ClientRequest::Stop {
            request_id,
            session_id,
        },
        Command::Status => ClientRequest::Status {
            request_id,
            session_id,
        },
    };
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli_options_from_args()?;
    let request = build_request(&options, |name| env::var(name).ok())?;

    let stream = UnixStream::connect(&options.socket_path)
        .await
        .with_context(|| {
            format!(
                "failed to connect to eipkeeper socket {}",
                options.socket_path.display()
            )
        })?;
    let (read_half, mut write_half) = stream.into_split();
    send_request(&mut write_half, &request).await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response: serde_json::Value =
            serde_json::from_str(trimmed).context("failed to decode NDJSON response")?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        if response.get("type").and_then(|value| value.as_str()) == Some("error") {
            bail!(
                "request failed: {}",
                response
                    .get("message")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown error")
            );
        }
        return Ok(());
    }

    Err(anyhow!("server closed the connection without a response"))
}

async fn send_request<W>(writer: &mut W, request: &ClientRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = serde_json::to_string(request)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
