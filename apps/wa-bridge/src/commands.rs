//! Line commands read from stdin while the bridge runs.

use std::path::Path;

use crmlink_protocol::MediaSource;
use crmlink_wa_connection::ConnectionManager;

pub const HELP: &str = "\
commands:
  status                                  connection status
  qr                                      current pairing challenge
  connect                                 open the session if not connected
  send <number|jid> <text...>             send a text message
  media <number|jid> <mimetype> <path|url> [caption...]
                                          send a file or remote media
  check <number|jid>                      is the address on WhatsApp
  clear                                   log out and wipe auth
  help                                    this text";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Qr,
    Connect,
    Send {
        to: String,
        text: String,
    },
    Media {
        to: String,
        mimetype: String,
        location: String,
        caption: Option<String>,
    },
    Check {
        to: String,
    },
    Clear,
    Help,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match verb {
        "status" => Command::Status,
        "qr" => Command::Qr,
        "connect" => Command::Connect,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "check" => {
            let (to, _) = split_word(rest).ok_or("usage: check <number|jid>")?;
            Command::Check { to: to.into() }
        }
        "send" => {
            let (to, text) = split_word(rest).ok_or("usage: send <number|jid> <text...>")?;
            if text.is_empty() {
                return Err("usage: send <number|jid> <text...>".into());
            }
            Command::Send {
                to: to.into(),
                text: text.into(),
            }
        }
        "media" => {
            const USAGE: &str = "usage: media <number|jid> <mimetype> <path|url> [caption...]";
            let (to, rest) = split_word(rest).ok_or(USAGE)?;
            let (mimetype, rest) = split_word(rest).ok_or(USAGE)?;
            let (location, caption) = split_word(rest).ok_or(USAGE)?;
            Command::Media {
                to: to.into(),
                mimetype: mimetype.into(),
                location: location.into(),
                caption: (!caption.is_empty()).then(|| caption.to_string()),
            }
        }
        other => return Err(format!("unknown command `{other}`, try `help`")),
    };
    Ok(Some(command))
}

/// Splits off the first whitespace-delimited word.
fn split_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((s, "")),
    }
}

/// Parses and executes one line, printing the outcome.
pub async fn run(manager: &ConnectionManager, line: &str) {
    match parse(line) {
        Ok(Some(command)) => {
            if let Err(e) = execute(manager, command).await {
                println!("error: {e:#}");
            }
        }
        Ok(None) => {}
        Err(usage) => println!("{usage}"),
    }
}

async fn execute(manager: &ConnectionManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => print_json(&manager.get_status().await)?,
        Command::Qr => match manager.get_pairing_challenge().await {
            Some(code) => println!("{}", crate::render_qr(&code)?),
            None => println!("no pairing challenge pending"),
        },
        Command::Connect => {
            let status = manager.initialize().await?;
            println!("{status}");
        }
        Command::Send { to, text } => print_json(&manager.send_text(&to, text).await?)?,
        Command::Media {
            to,
            mimetype,
            location,
            caption,
        } => {
            let (source, file_name) = media_source(&location)?;
            let receipt = manager
                .send_media(&to, source, mimetype, caption, file_name)
                .await?;
            print_json(&receipt)?;
        }
        Command::Check { to } => print_json(&manager.is_registered(&to).await?)?,
        Command::Clear => print_json(&manager.clear_session().await)?,
        Command::Help => println!("{HELP}"),
    }
    Ok(())
}

/// Remote URLs are passed through; anything else is read as a local file.
fn media_source(location: &str) -> anyhow::Result<(MediaSource, Option<String>)> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok((MediaSource::Url(location.into()), None));
    }
    let path = Path::new(location);
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    Ok((MediaSource::Bytes(bytes), file_name))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
