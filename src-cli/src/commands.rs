//! Commands read from standard input

use anyhow::{anyhow, bail, Context, Result};
use autosave::{AutosaveService, SaveBackend};
use store::KeyValueStorage;

/// One line of input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Record an edit: `edit <id> <json>`
    Edit {
        id: String,
        payload: serde_json::Value,
    },
    Online,
    Offline,
    Flush,
    Status,
    Pending,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb {
            "edit" => {
                let (id, json) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("usage: edit <id> <json>"))?;
                let payload = serde_json::from_str(json.trim())
                    .with_context(|| format!("invalid JSON payload for {}", id))?;
                Command::Edit {
                    id: id.to_string(),
                    payload,
                }
            }
            "online" => Command::Online,
            "offline" => Command::Offline,
            "flush" => Command::Flush,
            "status" => Command::Status,
            "pending" => Command::Pending,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command: {}", other),
        };
        Ok(Some(command))
    }
}

/// Execute a command. Returns `false` when the session should end.
pub async fn execute<B, S>(service: &AutosaveService<B, S>, command: Command) -> Result<bool>
where
    B: SaveBackend + 'static,
    S: KeyValueStorage + 'static,
{
    match command {
        Command::Edit { id, payload } => service.edit(id, payload),
        Command::Online => service.set_online(true),
        Command::Offline => service.set_online(false),
        Command::Flush => {
            let outcome = service.flush().await;
            println!("{:?}", outcome);
        }
        Command::Status => {
            let info = service.status_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Pending => {
            for item in service.pending_items().await {
                println!("{} #{} {}", item.id, item.seq, item.payload);
            }
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
