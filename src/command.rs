//! Shell commands understood by `squirrel-cli`.
//!
//! A [`Command`] is one line of user input resolved to a client call. Lines starting with
//! a dot are meta commands, a few keywords map to document operations, and anything else
//! is sent to the server verbatim as query text.
//!
//! # Example
//! ```rust
//! use squirreldb::Command;
//!
//! let cmd: Command = ".ping".try_into().unwrap();
//! assert_eq!(cmd, Command::Ping);
//!
//! let cmd: Command = r#"db.table("users").run()"#.try_into().unwrap();
//! assert_eq!(cmd, Command::Query(r#"db.table("users").run()"#.to_string()));
//! ```
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `.exit`
    Exit,
    /// `.ping`
    Ping,
    /// `.collections`
    Collections,
    /// Raw query text.
    Query(String),
    Insert {
        collection: String,
        document: Value,
    },
    Update {
        collection: String,
        id: String,
        document: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Change feed for the given query text.
    Subscribe(String),
    /// Ends the active change feed.
    Unsubscribe,
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let line = value.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim_start()),
            None => (line, ""),
        };

        match keyword {
            ".exit" => Ok(Command::Exit),
            ".ping" => Ok(Command::Ping),
            ".collections" => Ok(Command::Collections),
            s if s.starts_with('.') => Err(CommandError::UnrecognizedCommand(s.to_string())),
            "insert" => {
                let (collection, json) = split_word(rest).ok_or_else(insert_usage)?;
                Ok(Command::Insert {
                    collection: collection.to_string(),
                    document: parse_document("insert", json)?,
                })
            }
            "update" => {
                let (collection, rest) = split_word(rest).ok_or_else(update_usage)?;
                let (id, json) = split_word(rest).ok_or_else(update_usage)?;
                Ok(Command::Update {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    document: parse_document("update", json)?,
                })
            }
            "delete" => {
                let parts = rest.split_whitespace().collect::<Vec<&str>>();
                if parts.len() != 2 {
                    return Err(usage(
                        "delete",
                        "requires a collection and a document id. Example: delete users u1",
                    ));
                }
                Ok(Command::Delete {
                    collection: parts[0].to_string(),
                    id: parts[1].to_string(),
                })
            }
            "subscribe" => {
                if rest.is_empty() {
                    return Err(usage(
                        "subscribe",
                        "requires a query. Example: subscribe db.table(\"users\").changes()",
                    ));
                }
                Ok(Command::Subscribe(rest.to_string()))
            }
            "unsubscribe" => Ok(Command::Unsubscribe),
            _ => Ok(Command::Query(line.to_string())),
        }
    }
}

/// Splits off the first whitespace separated word; both halves must be non-empty.
fn split_word(s: &str) -> Option<(&str, &str)> {
    let (word, rest) = s.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    if word.is_empty() || rest.is_empty() {
        return None;
    }
    Some((word, rest))
}

fn parse_document(command: &str, json: &str) -> Result<Value, CommandError> {
    serde_json::from_str(json)
        .map_err(|err| usage(command, &format!("invalid JSON document: {err}")))
}

fn usage(command: &str, reason: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn insert_usage() -> CommandError {
    usage(
        "insert",
        "requires a collection and a JSON document. Example: insert users {\"name\": \"Alice\"}",
    )
}

fn update_usage() -> CommandError {
    usage(
        "update",
        "requires a collection, a document id and a JSON document. Example: update users u1 {\"name\": \"Bob\"}",
    )
}
