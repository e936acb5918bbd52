//! Console command parsing for the interactive shell.
//!
//! `ConsoleCommand` is the text interface of the binary. Writes always go to
//! the primary; reads and status can target any node.

use anyhow::{anyhow, Context, Result};

use crate::message::ReplicaId;

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Insert { key: String, value: String },
    Remove { key: String },
    Get { key: String, node: Option<ReplicaId> },
    Status { node: Option<ReplicaId> },
    Join,
    Leave { node: ReplicaId },
    Exit,
    Help,
}

pub const HELP: &str = "\
INSERT/i <key> <value>  write to the primary
REMOVE/r <key>          delete on the primary
GET/g <key> [node]      read from the primary or the given node
STATUS/s [node]         show every node, or one
JOIN/j                  start a new secondary
LEAVE/l <node>          remove a secondary
HELP/h                  show this help
EXIT/e                  stop the cluster";

impl ConsoleCommand {
    /// Parses a line of user input. Command words are case-insensitive and
    /// accept single-letter aliases; keys and values are kept verbatim.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "I" => "INSERT",
            "R" => "REMOVE",
            "G" => "GET",
            "S" => "STATUS",
            "J" => "JOIN",
            "L" => "LEAVE",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized_cmd, parts.len()) {
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("JOIN", 1) => Ok(ConsoleCommand::Join),
            ("STATUS", 1) => Ok(ConsoleCommand::Status { node: None }),
            ("STATUS", 2) => Ok(ConsoleCommand::Status {
                node: Some(parse_node(parts[1])?),
            }),
            ("INSERT", 3) => Ok(ConsoleCommand::Insert {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            }),
            ("REMOVE", 2) => Ok(ConsoleCommand::Remove {
                key: parts[1].to_string(),
            }),
            ("GET", 2) => Ok(ConsoleCommand::Get {
                key: parts[1].to_string(),
                node: None,
            }),
            ("GET", 3) => Ok(ConsoleCommand::Get {
                key: parts[1].to_string(),
                node: Some(parse_node(parts[2])?),
            }),
            ("LEAVE", 2) => Ok(ConsoleCommand::Leave {
                node: parse_node(parts[1])?,
            }),
            ("INSERT", _) => Err(anyhow!(
                "INSERT requires exactly two arguments: INSERT <key> <value>"
            )),
            ("REMOVE", _) => Err(anyhow!("REMOVE requires exactly one argument: REMOVE <key>")),
            ("GET", _) => Err(anyhow!(
                "GET requires a key and optionally a node: GET <key> [node]"
            )),
            ("LEAVE", _) => Err(anyhow!("LEAVE requires exactly one argument: LEAVE <node>")),
            ("STATUS", _) => Err(anyhow!("STATUS takes at most one argument: STATUS [node]")),
            ("EXIT" | "HELP" | "JOIN", _) => Err(anyhow!("{normalized_cmd} takes no arguments")),
            _ => Err(anyhow!(
                "invalid command. Try: INSERT/i, REMOVE/r, GET/g, STATUS/s, JOIN/j, LEAVE/l, HELP/h, EXIT/e"
            )),
        }
    }
}

fn parse_node(raw: &str) -> Result<ReplicaId> {
    let id = raw
        .parse::<u64>()
        .with_context(|| format!("node must be a numeric id, got '{raw}'"))?;
    Ok(ReplicaId(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("HELP"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("join"), Ok(ConsoleCommand::Join)));
        assert!(matches!(
            ConsoleCommand::parse("status"),
            Ok(ConsoleCommand::Status { node: None })
        ));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(
            ConsoleCommand::parse("i key val"),
            Ok(ConsoleCommand::Insert { key, value }) if key == "key" && value == "val"
        ));
        assert!(matches!(
            ConsoleCommand::parse("R key"),
            Ok(ConsoleCommand::Remove { key }) if key == "key"
        ));
        assert!(matches!(
            ConsoleCommand::parse("g foo 2"),
            Ok(ConsoleCommand::Get { key, node: Some(ReplicaId(2)) }) if key == "foo"
        ));
        assert!(matches!(
            ConsoleCommand::parse("l 3"),
            Ok(ConsoleCommand::Leave { node: ReplicaId(3) })
        ));
        assert!(matches!(
            ConsoleCommand::parse("s 1"),
            Ok(ConsoleCommand::Status { node: Some(ReplicaId(1)) })
        ));
    }

    #[test]
    fn test_keys_and_values_keep_their_case() {
        assert_eq!(
            ConsoleCommand::parse("INSERT MyKey MyValue").unwrap(),
            ConsoleCommand::Insert {
                key: "MyKey".into(),
                value: "MyValue".into()
            }
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("   ").is_err());
        assert!(ConsoleCommand::parse("INVALID").is_err());
        assert!(ConsoleCommand::parse("GET").is_err()); // Missing key
        assert!(ConsoleCommand::parse("INSERT key").is_err()); // Missing value
        assert!(ConsoleCommand::parse("REMOVE a b").is_err());
        assert!(ConsoleCommand::parse("LEAVE").is_err());
        assert!(ConsoleCommand::parse("LEAVE two").is_err()); // Non-numeric node
        assert!(ConsoleCommand::parse("GET a -1").is_err());
        assert!(ConsoleCommand::parse("EXIT now").is_err());
    }
}
