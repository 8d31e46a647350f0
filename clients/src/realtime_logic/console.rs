//! Line commands read from stdin.

use lib_realtime::Priority;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Send { conversation_id: String, content: String },
    Typing { conversation_id: String, on: bool },
    Read { conversation_id: String, message_ids: Vec<String> },
    Open(String),
    Close(String),
    List,
    Refresh,
    Poll(Option<u64>),
    StopPolling,
    Watch(String),
    Unwatch(String),
    Query(Vec<String>),
    Raw { kind: String, data: Option<Value>, priority: Priority },
    Online(bool),
    Visible(bool),
    Focus,
    Connect,
    Disconnect,
    Reconnect,
    Status,
    Stats,
    Conversations,
    Help,
    Quit,
}

pub const HELP: &str = "\
send <conversation> <text>     send a chat message
typing <conversation> on|off   typing indicator
read <conversation> [ids..]    mark messages read
open|close <conversation>      join or leave a conversation
list | refresh                 request the conversation list
poll [ms] | nopoll             server-side conversation polling
watch|unwatch <user>           presence interest
query <user..>                 one-off presence query
raw <type> [json] [low|high]   send an arbitrary message
online|offline|show|hide|focus environment signals
connect|disconnect|reconnect   lifecycle
status | stats | conversations inspect local state
quit";

fn arg<'a>(words: &[&'a str], idx: usize, what: &str) -> Result<&'a str, String> {
    words.get(idx).copied().ok_or_else(|| format!("missing {what}"))
}

/// Parses one console line; `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(head) = words.first() else {
        return Ok(None);
    };

    let cmd = match head.to_lowercase().as_str() {
        "send" => {
            let conversation_id = arg(&words, 1, "conversation")?.to_string();
            // Keep the message text as typed, inner spacing included.
            let content = line
                .splitn(3, char::is_whitespace)
                .nth(2)
                .map(str::trim)
                .unwrap_or_default();
            if content.is_empty() {
                return Err("missing message text".into());
            }
            ConsoleCommand::Send {
                conversation_id,
                content: content.to_string(),
            }
        }
        "typing" => {
            let conversation_id = arg(&words, 1, "conversation")?.to_string();
            let on = match words.get(2).copied().unwrap_or("on") {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                other => return Err(format!("expected on|off, got '{other}'")),
            };
            ConsoleCommand::Typing { conversation_id, on }
        }
        "read" => ConsoleCommand::Read {
            conversation_id: arg(&words, 1, "conversation")?.to_string(),
            message_ids: words[2..].iter().map(|s| s.to_string()).collect(),
        },
        "open" => ConsoleCommand::Open(arg(&words, 1, "conversation")?.to_string()),
        "close" => ConsoleCommand::Close(arg(&words, 1, "conversation")?.to_string()),
        "list" => ConsoleCommand::List,
        "refresh" => ConsoleCommand::Refresh,
        "poll" => match words.get(1) {
            Some(ms) => ConsoleCommand::Poll(Some(ms.parse().map_err(|_| format!("bad interval '{ms}'"))?)),
            None => ConsoleCommand::Poll(None),
        },
        "nopoll" => ConsoleCommand::StopPolling,
        "watch" => ConsoleCommand::Watch(arg(&words, 1, "user")?.to_string()),
        "unwatch" => ConsoleCommand::Unwatch(arg(&words, 1, "user")?.to_string()),
        "query" => {
            if words.len() < 2 {
                return Err("missing user".into());
            }
            ConsoleCommand::Query(words[1..].iter().map(|s| s.to_string()).collect())
        }
        "raw" => parse_raw(line, arg(&words, 1, "message type")?)?,
        "online" => ConsoleCommand::Online(true),
        "offline" => ConsoleCommand::Online(false),
        "show" => ConsoleCommand::Visible(true),
        "hide" => ConsoleCommand::Visible(false),
        "focus" => ConsoleCommand::Focus,
        "connect" => ConsoleCommand::Connect,
        "disconnect" => ConsoleCommand::Disconnect,
        "reconnect" => ConsoleCommand::Reconnect,
        "status" => ConsoleCommand::Status,
        "stats" => ConsoleCommand::Stats,
        "conversations" => ConsoleCommand::Conversations,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(cmd))
}

// raw <type> [json] [low|normal|high]
fn parse_raw(line: &str, kind: &str) -> Result<ConsoleCommand, String> {
    let mut rest = line
        .splitn(3, char::is_whitespace)
        .nth(2)
        .unwrap_or_default()
        .trim();

    let mut priority = Priority::Normal;
    if let Some((head, tail)) = rest.rsplit_once(char::is_whitespace) {
        if let Some(p) = parse_priority(tail) {
            priority = p;
            rest = head.trim();
        }
    } else if let Some(p) = parse_priority(rest) {
        priority = p;
        rest = "";
    }

    let data = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest).map_err(|e| format!("invalid JSON payload: {e}"))?)
    };
    Ok(ConsoleCommand::Raw {
        kind: kind.to_string(),
        data,
        priority,
    })
}

fn parse_priority(word: &str) -> Option<Priority> {
    match word {
        "low" => Some(Priority::Low),
        "normal" => Some(Priority::Normal),
        "high" => Some(Priority::High),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_keeps_the_text_verbatim() {
        let cmd = parse_line("send c1 hello   there").unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Send {
                conversation_id: "c1".into(),
                content: "hello   there".into()
            }
        );
        assert!(parse_line("send c1").is_err());
        assert!(parse_line("send").is_err());
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(parse_line("frobnicate").is_err());
    }

    #[test]
    fn raw_payload_and_priority() {
        let cmd = parse_line(r#"raw custom:event {"a": [1, 2]} high"#).unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Raw {
                kind: "custom:event".into(),
                data: Some(json!({"a": [1, 2]})),
                priority: Priority::High
            }
        );

        let bare = parse_line("raw conversation:list").unwrap().unwrap();
        assert_eq!(
            bare,
            ConsoleCommand::Raw {
                kind: "conversation:list".into(),
                data: None,
                priority: Priority::Normal
            }
        );
        assert!(parse_line("raw x {broken").is_err());
    }

    #[test]
    fn read_and_query_collect_ids() {
        assert_eq!(
            parse_line("read c1 m1 m2").unwrap().unwrap(),
            ConsoleCommand::Read {
                conversation_id: "c1".into(),
                message_ids: vec!["m1".into(), "m2".into()]
            }
        );
        assert_eq!(
            parse_line("query u1 u2").unwrap().unwrap(),
            ConsoleCommand::Query(vec!["u1".into(), "u2".into()])
        );
        assert!(parse_line("query").is_err());
    }

    #[test]
    fn typing_and_poll_arguments() {
        assert_eq!(
            parse_line("typing c1 off").unwrap().unwrap(),
            ConsoleCommand::Typing {
                conversation_id: "c1".into(),
                on: false
            }
        );
        assert_eq!(parse_line("poll 5000").unwrap().unwrap(), ConsoleCommand::Poll(Some(5000)));
        assert!(parse_line("poll soon").is_err());
    }
}
