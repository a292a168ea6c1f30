//! Line format spoken by the console adapter.
//!
//! Inbound: `:<nick>[!user@host] PRIVMSG <target> :<text>` and the same with `NOTICE`.
//! Outbound: `PRIVMSG <target> :<text>`.

use chanbot_core::domain::{InboundMessage, Notice};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Message(InboundMessage),
    Notice(Notice),
}

pub fn parse_line(line: &str) -> Option<InboundEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let nick = prefix.split('!').next().unwrap_or(prefix);
    if nick.is_empty() {
        return None;
    }

    let (verb, rest) = rest.trim_start().split_once(' ')?;
    let (target, text) = rest.trim_start().split_once(' ')?;
    let text = text.trim_start().strip_prefix(':').unwrap_or(text.trim_start());

    match verb.to_ascii_uppercase().as_str() {
        "PRIVMSG" => {
            // Private messages are answered in private.
            let channel = if is_channel(target) { target } else { nick };
            Some(InboundEvent::Message(InboundMessage::new(channel, nick, text)))
        }
        "NOTICE" => Some(InboundEvent::Notice(Notice::new(nick, text))),
        _ => None,
    }
}

pub fn format_privmsg(target: &str, text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("PRIVMSG {target} :{flat}\n")
}

fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_messages() {
        assert_eq!(
            parse_line(":bob!b@host PRIVMSG #rust :!say #ops hi there\r\n"),
            Some(InboundEvent::Message(InboundMessage::new(
                "#rust",
                "bob",
                "!say #ops hi there"
            )))
        );
    }

    #[test]
    fn private_messages_reply_to_sender() {
        assert_eq!(
            parse_line(":bob PRIVMSG chanbot :hello"),
            Some(InboundEvent::Message(InboundMessage::new(
                "bob", "bob", "hello"
            )))
        );
    }

    #[test]
    fn parses_notices() {
        assert_eq!(
            parse_line(":NickServ!services@net NOTICE chanbot :alice ACC 3"),
            Some(InboundEvent::Notice(Notice::new("NickServ", "alice ACC 3")))
        );
    }

    #[test]
    fn rejects_other_lines() {
        assert_eq!(parse_line("PRIVMSG #rust :no prefix"), None);
        assert_eq!(parse_line(":bob JOIN #rust"), None);
        assert_eq!(parse_line(":bob PART #rust :bye"), None);
        assert_eq!(parse_line(""), None);
    }
}
