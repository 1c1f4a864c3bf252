//! Command line parsing.
//!
//! Commands start with `/`. Any other non-blank line is a message for the
//! active room.

use murmur_proto::RoomId;

use crate::error::SessionError;

/// Usage text shown by `/help`.
pub const HELP: &str = "\
/join <room>          join a room by id
/create <name>        create a room
/leave [room]         leave a room (default: the active one)
/switch <room>        open a joined room
/home                 back to the main menu
/history [room]       show cached history
/refresh              poll the service now
/status, /chats       session overview
/clear-notifications  empty the notification list
/colors               nickname colors
/inbox, /outbox       messages received and sent
/reconnect            restart the chat stream
/exit                 leave every room and quit";

/// A parsed user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Join a room by id.
    Join(RoomId),
    /// Create a room with a display name.
    Create(String),
    /// Leave the given room, or the active one.
    Leave(Option<RoomId>),
    /// Open a joined room.
    Switch(RoomId),
    /// Return to the main menu.
    Home,
    /// Show cached history of the given room, or the active one.
    History(Option<RoomId>),
    /// Run one poll tick now.
    Refresh,
    /// Session overview.
    Status,
    /// Empty the notification log.
    ClearNotifications,
    /// List nickname colors.
    Colors,
    /// Messages others sent to our rooms.
    Inbox,
    /// Messages we sent.
    Outbox,
    /// Restart a closed chat stream.
    Reconnect,
    /// Show usage.
    Help,
    /// End the session.
    Exit,
    /// Send a message to the active room.
    Send(String),
}

impl Command {
    /// Parse one input line. Blank lines parse to `None`.
    ///
    /// # Errors
    ///
    /// - `SessionError::Validation` for unknown commands or missing arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, SessionError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(body) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_owned())));
        };

        let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let rest = rest.trim();
        let arg = (!rest.is_empty()).then(|| RoomId::new(rest));

        let command = match name {
            "join" => Self::Join(arg.ok_or_else(|| usage("/join <room>"))?),
            "create" if rest.is_empty() => return Err(usage("/create <name>")),
            "create" => Self::Create(rest.to_owned()),
            "leave" => Self::Leave(arg),
            "switch" => arg.map_or(Self::Home, Self::Switch),
            "home" => Self::Home,
            "history" => Self::History(arg),
            "refresh" => Self::Refresh,
            "status" | "chats" => Self::Status,
            "clear-notifications" | "clear" => Self::ClearNotifications,
            "colors" => Self::Colors,
            "inbox" => Self::Inbox,
            "outbox" => Self::Outbox,
            "reconnect" => Self::Reconnect,
            "help" => Self::Help,
            "exit" | "quit" => Self::Exit,
            other => {
                return Err(SessionError::validation(format!(
                    "unknown command /{other}, try /help"
                )));
            },
        };
        Ok(Some(command))
    }
}

fn usage(text: &str) -> SessionError {
    SessionError::validation(format!("usage: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<Command> {
        Command::parse(line).expect("valid command")
    }

    #[test]
    fn free_text_is_a_send() {
        assert_eq!(parse("  hello there "), Some(Command::Send("hello there".into())));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn room_arguments() {
        assert_eq!(parse("/join abc"), Some(Command::Join(RoomId::new("abc"))));
        assert_eq!(parse("/leave"), Some(Command::Leave(None)));
        assert_eq!(parse("/leave abc"), Some(Command::Leave(Some(RoomId::new("abc")))));
        assert_eq!(parse("/switch abc"), Some(Command::Switch(RoomId::new("abc"))));
        assert_eq!(parse("/switch"), Some(Command::Home));
        assert_eq!(parse("/history"), Some(Command::History(None)));
    }

    #[test]
    fn create_keeps_spaces_in_name() {
        assert_eq!(parse("/create  rust  club "), Some(Command::Create("rust  club".into())));
    }

    #[test]
    fn aliases() {
        assert_eq!(parse("/chats"), Some(Command::Status));
        assert_eq!(parse("/quit"), Some(Command::Exit));
        assert_eq!(parse("/clear"), Some(Command::ClearNotifications));
    }

    #[test]
    fn missing_arguments_and_unknown_commands_fail() {
        assert!(matches!(Command::parse("/join"), Err(SessionError::Validation(_))));
        assert!(matches!(Command::parse("/create   "), Err(SessionError::Validation(_))));
        assert!(matches!(Command::parse("/dance"), Err(SessionError::Validation(_))));
    }
}
