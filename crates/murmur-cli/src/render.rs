//! Plain line renderer.
//!
//! Prints only what changed since the previous frame: new messages in the open
//! room, new notices, and stream state transitions. Switching rooms or a
//! history replace reprints the room.

use std::io::{self, Write};

use murmur_app::{ColorId, Mailbox, MessageView, Origin, Outcome, Renderer, View, ViewModel};
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Writing to the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes frames as plain text lines.
pub struct PlainRenderer<W> {
    out: W,
    color: bool,
    last: Option<ViewModel>,
}

impl<W: Write> PlainRenderer<W> {
    /// Render to `out`, coloring nicknames with ANSI codes if `color`.
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color, last: None }
    }

    /// Underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn nick(&self, name: &str, color: ColorId) -> String {
        if self.color { format!("\x1b[{}m{name}\x1b[0m", color.0) } else { name.to_owned() }
    }

    fn write_message(&mut self, message: &MessageView) -> io::Result<()> {
        let marker = match message.origin {
            Origin::Sent => '>',
            Origin::Received => ' ',
        };
        let author = self.nick(&message.author, message.color);
        writeln!(
            self.out,
            "[{}]{marker} {author}: {}",
            message.timestamp.format("%H:%M"),
            message.content
        )
    }

    fn write_frame(&mut self, view: &ViewModel) -> io::Result<()> {
        let previous = self.last.take();

        if previous.as_ref().map(|p| p.stream) != Some(view.stream) {
            writeln!(self.out, "* stream {}", view.stream)?;
        }

        let previous_active = previous.as_ref().and_then(|p| p.active.as_ref());
        match &view.active {
            Some(active) => {
                let shown = match previous_active {
                    Some(p)
                        if p.room == active.room && active.messages.starts_with(&p.messages) =>
                    {
                        p.messages.len()
                    },
                    _ => {
                        writeln!(self.out, "== {} ({}) ==", active.name, active.room)?;
                        0
                    },
                };
                for message in &active.messages[shown..] {
                    self.write_message(message)?;
                }
            },
            None if previous.is_none() || previous_active.is_some() => {
                writeln!(self.out, "== main menu ==")?;
                for room in &view.rooms {
                    writeln!(self.out, "  {} ({}): {} unread", room.name, room.room, room.unread)?;
                }
            },
            None => {},
        }

        let seen = previous.as_ref().map_or(&[][..], |p| p.notifications.as_slice());
        for notice in view.notifications.iter().filter(|n| !seen.contains(n)) {
            writeln!(self.out, "! {}", notice.text)?;
        }

        self.last = Some(view.clone());
        self.out.flush()
    }

    fn write_outcome(&mut self, outcome: &Outcome) -> io::Result<()> {
        match outcome {
            Outcome::None => {},
            Outcome::Status(report) => {
                let nickname = report.nickname.as_deref().unwrap_or("-");
                let view = match &report.view {
                    View::MainMenu => "main menu".to_owned(),
                    View::InRoom(room) => format!("in {room}"),
                };
                writeln!(self.out, "{nickname}, {view}, stream {}", report.stream)?;
                for room in &report.rooms {
                    let marker = if room.active { '*' } else { ' ' };
                    writeln!(
                        self.out,
                        "{marker} {} ({}): {} messages, {} unread",
                        room.name, room.room, room.messages, room.unread
                    )?;
                }
            },
            Outcome::History { room, name, messages } => {
                writeln!(self.out, "-- history of {name} ({room}) --")?;
                for message in messages {
                    self.write_message(message)?;
                }
            },
            Outcome::Colors(colors) => {
                for (nickname, color) in colors {
                    let shown = self.nick(nickname, *color);
                    writeln!(self.out, "{shown}: {}", color.0)?;
                }
            },
            Outcome::Mailbox { mailbox, messages } => {
                let title = match mailbox {
                    Mailbox::Inbox => "inbox",
                    Mailbox::Outbox => "outbox",
                };
                writeln!(self.out, "-- {title}: {} messages --", messages.len())?;
                for message in messages {
                    writeln!(
                        self.out,
                        "[{}] {} in {}: {}",
                        message.created_at.format("%Y-%m-%d %H:%M"),
                        message.from,
                        message.room,
                        message.content
                    )?;
                }
            },
            Outcome::Help(text) => writeln!(self.out, "{text}")?,
            Outcome::Exit => writeln!(self.out, "bye")?,
        }
        self.out.flush()
    }
}

impl<W: Write> Renderer for PlainRenderer<W> {
    type Error = RenderError;

    fn render(&mut self, view: &ViewModel) -> Result<(), Self::Error> {
        Ok(self.write_frame(view)?)
    }

    fn show(&mut self, outcome: &Outcome) -> Result<(), Self::Error> {
        Ok(self.write_outcome(outcome)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use murmur_app::{ActiveRoomView, PumpState};
    use murmur_proto::RoomId;

    use super::*;

    fn message(author: &str, content: &str) -> MessageView {
        MessageView {
            origin: if author == "alice" { Origin::Sent } else { Origin::Received },
            author: author.into(),
            color: ColorId(31),
            content: content.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    fn frame(messages: Vec<MessageView>) -> ViewModel {
        let room = RoomId::new("r-1");
        ViewModel {
            nickname: Some("alice".into()),
            view: View::InRoom(room.clone()),
            active: Some(ActiveRoomView { room, name: "general".into(), messages }),
            rooms: Vec::new(),
            notifications: Vec::new(),
            stream: PumpState::Active,
        }
    }

    fn output(renderer: PlainRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn only_new_messages_are_printed() {
        let mut renderer = PlainRenderer::new(Vec::new(), false);
        renderer.render(&frame(vec![message("bob", "hi")])).unwrap();
        renderer.render(&frame(vec![message("bob", "hi"), message("alice", "hey")])).unwrap();

        assert_eq!(
            output(renderer),
            "* stream active\n== general (r-1) ==\n[09:30]  bob: hi\n[09:30]> alice: hey\n"
        );
    }

    #[test]
    fn replaced_history_is_reprinted() {
        let mut renderer = PlainRenderer::new(Vec::new(), false);
        renderer.render(&frame(vec![message("alice", "draft")])).unwrap();
        renderer.render(&frame(vec![message("bob", "snapshot")])).unwrap();

        let text = output(renderer);
        assert_eq!(text.matches("== general (r-1) ==").count(), 2);
        assert!(text.ends_with("[09:30]  bob: snapshot\n"));
    }

    #[test]
    fn colors_wrap_nicknames() {
        let mut renderer = PlainRenderer::new(Vec::new(), true);
        renderer.show(&Outcome::Colors(vec![("bob".into(), ColorId(94))])).unwrap();
        assert_eq!(output(renderer), "\x1b[94mbob\x1b[0m: 94\n");
    }
}
