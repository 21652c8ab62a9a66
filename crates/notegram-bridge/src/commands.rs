//! Operator command grammar.
//!
//! Every incoming message is classified exactly once: a recognized command,
//! an unrecognized `/something`, or plain text. Plain text is never a command
//! here; whether it answers an outstanding prompt is the dispatcher's call.

/// One recognized operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Start,
    Note { text: String },
    NoteCloseFriends { text: String },
    CurrentNote,
    DeleteNote,
    NoteReplies,
    Cancel,
}

/// Classification of one incoming operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInput {
    Command(RelayCommand),
    Unknown { command: String },
    Reply { text: String },
}

/// Splits a message into a command token and its argument text. Interior
/// whitespace in the argument is preserved; only the edges are trimmed.
pub fn parse_operator_input(raw: &str) -> ParsedInput {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return ParsedInput::Reply {
            text: trimmed.to_string(),
        };
    }
    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };
    match command {
        "/start" | "/help" => ParsedInput::Command(RelayCommand::Start),
        "/note" => ParsedInput::Command(RelayCommand::Note {
            text: rest.to_string(),
        }),
        "/note_cf" => ParsedInput::Command(RelayCommand::NoteCloseFriends {
            text: rest.to_string(),
        }),
        "/current_note" => ParsedInput::Command(RelayCommand::CurrentNote),
        "/delete_note" => ParsedInput::Command(RelayCommand::DeleteNote),
        "/note_replies" => ParsedInput::Command(RelayCommand::NoteReplies),
        "/cancel" => ParsedInput::Command(RelayCommand::Cancel),
        other => ParsedInput::Unknown {
            command: other.to_string(),
        },
    }
}

/// Platform verification codes are exactly six ASCII digits.
pub fn is_verification_code(text: &str) -> bool {
    text.len() == 6 && text.chars().all(|ch| ch.is_ascii_digit())
}
