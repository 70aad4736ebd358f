// Classification of inbound chat lines.
//
// One decoded line maps to exactly one `Command`. The grammar, in priority
// order:
// - empty (after trimming)                  → `Empty`
// - `!keyword ...` or bare `logout`         → `Global` / `UnknownGlobal`
// - `@name ... [!sub] ... free text`        → `Directed`
// - anything else                           → `Broadcast`
//
// Directed lines tokenize on whitespace. Every `@name` token adds a
// recipient. A `!keyword` token seen before any free-text token marks a
// moderation sub-command aimed at the first recipient; tokens after it are
// ignored. A `!` token after free text has started is just text. Everything
// else accumulates into the message body.
//
// Parsing is pure: authorization, recipient resolution, and reply text are
// the relay's business. This module only says what the line *is*.

/// Global command keywords, with sigil, for "unknown command" feedback.
pub const KNOWN_COMMANDS: &[&str] = &["!start", "!shutdown", "!logout", "!list"];

/// One classified inbound line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line — nothing to route.
    Empty,
    /// Plain text, fanned out to everyone but the sender.
    Broadcast(String),
    /// Recognized `!` command (or bare `logout`).
    Global(GlobalCommand),
    /// `!` line whose keyword is not in the global command set.
    UnknownGlobal(String),
    /// `@` line: private message or targeted moderation.
    Directed(DirectedLine),
}

/// Commands addressed to the relay itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalCommand {
    Start,
    Shutdown,
    Logout,
    List,
}

/// A parsed `@`-line: who it names, and what it asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectedLine {
    pub recipients: Vec<String>,
    pub action: DirectedAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectedAction {
    /// Private message body (free-text tokens joined by single spaces).
    /// Empty when the line named recipients but carried no text.
    Message(String),
    /// Recognized moderation sub-command, aimed at the first recipient.
    Moderation(ModerationCommand),
    /// `!` token in command position with an unrecognized keyword.
    Unknown(String),
}

/// Moderation sub-commands usable on a directed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModerationCommand {
    Ban,
    Suspend,
    Forgive,
}

/// Classify one inbound line. Never fails — unrecognized input becomes an
/// `Unknown*` variant so the relay can answer with feedback instead of
/// silently dropping it.
pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if trimmed == "logout" {
        return Command::Global(GlobalCommand::Logout);
    }
    if let Some(rest) = trimmed.strip_prefix('!') {
        let keyword = rest.split_whitespace().next().unwrap_or("");
        return match keyword {
            "start" => Command::Global(GlobalCommand::Start),
            "shutdown" => Command::Global(GlobalCommand::Shutdown),
            "logout" => Command::Global(GlobalCommand::Logout),
            "list" => Command::Global(GlobalCommand::List),
            other => Command::UnknownGlobal(other.to_owned()),
        };
    }
    if trimmed.starts_with('@') {
        return Command::Directed(parse_directed(trimmed));
    }
    Command::Broadcast(trimmed.to_owned())
}

fn parse_directed(line: &str) -> DirectedLine {
    let mut recipients = Vec::new();
    let mut body: Vec<&str> = Vec::new();
    let mut action = None;

    for token in line.split_whitespace() {
        if let Some(keyword) = token.strip_prefix('!') {
            if body.is_empty() {
                action = Some(match keyword {
                    "ban" => DirectedAction::Moderation(ModerationCommand::Ban),
                    "suspend" => DirectedAction::Moderation(ModerationCommand::Suspend),
                    "forgive" => DirectedAction::Moderation(ModerationCommand::Forgive),
                    other => DirectedAction::Unknown(other.to_owned()),
                });
                break;
            }
            // `!` after free text has started is just text.
            body.push(token);
        } else if let Some(name) = token.strip_prefix('@') {
            if !name.is_empty() {
                recipients.push(name.to_owned());
            }
        } else {
            body.push(token);
        }
    }

    let action = action.unwrap_or_else(|| DirectedAction::Message(body.join(" ")));
    DirectedLine { recipients, action }
}
