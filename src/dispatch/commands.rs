//! Bot command parsing and fixed replies.

use crate::config::Config;
use crate::pipeline::AnswerKind;

pub const MSG_START: &str = "This bot will answer your messages with Gemini API :-)";
pub const MSG_PROMPT_NOT_GIVEN: &str = "Please provide a prompt after the command.";
pub const MSG_TYPE_NOT_SUPPORTED: &str = "Not a supported message type.";
pub const MSG_PRIVACY: &str = "Privacy policy:\n\n\
    Messages you send to this bot (text, files and linked pages) are forwarded to the Google Gemini API to generate answers.\n\n\
    When a database is configured, this bot stores your chat id, user id, username, prompts and generated results, \
    only to compute usage statistics (/stats). Nothing is shared with anyone else.";

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Privacy,
    /// A generation command and its (possibly empty) prompt argument.
    Generate { kind: AnswerKind, prompt: String },
    Unknown(String),
}

struct CommandSpec {
    name: &'static str,
    usage: &'static str,
    description: &'static str,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/image",
        usage: "/image <prompt>",
        description: "generate an image with the given prompt.",
    },
    CommandSpec {
        name: "/video",
        usage: "/video <prompt>",
        description: "generate a video with the given prompt.",
    },
    CommandSpec {
        name: "/speech",
        usage: "/speech <prompt>",
        description: "generate a speech with the given prompt.",
    },
    CommandSpec {
        name: "/google",
        usage: "/google <prompt>",
        description: "answer the prompt with Google Search.",
    },
    CommandSpec {
        name: "/stats",
        usage: "/stats",
        description: "show stats of this bot.",
    },
    CommandSpec {
        name: "/privacy",
        usage: "/privacy",
        description: "show privacy policy of this bot.",
    },
    CommandSpec {
        name: "/help",
        usage: "/help",
        description: "show this help message.",
    },
];

/// Parse a leading `/command` (with optional `@botname`). Returns `None` for
/// ordinary text.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }

    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (text, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    let generate = |kind| Command::Generate {
        kind,
        prompt: args.to_string(),
    };

    Some(match name {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/stats" => Command::Stats,
        "/privacy" => Command::Privacy,
        "/image" => generate(AnswerKind::Image),
        "/speech" => generate(AnswerKind::Speech),
        "/video" => generate(AnswerKind::Video),
        "/google" => generate(AnswerKind::Text {
            google_search: true,
        }),
        _ => Command::Unknown(name.to_string()),
    })
}

pub fn unsupported_command(name: &str) -> String {
    format!("Not a supported bot command: {name}")
}

/// Commands, models and version.
pub fn help_message(config: &Config) -> String {
    let mut help = String::from("Help message here:\n\n");
    for command in COMMANDS {
        help.push_str(&format!("{} : {}\n", command.usage, command.description));
    }
    let models = &config.models;
    help.push_str(&format!(
        "\n- models: {} / {} / {} / {}\n- version: {} {}\n",
        models.text,
        models.image,
        models.video,
        models.speech,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    ));
    help
}
