//! Line-oriented command parsing for the terminal client.
//!
//! Message indices are 1-based and refer to the numbered transcript last
//! printed.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Reply { index: usize, text: String },
    Attach { path: String, caption: String },
    Edit { index: usize, text: String },
    React { index: usize, emoji: String },
    Delete { index: usize, for_everyone: bool },
    Pin(usize),
    Star(usize),
    Retry,
    NextPin,
    PreviousPin,
    JumpPin(usize),
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
commands:
  <text>                   send a message
  /reply <n> <text>        reply to message n
  /attach <path> [caption] send a file
  /edit <n> <text>         edit message n
  /react <n> <emoji>       toggle a reaction on message n
  /delete <n> [all]        delete message n for you (or everyone)
  /pin <n>  /star <n>      toggle pin or star on message n
  /retry                   resend the last failed message
  /next  /prev             cycle through pinned messages
  /jump <n>                show pinned message n in the pin bar
  /quit";

pub fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_string()));
    };

    let (name, rest) = split_word(command);
    match name {
        "reply" => {
            let (index, text) = index_and_text(rest)?;
            Ok(Input::Reply { index, text })
        }
        "attach" => {
            let (path, caption) = split_word(rest);
            if path.is_empty() {
                return Err("usage: /attach <path> [caption]".into());
            }
            Ok(Input::Attach {
                path: path.to_string(),
                caption: caption.to_string(),
            })
        }
        "edit" => {
            let (index, text) = index_and_text(rest)?;
            Ok(Input::Edit { index, text })
        }
        "react" => {
            let (index, emoji) = index_and_text(rest)?;
            Ok(Input::React { index, emoji })
        }
        "delete" => {
            let (index, scope) = split_word(rest);
            let index = parse_index(index)?;
            match scope {
                "" | "me" => Ok(Input::Delete { index, for_everyone: false }),
                "all" | "everyone" => Ok(Input::Delete { index, for_everyone: true }),
                other => Err(format!("unknown delete scope '{}'", other)),
            }
        }
        "pin" => Ok(Input::Pin(parse_index(rest)?)),
        "star" => Ok(Input::Star(parse_index(rest)?)),
        "retry" => Ok(Input::Retry),
        "next" => Ok(Input::NextPin),
        "prev" => Ok(Input::PreviousPin),
        "jump" => Ok(Input::JumpPin(parse_index(rest)?)),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command '/{}', try /help", other)),
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn parse_index(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("'{}' is not a message number", s.trim())),
        Ok(n) => Ok(n),
    }
}

fn index_and_text(rest: &str) -> Result<(usize, String), String> {
    let (index, text) = split_word(rest);
    let index = parse_index(index)?;
    if text.is_empty() {
        return Err("missing text".into());
    }
    Ok((index, text.to_string()))
}
