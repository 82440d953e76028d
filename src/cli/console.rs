//! Line-oriented operator console
//!
//! Reads one slash command per stdin line and dispatches each on its own
//! task against one shared engine, so a long `/run` never blocks `/tui`.

use super::command::{execute, Limits, Request};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::Engine;
use tether_tools::OperatorId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Run the console until stdin closes or `/quit`.
pub async fn run(engine: Arc<Engine>, operator: OperatorId, limits: Limits) -> Result<()> {
    info!(operator = %operator, "Console ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/quit" | "/exit") {
            break;
        }
        let request = match parse(line) {
            Ok(request) => request,
            Err(usage) => {
                println!("{}", usage);
                continue;
            }
        };

        let engine = engine.clone();
        let operator = operator.clone();
        let label = label(line);
        tasks.spawn(async move {
            let reply = execute(&engine, &operator, request, &limits).await;
            let mark = if reply.ok { "ok" } else { "fail" };
            println!("[{} {}]\n{}", label, mark, reply.text);
        });

        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                warn!(error = %e, "Console task failed");
            }
        }
    }

    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "Console task failed");
        }
    }
    Ok(())
}

/// Short tag identifying a reply, e.g. `/run echo hi` → `/run`.
fn label(line: &str) -> String {
    split_word(line).0.to_string()
}

/// Parse one console line.
pub fn parse(line: &str) -> Result<Request, String> {
    let (head, rest) = split_word(line);
    let Some(name) = head.strip_prefix('/') else {
        return Err("commands start with '/'; try /help".to_string());
    };

    match name {
        "run" => parse_run(rest),
        "sessions" => {
            let mut args = rest.split_whitespace();
            let limit = args.next().map(parse_number).transpose()?;
            let minutes = args.next().map(parse_number).transpose()?;
            Ok(Request::Sessions { limit, minutes })
        }
        "session" => match split_word(rest) {
            ("set", id) if !id.is_empty() => Ok(Request::SessionSet(id.to_string())),
            ("reset", "") => Ok(Request::SessionReset),
            _ => Err("usage: /session set ID | /session reset".to_string()),
        },
        "tui" if rest.is_empty() => Err("usage: /tui TEXT".to_string()),
        "tui" => Ok(Request::TuiSend(rest.to_string())),
        "tui-capture" | "tui_capture" => {
            let lines = match rest {
                "" => None,
                n => Some(parse_number(n)?),
            };
            Ok(Request::TuiCapture(lines))
        }
        "tui-start" | "tui_start" => Ok(Request::TuiStart),
        "tui-stop" | "tui_stop" => Ok(Request::TuiStop),
        "pull" if rest.is_empty() => Err("usage: /pull PATH".to_string()),
        "pull" => Ok(Request::Pull(rest.to_string())),
        "push" => match split_word(rest) {
            ("", _) => Err("usage: /push LOCAL_FILE [NAME]".to_string()),
            (file, name) => Ok(Request::Push {
                file: PathBuf::from(file),
                name: (!name.is_empty()).then(|| name.to_string()),
            }),
        },
        "help" | "start" => Ok(Request::Help),
        other => Err(format!("unknown command /{}; try /help", other)),
    }
}

fn parse_run(mut rest: &str) -> Result<Request, String> {
    const USAGE: &str = "usage: /run [--session ID | --continue] COMMAND";
    let mut session = None;
    let mut continue_latest = false;

    loop {
        let (word, after) = split_word(rest);
        if word == "--continue" {
            continue_latest = true;
            rest = after;
        } else if word == "--session" {
            let (id, after) = split_word(after);
            if id.is_empty() {
                return Err(USAGE.to_string());
            }
            session = Some(id.to_string());
            rest = after;
        } else if let Some(id) = word.strip_prefix("--session=") {
            session = Some(id.to_string());
            rest = after;
        } else {
            break;
        }
    }

    if session.is_some() && continue_latest {
        return Err("--session and --continue are mutually exclusive".to_string());
    }
    if rest.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(Request::Run {
        session,
        continue_latest,
        command: rest.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("not a number: {}", raw))
}

/// First whitespace-delimited word and the trimmed remainder.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}
