//! Headless line-mode driver.
//!
//! Reads stdin a line at a time and types it into the active tab. Lines
//! starting with `:` are meta-commands (`:help` lists them). Completed output
//! lines of the active tab are echoed to stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use shellmux_app::{Action, App, Config, Control, Key, SystemClipboard, TabState};
use shellmux_pty::{SessionEvent, SessionId, SpawnCommand, TabKind};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
:new [name]            open a local tab
:remote <cmd> [args]   open a tab running <cmd>
:close                 close the active tab
:next | :prev          switch tabs
:retry                 respawn a failed or exited tab
:tabs                  list tabs
:search <query>        search history
:copy                  copy the active tab's output
:quit                  exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args_os().nth(1) {
        Some(path) => Config::load(&PathBuf::from(path))?,
        None => Config::load_default()?,
    };

    let (mut app, mut events) = App::new(config, Box::new(SystemClipboard::new()))
        .context("failed to start shellmux")?;
    let mut printer = Printer::default();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if run_line(&mut app, &mut printer, &line) == Control::Quit {
                    break;
                }
            }
            Some(event) = events.recv() => match event {
                SessionEvent::Output(id) => printer.flush(&app, id),
                SessionEvent::Exited { id, error } => {
                    printer.flush(&app, id);
                    match error {
                        Some(e) => eprintln!("[session {id} failed: {e}]"),
                        None => eprintln!("[session {id} exited]"),
                    }
                }
            },
            _ = tick.tick() => {
                app.handle(Action::Tick)?;
            }
        }
    }

    app.shutdown()?;
    Ok(())
}

fn run_line(app: &mut App, printer: &mut Printer, line: &str) -> Control {
    let Some(command) = line.strip_prefix(':') else {
        for c in line.chars() {
            report(app.handle(Action::Key(Key::Char(c))));
        }
        return report(app.handle(Action::Key(Key::Enter)));
    };

    let mut words = command.split_whitespace();
    let control = match words.next().unwrap_or_default() {
        "new" => {
            let name = words.collect::<Vec<_>>().join(" ");
            let name = (!name.is_empty()).then_some(name.as_str());
            if let Err(e) = app.new_tab(name) {
                eprintln!("error: {e}");
            }
            Control::Continue
        }
        "remote" => {
            let Some(program) = words.next() else {
                eprintln!("usage: :remote <cmd> [args]");
                return Control::Continue;
            };
            let command = SpawnCommand::new(program).args(words);
            if let Err(e) = app.open_tab(program, TabKind::Remote, command) {
                eprintln!("error: {e}");
            }
            Control::Continue
        }
        "close" => report(app.handle(Action::CloseTab)),
        "next" => report(app.handle(Action::NextTab)),
        "prev" => report(app.handle(Action::PrevTab)),
        "retry" => report(app.handle(Action::RetryTab)),
        "copy" => report(app.handle(Action::CopyAll)),
        "tabs" => {
            print_tabs(app);
            Control::Continue
        }
        "search" => {
            let query = words.collect::<Vec<_>>().join(" ");
            for entry in app.history().search(&query) {
                println!("  {entry}");
            }
            Control::Continue
        }
        "quit" => Control::Quit,
        "help" => {
            println!("{HELP}");
            Control::Continue
        }
        other => {
            eprintln!("unknown command :{other} (try :help)");
            Control::Continue
        }
    };

    // Catch up on anything the new active tab printed while it was hidden.
    if let Some(id) = app.registry().active_tab().map(|tab| tab.id) {
        printer.flush(app, id);
    }
    control
}

fn report(result: Result<Control, shellmux_app::AppError>) -> Control {
    result.unwrap_or_else(|e| {
        eprintln!("error: {e}");
        Control::Continue
    })
}

fn print_tabs(app: &App) {
    for tab in app.tabs() {
        let marker = if tab.active { '*' } else { ' ' };
        let state = match tab.state {
            TabState::Running => "running".to_string(),
            TabState::Exited { code: Some(code) } => format!("exited ({code})"),
            TabState::Exited { code: None } => "exited".to_string(),
            TabState::Failed { error } => format!("failed: {error}"),
        };
        let kind = if tab.remote { " [remote]" } else { "" };
        println!("{marker} {} {}{kind} - {state}", tab.id, tab.name);
    }
}

/// Tracks how many absolute lines of each session have been echoed.
#[derive(Default)]
struct Printer {
    printed: HashMap<SessionId, u64>,
}

impl Printer {
    /// Print completed lines of `id` not yet shown, if it is the active tab.
    fn flush(&mut self, app: &App, id: SessionId) {
        let Some(session) = app.registry().active_session().filter(|s| s.id() == id) else {
            return;
        };
        let printed = self.printed.entry(id).or_default();
        session.with_buffer(|buffer| {
            let evicted = buffer.evicted();
            let end = evicted + buffer.completed_len() as u64;
            for absolute in (*printed).max(evicted)..end {
                if let Some(line) = buffer.line((absolute - evicted) as usize) {
                    println!("{line}");
                }
            }
            *printed = end;
        });
    }
}
