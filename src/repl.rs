/// Interactive console
///
/// Lines starting with `!` are extension commands (`!init`, `!uefiext.setenv rust`);
/// everything else goes to GDB as a console command.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use uefiext::{DebugHost, ExecuteFlags, OutputControl, UefiExtension};

use gdbadapter::GdbHost;

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Empty,
    Quit,
    Extension { name: &'a str, args: &'a str },
    Debugger(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    if matches!(line, "q" | "quit" | "exit") {
        return Line::Quit;
    }

    match line.strip_prefix('!') {
        Some(rest) => {
            let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Line::Extension {
                name,
                args: args.trim(),
            }
        }
        None => Line::Debugger(line),
    }
}

pub fn run(host: &mut GdbHost, extension: &mut UefiExtension) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;

    loop {
        let prompt = format!("uefi:{}> ", extension.environment());
        let input = match editor.readline(&prompt) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        if !input.trim().is_empty() {
            let _ = editor.add_history_entry(input.as_str());
        }

        match parse_line(&input) {
            Line::Empty => {}
            Line::Quit => break,
            Line::Extension { name, args } => {
                if let Err(e) = extension.dispatch(host, name, args) {
                    eprintln!("{}", e);
                }
            }
            Line::Debugger(command) => {
                let result = host
                    .open_session()
                    .and_then(|mut session| session.execute(OutputControl::ThisClient, command, ExecuteFlags::DEFAULT));
                if let Err(e) = result {
                    eprintln!("{}", e);
                }
            }
        }

        if !host.is_running() {
            log::warn!("GDB exited");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extension_lines() {
        assert_eq!(
            parse_line("!uefiext.setenv rust"),
            Line::Extension {
                name: "uefiext.setenv",
                args: "rust"
            }
        );
        assert_eq!(parse_line("  !init  "), Line::Extension { name: "init", args: "" });
        assert_eq!(
            parse_line("!monitor mod list"),
            Line::Extension {
                name: "monitor",
                args: "mod list"
            }
        );
    }

    #[test]
    fn test_parse_debugger_and_control_lines() {
        assert_eq!(parse_line("info registers"), Line::Debugger("info registers"));
        assert_eq!(parse_line("   "), Line::Empty);
        assert_eq!(parse_line("quit"), Line::Quit);
        assert_eq!(parse_line("q"), Line::Quit);
    }
}
