//! Kernel shell.
//!
//! A kernel-mode task reading lines from the console and dispatching to
//! a registered verb table. Command bodies stay small; the shell is a
//! diagnostic surface, not a scripting language.

#![allow(dead_code)]

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::Write;

use crate::fs;

/// Outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellResult {
    /// Exit code; zero is success.
    Done(u32),
    /// Leave the shell loop.
    Quit,
}

/// Shell state between commands.
pub struct ShellState {
    /// Current volume-qualified directory, e.g. `hd0p0/bin`.
    pub current_path: String,
    pub last_exit_code: u32,
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellState {
    pub fn new() -> Self {
        Self {
            current_path: fs::mounted_filesystems()
                .first()
                .and_then(|id| fs::FILESYSTEMS.with(*id, |f| f.name.clone()).ok())
                .unwrap_or_default(),
            last_exit_code: 0,
        }
    }
}

/// One registered verb.
struct ShellCommand {
    verb: &'static str,
    help: &'static str,
    run: fn(&mut ShellState, &[&str], &mut dyn Write) -> ShellResult,
}

static COMMANDS: &[ShellCommand] = &[
    ShellCommand {
        verb: "commands",
        help: "list available commands",
        run: cmd_commands,
    },
    ShellCommand {
        verb: "cls",
        help: "clear the screen",
        run: cmd_cls,
    },
    ShellCommand {
        verb: "dir",
        help: "list the current directory",
        run: cmd_dir,
    },
    ShellCommand {
        verb: "cd",
        help: "change directory",
        run: cmd_cd,
    },
    ShellCommand {
        verb: "md",
        help: "make a directory",
        run: cmd_md,
    },
    ShellCommand {
        verb: "run",
        help: "run an executable",
        run: cmd_run,
    },
    ShellCommand {
        verb: "mem",
        help: "show memory usage",
        run: cmd_mem,
    },
    ShellCommand {
        verb: "vol",
        help: "list volumes",
        run: cmd_vol,
    },
    ShellCommand {
        verb: "exit",
        help: "leave the shell",
        run: cmd_exit,
    },
];

/// Split a command line into tokens.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Execute one command line against `state`, writing output to `out`.
pub fn execute(state: &mut ShellState, line: &str, out: &mut dyn Write) -> ShellResult {
    let tokens = tokenize(line);
    let Some(verb) = tokens.first() else {
        return ShellResult::Done(0);
    };
    for command in COMMANDS {
        if command.verb.eq_ignore_ascii_case(verb) {
            let result = (command.run)(state, &tokens[1..], out);
            if let ShellResult::Done(code) = result {
                state.last_exit_code = code;
            }
            return result;
        }
    }
    let _ = writeln!(out, "unknown command: {verb}");
    state.last_exit_code = 1;
    ShellResult::Done(1)
}

fn cmd_commands(_state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> ShellResult {
    for command in COMMANDS {
        let _ = writeln!(out, "{:10} {}", command.verb, command.help);
    }
    ShellResult::Done(0)
}

fn cmd_cls(_state: &mut ShellState, _args: &[&str], _out: &mut dyn Write) -> ShellResult {
    crate::drivers::console::CONSOLE.lock().clear();
    ShellResult::Done(0)
}

fn cmd_dir(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> ShellResult {
    let path = args
        .first()
        .map(|p| qualify(state, p))
        .unwrap_or_else(|| state.current_path.clone());
    match fs::file::find_first(&path) {
        Ok((iterator, first)) => {
            let mut entry = first;
            let mut count = 0u32;
            while let Some(item) = entry {
                let kind = if item.directory { "<dir>" } else { "     " };
                let _ = writeln!(out, "{:10} {} {}", item.size, kind, item.name);
                count += 1;
                entry = fs::file::find_next(iterator).unwrap_or(None);
            }
            let _ = fs::file::close_file(iterator);
            let _ = writeln!(out, "{count} entries");
            ShellResult::Done(0)
        }
        Err(error) => {
            let _ = writeln!(out, "dir: {error}");
            ShellResult::Done(error.code())
        }
    }
}

fn cmd_cd(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> ShellResult {
    let Some(target) = args.first() else {
        let _ = writeln!(out, "{}", state.current_path);
        return ShellResult::Done(0);
    };
    if *target == ".." {
        if let Some(at) = state.current_path.rfind('/') {
            state.current_path.truncate(at);
        }
        return ShellResult::Done(0);
    }
    let candidate = qualify(state, target);
    match fs::file::resolve_path(&candidate) {
        Ok((id, rest)) => {
            let exists = fs::FILESYSTEMS
                .with(id, |f| {
                    f.driver
                        .as_ref()
                        .map(|d| rest.is_empty() || d.exists(&rest))
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            if exists {
                state.current_path = candidate;
                ShellResult::Done(0)
            } else {
                let _ = writeln!(out, "cd: no such directory: {target}");
                ShellResult::Done(1)
            }
        }
        Err(error) => {
            let _ = writeln!(out, "cd: {error}");
            ShellResult::Done(error.code())
        }
    }
}

fn cmd_md(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> ShellResult {
    let Some(name) = args.first() else {
        let _ = writeln!(out, "md: missing directory name");
        return ShellResult::Done(1);
    };
    let path = qualify(state, name);
    let result = fs::file::resolve_path(&path).and_then(|(id, rest)| {
        fs::FILESYSTEMS.with(id, |f| {
            f.driver
                .as_ref()
                .ok_or(crate::error::KernelError::NoDevice)
                .and_then(|d| d.create_folder(&rest))
        })?
    });
    match result {
        Ok(()) => ShellResult::Done(0),
        Err(error) => {
            let _ = writeln!(out, "md: {error}");
            ShellResult::Done(error.code())
        }
    }
}

fn cmd_run(state: &mut ShellState, args: &[&str], out: &mut dyn Write) -> ShellResult {
    let Some(target) = args.first() else {
        let _ = writeln!(out, "run: missing executable");
        return ShellResult::Done(1);
    };
    #[cfg(target_os = "none")]
    {
        let path = qualify(state, target);
        let command_line = args.join(" ");
        match crate::syscall::process::spawn(
            &path,
            &command_line,
            crate::sched::Priority::Medium,
        ) {
            Ok(process) => {
                let _ = writeln!(out, "started {:?}", process);
                ShellResult::Done(0)
            }
            Err(error) => {
                let _ = writeln!(out, "run: {error}");
                ShellResult::Done(error.code())
            }
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = (state, target);
        let _ = writeln!(out, "run: no execution environment");
        ShellResult::Done(1)
    }
}

fn cmd_mem(_state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> ShellResult {
    let info = crate::syscall::base::system_info();
    let _ = writeln!(
        out,
        "physical {} KiB used of {} KiB ({} pages)",
        info.memory_used >> 10,
        info.memory_total >> 10,
        info.page_count
    );
    let _ = writeln!(
        out,
        "{} processes, {} tasks",
        info.process_count, info.task_count
    );
    ShellResult::Done(0)
}

fn cmd_vol(_state: &mut ShellState, _args: &[&str], out: &mut dyn Write) -> ShellResult {
    for id in fs::FILESYSTEMS.ids() {
        let _ = fs::FILESYSTEMS.with(id, |f| {
            let _ = writeln!(
                out,
                "{:8} {:6} start {:10} sectors {:10} {}",
                f.name,
                f.partition.format.name(),
                f.partition.start_sector,
                f.partition.sector_count,
                if f.mounted { "mounted" } else { "unmounted" }
            );
        });
    }
    ShellResult::Done(0)
}

fn cmd_exit(_state: &mut ShellState, _args: &[&str], _out: &mut dyn Write) -> ShellResult {
    ShellResult::Quit
}

/// Turn a possibly-relative path into a volume-qualified one.
fn qualify(state: &ShellState, path: &str) -> String {
    if path.contains('/') || fs::filesystem_by_name(path).is_some() {
        path.to_string()
    } else if state.current_path.is_empty() {
        path.to_string()
    } else {
        alloc::format!("{}/{}", state.current_path, path)
    }
}

/// Console-backed sink for the interactive loop.
#[cfg(target_os = "none")]
struct ConsoleSink;

#[cfg(target_os = "none")]
impl Write for ConsoleSink {
    fn write_str(&mut self, text: &str) -> core::fmt::Result {
        crate::drivers::console::CONSOLE.lock().write_str(text);
        Ok(())
    }
}

/// The shell task entry: prompt, read, dispatch, repeat.
#[cfg(target_os = "none")]
pub extern "C" fn shell_task(_parameter: u32) -> u32 {
    let mut state = ShellState::new();
    let mut out = ConsoleSink;
    let _ = writeln!(out, "EXOS shell; 'commands' lists the verbs");
    loop {
        let _ = write!(out, "{}> ", state.current_path);
        let mut line = String::new();
        loop {
            let key = crate::drivers::keyboard::wait_key();
            match key.ascii {
                b'\n' => break,
                8 => {
                    if line.pop().is_some() {
                        crate::drivers::console::CONSOLE.lock().put_char(8);
                    }
                }
                0 => {}
                byte => {
                    line.push(byte as char);
                    crate::drivers::console::CONSOLE.lock().put_char(byte);
                }
            }
        }
        crate::drivers::console::CONSOLE.lock().put_char(b'\n');
        match execute(&mut state, &line, &mut out) {
            ShellResult::Quit => break,
            ShellResult::Done(code) => {
                if code != 0 {
                    let _ = writeln!(out, "exit code {code}");
                }
            }
        }
    }
    0
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_splits_on_whitespace() {
        assert_eq!(tokenize("  dir  /bin  "), ["dir", "/bin"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn unknown_verbs_set_exit_code() {
        let mut state = ShellState::new();
        let mut out = String::new();
        assert_eq!(
            execute(&mut state, "definitely-not-a-verb", &mut out),
            ShellResult::Done(1)
        );
        assert!(out.contains("unknown command"));
        assert_eq!(state.last_exit_code, 1);
    }

    #[test]
    fn commands_lists_every_verb() {
        let mut state = ShellState::new();
        let mut out = String::new();
        execute(&mut state, "commands", &mut out);
        for command in super::COMMANDS {
            assert!(out.contains(command.verb), "{} missing", command.verb);
        }
    }

    #[test]
    fn exit_quits_the_loop() {
        let mut state = ShellState::new();
        let mut out = String::new();
        assert_eq!(execute(&mut state, "exit", &mut out), ShellResult::Quit);
    }

    #[test]
    fn mem_reports_counters() {
        let mut state = ShellState::new();
        let mut out = String::new();
        assert_eq!(execute(&mut state, "mem", &mut out), ShellResult::Done(0));
        assert!(out.contains("physical"));
    }
}
