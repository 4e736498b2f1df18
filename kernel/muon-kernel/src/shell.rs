//! The kernel shell.
//!
//! Reads a line from the keyboard, tokenizes it, and either runs a
//! builtin or hands the first token to the ELF loader, searching the
//! directories named by `PATH`. This is also where control lands after
//! a user process dies: the fault-recovery path unwinds into
//! [`proc::exec::spawn`](crate::proc::exec::spawn), whose caller is
//! this loop.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::arch::x86_64::instructions::{Port, halt_loop};
use crate::drivers::{fbcon, i8042};
use crate::fs::{self, InodeType, Mode};
use crate::proc::exec::{self, ExecError};
use crate::{kprint, kprintln};

/// Longest accepted command line.
const LINE_MAX: usize = 256;

/// Most tokens considered per line.
const MAX_ARGS: usize = 8;

/// `PATH` used when the variable is unset.
const DEFAULT_PATH: &str = "/bin:/usr/bin:.";

/// Shell state: environment variables and the privilege toggle.
struct Shell {
    env: BTreeMap<String, String>,
    superuser: bool,
}

/// Runs the shell. Never returns.
pub fn run() -> ! {
    let mut shell = Shell {
        env: BTreeMap::new(),
        superuser: false,
    };
    shell.env.insert("PATH".to_string(), DEFAULT_PATH.to_string());

    kprintln!();
    kprintln!("Muon kernel shell");
    kprintln!("Type 'help' for available commands.");

    let mut line = String::new();
    loop {
        let cwd = fs::vfs::with_vfs(|vfs| vfs.cwd().to_string());
        let (user, mark) = if shell.superuser {
            ("root", '#')
        } else {
            ("user", '$')
        };
        kprint!("{user}@muon:{cwd}{mark} ");

        read_line(&mut line);

        let tokens: Vec<&str> = line.split_whitespace().take(MAX_ARGS).collect();
        if let Some(&cmd) = tokens.first() {
            shell.dispatch(cmd, &tokens);
        }
    }
}

/// Reads one line with echo and backspace handling.
fn read_line(line: &mut String) {
    line.clear();
    loop {
        let ch = i8042::read_char();
        match ch {
            b'\n' | b'\r' => {
                kprintln!();
                return;
            }
            0x08 | 0x7F => {
                if line.pop().is_some() {
                    kprint!("\x08 \x08");
                }
            }
            0x20..=0x7E => {
                if line.len() < LINE_MAX {
                    line.push(ch as char);
                    kprint!("{}", ch as char);
                }
            }
            _ => {}
        }
    }
}

impl Shell {
    fn dispatch(&mut self, cmd: &str, tokens: &[&str]) {
        match cmd {
            "help" => self.builtin_help(),
            "clear" => fbcon::clear(),
            "pwd" => kprintln!("{}", fs::vfs::with_vfs(|vfs| vfs.cwd().to_string())),
            "cd" => self.builtin_cd(tokens.get(1).copied().unwrap_or("/")),
            "ls" => self.builtin_ls(tokens.get(1).copied()),
            "chmod" => self.builtin_chmod(tokens),
            "export" => self.builtin_export(tokens.get(1).copied()),
            "unset" => {
                if let Some(name) = tokens.get(1) {
                    self.env.remove(*name);
                }
            }
            "set" => self.builtin_set(),
            "su" => {
                self.superuser = !self.superuser;
            }
            "exit" => {
                kprintln!("logout");
                halt_loop();
            }
            "reboot" => Self::builtin_reboot(),
            "gui" => kprintln!("gui: not supported in this build"),
            other => self.run_external(other),
        }
    }

    fn builtin_help(&self) {
        kprintln!("Muon shell builtins:");
        kprintln!("  help clear pwd cd ls chmod export unset set su exit reboot");
        kprintln!("Anything else is looked up on PATH and run as an ELF executable.");
    }

    fn builtin_cd(&self, target: &str) {
        if let Err(err) = fs::vfs::with_vfs_mut(|vfs| vfs.chdir(target)) {
            kprintln!("cd: {target}: {err}");
        }
    }

    /// `ls [path]` — names separated by two spaces, one trailing newline.
    fn builtin_ls(&self, target: Option<&str>) {
        let target = target.unwrap_or(".");
        let listing = fs::vfs::with_vfs(|vfs| {
            vfs.resolve(target).and_then(|inode| inode.readdir())
        });
        match listing {
            Ok(entries) => {
                for entry in &entries {
                    kprint!("{}  ", entry.name);
                }
                kprintln!();
            }
            Err(err) => kprintln!("ls: {target}: {err}"),
        }
    }

    fn builtin_chmod(&self, tokens: &[&str]) {
        let (Some(&mode_str), Some(&target)) = (tokens.get(1), tokens.get(2)) else {
            kprintln!("usage: chmod <octal-mode> <file>");
            return;
        };
        let Ok(mode) = u16::from_str_radix(mode_str, 8) else {
            kprintln!("chmod: bad mode '{mode_str}'");
            return;
        };
        if let Err(err) = fs::vfs::with_vfs(|vfs| vfs.chmod(target, Mode(mode))) {
            kprintln!("chmod: {target}: {err}");
        }
    }

    fn builtin_export(&mut self, assignment: Option<&str>) {
        let Some(assignment) = assignment else {
            kprintln!("usage: export NAME=VALUE");
            return;
        };
        match assignment.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                self.env.insert(name.to_string(), value.to_string());
            }
            _ => kprintln!("export: bad assignment '{assignment}'"),
        }
    }

    fn builtin_set(&self) {
        for (name, value) in &self.env {
            kprintln!("{name}={value}");
        }
    }

    /// Pulses the keyboard controller's reset line.
    fn builtin_reboot() -> ! {
        kprintln!("Rebooting...");
        // SAFETY: 0xFE on port 0x64 asserts the CPU reset line.
        unsafe { Port::<u8>::new(0x64).write(0xFE) };
        halt_loop();
    }

    /// Resolves `cmd` against the PATH search list and runs it.
    fn run_external(&self, cmd: &str) {
        let path_var = self
            .env
            .get("PATH")
            .map_or(DEFAULT_PATH, String::as_str)
            .to_string();

        for dir in path_var.split(':').filter(|d| !d.is_empty()) {
            let candidate = if dir == "." {
                cmd.to_string()
            } else {
                alloc::format!("{dir}/{cmd}")
            };

            let exists = fs::vfs::with_vfs(|vfs| {
                vfs.resolve(&candidate)
                    .map(|inode| inode.kind() != InodeType::Directory)
                    .unwrap_or(false)
            });
            if !exists {
                continue;
            }

            match exec::spawn(&candidate, self.superuser) {
                Ok(_status) => return,
                Err(ExecError::PermissionDenied) => {
                    kprintln!("{candidate}: permission denied");
                    return;
                }
                Err(err) => {
                    kprintln!("{candidate}: {err}");
                    return;
                }
            }
        }

        kprintln!("{cmd}: command not found");
    }
}
