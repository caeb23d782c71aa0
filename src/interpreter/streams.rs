//! Open-stream registry for redirected I/O and piped sub-processes.
//!
//! Four tables keyed by the evaluated file name or command string: output
//! files, output commands, input files, input commands. Each name maps to at
//! most one open handle; a second redirection to the same name reuses it
//! until `close()`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use log::debug;

/// A writable pipe into `sh -c <command>`
pub struct OutCommand {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl OutCommand {
    fn spawn(command: &str) -> io::Result<Self> {
        debug!("spawning output command: {}", command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin })
    }

    pub fn writer(&mut self) -> &mut ChildStdin {
        self.stdin.as_mut().expect("output command already closed")
    }

    /// Close the write side, then wait for the command to finish
    fn close(mut self) -> io::Result<()> {
        drop(self.stdin.take());
        self.child.wait().map(|_| ())
    }
}

/// A readable pipe from `sh -c <command>` stdout
pub struct InCommand {
    child: Child,
    pub reader: BufReader<ChildStdout>,
}

impl InCommand {
    fn spawn(command: &str) -> io::Result<Self> {
        debug!("spawning input command: {}", command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("no stdout from command"))?;
        Ok(Self {
            child,
            reader: BufReader::new(stdout),
        })
    }

    fn close(mut self) -> io::Result<()> {
        drop(self.reader);
        self.child.wait().map(|_| ())
    }
}

/// The four stream tables
#[derive(Default)]
pub struct StreamRegistry {
    out_files: HashMap<String, File>,
    out_commands: HashMap<String, OutCommand>,
    in_files: HashMap<String, BufReader<File>>,
    in_commands: HashMap<String, InCommand>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output file for `>` or `>>`: truncates on first open for `>`,
    /// appends for `>>`, then keeps appending either way
    pub fn out_file(&mut self, name: &str, append: bool) -> io::Result<&mut File> {
        if !self.out_files.contains_key(name) {
            debug!("opening output file: {} (append={})", name, append);
            let file = if append {
                OpenOptions::new().create(true).append(true).open(name)?
            } else {
                File::create(name)?
            };
            self.out_files.insert(name.to_string(), file);
        }
        Ok(self.out_files.get_mut(name).unwrap())
    }

    /// Writable end of a `print | "cmd"` pipe
    pub fn out_command(&mut self, command: &str) -> io::Result<&mut OutCommand> {
        if !self.out_commands.contains_key(command) {
            let cmd = OutCommand::spawn(command)?;
            self.out_commands.insert(command.to_string(), cmd);
        }
        Ok(self.out_commands.get_mut(command).unwrap())
    }

    /// Buffered reader for `getline < "file"`
    pub fn in_file(&mut self, name: &str) -> io::Result<&mut BufReader<File>> {
        if !self.in_files.contains_key(name) {
            let file = File::open(name)?;
            self.in_files
                .insert(name.to_string(), BufReader::new(file));
        }
        Ok(self.in_files.get_mut(name).unwrap())
    }

    /// Readable end of a `"cmd" | getline` pipe
    pub fn in_command(&mut self, command: &str) -> io::Result<&mut InCommand> {
        if !self.in_commands.contains_key(command) {
            let cmd = InCommand::spawn(command)?;
            self.in_commands.insert(command.to_string(), cmd);
        }
        Ok(self.in_commands.get_mut(command).unwrap())
    }

    /// Close every registry entry for `name`, returning how many held it.
    /// Closing an unknown name is a no-op that returns 0, so a second
    /// `close()` of the same name reports "not open".
    pub fn close(&mut self, name: &str) -> usize {
        let mut count = 0;
        if let Some(mut file) = self.out_files.remove(name) {
            let _ = file.flush();
            count += 1;
        }
        if let Some(cmd) = self.out_commands.remove(name) {
            let _ = cmd.close();
            count += 1;
        }
        if self.in_files.remove(name).is_some() {
            count += 1;
        }
        if let Some(cmd) = self.in_commands.remove(name) {
            let _ = cmd.close();
            count += 1;
        }
        count
    }

    /// Flush one named output stream; None flushes all of them.
    /// Returns false when the name is not an open output stream.
    pub fn flush(&mut self, name: Option<&str>) -> bool {
        match name {
            Some(name) => {
                if let Some(file) = self.out_files.get_mut(name) {
                    let _ = file.flush();
                    true
                } else if let Some(cmd) = self.out_commands.get_mut(name) {
                    let _ = cmd.writer().flush();
                    true
                } else {
                    false
                }
            }
            None => {
                for file in self.out_files.values_mut() {
                    let _ = file.flush();
                }
                for cmd in self.out_commands.values_mut() {
                    let _ = cmd.writer().flush();
                }
                true
            }
        }
    }

    /// Program-end cleanup: close all four tables, collecting per-stream
    /// errors instead of stopping at the first
    pub fn close_all(&mut self) -> Vec<(String, io::Error)> {
        let mut errors = Vec::new();

        for (name, mut file) in self.out_files.drain() {
            if let Err(e) = file.flush() {
                errors.push((name, e));
            }
        }
        for (name, cmd) in self.out_commands.drain() {
            if let Err(e) = cmd.close() {
                errors.push((name, e));
            }
        }
        self.in_files.clear();
        for (name, cmd) in self.in_commands.drain() {
            if let Err(e) = cmd.close() {
                errors.push((name, e));
            }
        }

        errors
    }
}
