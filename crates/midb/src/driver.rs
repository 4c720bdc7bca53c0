// MIDB - GDB Machine Interface Frontend
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Event loop tying gdb, the terminal and the session together.
//!
//! gdb's stdout is decoded line by line and handed to the session one
//! `(gdb)`-terminated batch at a time. The session answers with
//! [`Outbound`] requests, which are carried out here.

use std::{process::Stdio, time::Duration};

use chrono::{DateTime, Local};
use eyre::{eyre, Result, WrapErr};
use midb_session::{
    read_source_window, Outbound, ProtocolRecord, RecordBatcher, RecordKind, RunState, Session,
    SessionConfig, SourceCodeState, SourceJob, SourceWindow,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
    sync::mpsc::{self, UnboundedSender},
};
use tracing::{debug, error, info, warn};

use crate::{
    commands::{self, Flow},
    render,
};

/// How to start gdb and what to debug
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    pub gdb: String,
    pub gdb_args: Vec<String>,
    pub program: Option<String>,
    pub program_args: Vec<String>,
    pub remote: Option<String>,
    pub init_command: Option<String>,
}

/// Input to the loop that does not come from the session itself
#[derive(Debug)]
enum Event {
    GdbLine(String),
    GdbStderr(String),
    GdbClosed,
    SourceRead(SourceJob, Result<SourceWindow>),
    Input(String),
    InputClosed,
}

/// What the terminal last showed of the source view
#[derive(Debug, Default, PartialEq, Eq)]
struct ViewKey {
    fullname: Option<String>,
    line: Option<u32>,
    addr: Option<String>,
    state: SourceCodeState,
}

/// Run gdb until it exits or the user quits
pub async fn run(config: SessionConfig, options: DriverOptions) -> Result<()> {
    info!(gdb = %options.gdb, args = ?options.gdb_args, "Starting gdb");
    let mut child = Command::new(&options.gdb)
        .arg("--interpreter=mi2")
        .args(&options.gdb_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .wrap_err_with(|| format!("Failed to start {}", options.gdb))?;

    let mut gdb_stdin = child.stdin.take().ok_or_else(|| eyre!("gdb stdin unavailable"))?;
    let stdout = child.stdout.take().ok_or_else(|| eyre!("gdb stdout unavailable"))?;
    let stderr = child.stderr.take().ok_or_else(|| eyre!("gdb stderr unavailable"))?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    spawn_line_reader(stdout, events_tx.clone(), Event::GdbLine, Some(Event::GdbClosed));
    spawn_line_reader(stderr, events_tx.clone(), Event::GdbStderr, None);
    spawn_line_reader(tokio::io::stdin(), events_tx.clone(), Event::Input, Some(Event::InputClosed));

    let (outbound_tx, mut outbound) = mpsc::unbounded_channel();
    let mut session = Session::new(config, outbound_tx);
    session.on_connect();
    start_session(&mut session, &options).await;

    let mut batcher = RecordBatcher::new();
    let mut view = ViewKey::default();
    println!("midb: type :help for commands");

    loop {
        let deadline = session.watchdog_deadline();
        tokio::select! {
            Some(out) = outbound.recv() => match out {
                Outbound::Commands(commands) => {
                    if let Err(e) = write_commands(&mut gdb_stdin, &commands).await {
                        error!("Failed to write to gdb: {e}");
                        session.on_disconnect();
                    }
                }
                Outbound::ReadSource(job) => {
                    let tx = events_tx.clone();
                    tokio::spawn(async move {
                        let result = read_source_window(&job).await;
                        let _ = tx.send(Event::SourceRead(job, result));
                    });
                }
            },
            Some(event) = events.recv() => match event {
                Event::GdbLine(line) => {
                    if let Some(batch) = batcher.push_line(&line) {
                        session.handle(&batch);
                    }
                }
                Event::GdbStderr(line) => {
                    session.handle(&[ProtocolRecord::stream(RecordKind::LogStream, line).on_stderr()]);
                }
                Event::GdbClosed => {
                    if let Some(batch) = batcher.flush() {
                        session.handle(&batch);
                    }
                    session.on_disconnect();
                    present(&mut session, &mut view);
                    break;
                }
                Event::SourceRead(job, result) => session.on_source_read(job, result),
                Event::Input(line) => match commands::parse(&line) {
                    Ok(Some(command)) => {
                        let (flow, lines) = commands::execute(&mut session, command);
                        for line in lines {
                            println!("{line}");
                        }
                        if flow == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                },
                Event::InputClosed => {
                    info!("Input closed");
                    break;
                }
            },
            _ = wait_until(deadline) => {
                session.check_watchdog(std::time::Instant::now());
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Ctrl+C, interrupting the program");
                session.interrupt();
            }
        }
        present(&mut session, &mut view);
    }

    shutdown(child, gdb_stdin).await;
    Ok(())
}

/// Commands sent once gdb is up
async fn start_session(session: &mut Session, options: &DriverOptions) {
    session.run_initial_commands(options.init_command.as_deref());
    if let Some(program) = &options.program {
        session.set_inferior_binary(program, binary_modified(program).await);
        session.load_binary(program, &options.program_args.join(" "));
        session.fetch_source_files();
    }
    if let Some(target) = &options.remote {
        session.send(format!("-target-select remote {target}"));
    }
}

async fn binary_modified(path: &str) -> Option<DateTime<Local>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Local>::from)
}

fn spawn_line_reader<R>(
    reader: R,
    tx: UnboundedSender<Event>,
    wrap: fn(String) -> Event,
    on_eof: Option<Event>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Read error: {e}");
                    break;
                }
            }
        }
        if let Some(event) = on_eof {
            let _ = tx.send(event);
        }
    });
}

async fn write_commands(stdin: &mut ChildStdin, commands: &[String]) -> Result<()> {
    for command in commands {
        debug!(%command, "-> gdb");
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await?;
    Ok(())
}

async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Print new console output, and the source excerpt when the view moved
fn present(session: &mut Session, view: &mut ViewKey) {
    for event in session.drain_console() {
        let line = render::console_line(&event);
        if render::is_error(&event) {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    let Some(snapshot) = session.take_snapshot() else {
        return;
    };
    let state = &snapshot.state;
    let key = ViewKey {
        fullname: state.fullname_to_render.clone(),
        line: state.line_of_source_to_flash,
        addr: state.current_assembly_address.clone(),
        state: state.source_code_state,
    };
    if key == *view || state.run_state == RunState::Running {
        return;
    }
    for line in render::excerpt(state, session.sources(), render::EXCERPT_CONTEXT) {
        println!("{line}");
    }
    *view = key;
}

async fn shutdown(mut child: tokio::process::Child, mut stdin: ChildStdin) {
    let _ = stdin.write_all(b"-gdb-exit\n").await;
    drop(stdin);
    match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
        Ok(Ok(status)) => info!(%status, "gdb exited"),
        Ok(Err(e)) => warn!("Failed to wait for gdb: {e}"),
        Err(_) => {
            warn!("gdb did not exit, killing it");
            let _ = child.start_kill();
        }
    }
}
