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

//! Command dispatch over the outbound channel, with the no-response watchdog.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::source::SourceJob;

/// Work the session asks its driver to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write these commands to the debugger, in order, as one batch
    Commands(Vec<String>),
    /// Read a window of a source file from disk
    ReadSource(SourceJob),
}

/// Transport connection state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection yet; commands are buffered
    #[default]
    Connecting,
    /// Commands go straight out
    Connected,
    /// The transport went away; the session has ended
    Disconnected,
}

/// An ordered list of commands, normalized from the shapes callers have at hand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch(Vec<String>);

impl CommandBatch {
    /// Commands with whitespace-only entries dropped
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            commands
                .into_iter()
                .map(Into::into)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The commands
    pub fn commands(&self) -> &[String] {
        &self.0
    }

    /// Consume into the command list
    pub fn into_commands(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for CommandBatch {
    fn from(command: &str) -> Self {
        Self::new([command])
    }
}

impl From<String> for CommandBatch {
    fn from(command: String) -> Self {
        Self::new([command])
    }
}

impl From<Vec<String>> for CommandBatch {
    fn from(commands: Vec<String>) -> Self {
        Self::new(commands)
    }
}

impl From<Vec<&str>> for CommandBatch {
    fn from(commands: Vec<&str>) -> Self {
        Self::new(commands)
    }
}

impl From<&[&str]> for CommandBatch {
    fn from(commands: &[&str]) -> Self {
        Self::new(commands.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for CommandBatch {
    fn from(commands: [&str; N]) -> Self {
        Self::new(commands)
    }
}

/// Single shared "no response yet" timer.
///
/// Time is passed in by the caller; the driver sleeps until
/// [`Watchdog::deadline`] and then polls.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// A disarmed watchdog
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadline: None }
    }

    /// (Re)start the timer from `now`
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Stop the timer
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// When the timer fires, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is running
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true exactly once when the deadline has passed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// What happened to a batch handed to [`Dispatcher::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing but whitespace
    Ignored,
    /// Written to the outbound channel
    Sent(Vec<String>),
    /// Held until the transport connects
    Buffered(Vec<String>),
}

/// Sends command batches and tracks the connection and watchdog.
#[derive(Debug)]
pub struct Dispatcher {
    outbound: UnboundedSender<Outbound>,
    connection: ConnectionState,
    buffered: Vec<String>,
    watchdog: Watchdog,
}

impl Dispatcher {
    /// Create a dispatcher writing to `outbound`
    pub fn new(outbound: UnboundedSender<Outbound>, watchdog_timeout: Duration) -> Self {
        Self {
            outbound,
            connection: ConnectionState::Connecting,
            buffered: Vec::new(),
            watchdog: Watchdog::new(watchdog_timeout),
        }
    }

    /// Send one batch, or buffer it while not connected
    pub fn send(&mut self, batch: impl Into<CommandBatch>) -> SendOutcome {
        let batch = batch.into();
        if batch.is_empty() {
            return SendOutcome::Ignored;
        }
        let commands = batch.into_commands();

        if self.connection != ConnectionState::Connected {
            debug!(?commands, "Buffering commands until connected");
            self.buffered.extend(commands.iter().cloned());
            return SendOutcome::Buffered(commands);
        }

        self.emit(commands.clone());
        SendOutcome::Sent(commands)
    }

    /// Ask the driver for work that is not a debugger command
    pub fn request(&self, job: Outbound) {
        if self.outbound.send(job).is_err() {
            warn!("Outbound channel closed, dropping request");
        }
    }

    /// The transport is up: flush buffered commands as one batch
    pub fn on_connect(&mut self) -> usize {
        info!("Transport connected");
        self.connection = ConnectionState::Connected;
        let buffered = std::mem::take(&mut self.buffered);
        let flushed = buffered.len();
        if flushed > 0 {
            self.emit(buffered);
        }
        flushed
    }

    /// The transport went away; no watchdog runs until the next connect
    pub fn on_disconnect(&mut self) {
        info!("Transport disconnected");
        self.connection = ConnectionState::Disconnected;
        self.watchdog.clear();
    }

    /// Any response clears the watchdog
    pub fn on_response(&mut self) {
        self.watchdog.clear();
    }

    /// Returns true once when the watchdog expired
    pub fn poll_watchdog(&mut self, now: Instant) -> bool {
        self.watchdog.poll(now)
    }

    /// Current connection state
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether commands go straight out
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// The watchdog
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Commands waiting for a connection
    pub fn buffered(&self) -> &[String] {
        &self.buffered
    }

    fn emit(&mut self, commands: Vec<String>) {
        debug!(?commands, "Sending commands");
        if self.outbound.send(Outbound::Commands(commands)).is_err() {
            warn!("Outbound channel closed, dropping commands");
            return;
        }
        self.watchdog.arm(Instant::now());
    }
}
