//! Append-only audit trail of [`SafetyEvent`]s.
//!
//! Every state transition made by the supervisor lands here.  Events are kept
//! in memory, fanned out to live subscribers over a
//! [`tokio::sync::broadcast`] channel and, optionally, mirrored as JSON lines
//! to a file.  A mirror write failure is logged and never blocks the
//! transition itself.
//!
//! [`SafetyLog::record`] does no I/O, so it is safe to call while holding the
//! state lock.  [`SafetyLog::flush`] writes whatever the mirror has not seen
//! yet, in recording order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::warn;

use armcore_types::{ArmError, SafetyEvent};

/// Events buffered for slow subscribers before they start lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Mirror {
    file: File,
    /// Events already written.
    written: usize,
}

#[derive(Debug)]
pub struct SafetyLog {
    events: Mutex<Vec<SafetyEvent>>,
    mirror: Option<Mutex<Mirror>>,
    sender: broadcast::Sender<SafetyEvent>,
}

impl Default for SafetyLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            events: Mutex::new(Vec::new()),
            mirror: None,
            sender,
        }
    }

    /// Like [`SafetyLog::new`], additionally appending every event to `path`
    /// as one JSON document per line.
    pub fn with_mirror(path: &Path) -> Result<Self, ArmError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArmError::Persistence(format!("{}: {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ArmError::Persistence(format!("{}: {e}", path.display())))?;
        Ok(Self {
            mirror: Some(Mutex::new(Mirror { file, written: 0 })),
            ..Self::new()
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SafetyEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record and mirror in one go.
    pub fn append(&self, event: SafetyEvent) {
        self.record(event);
        self.flush();
    }

    /// Keep `event` in memory and publish it to subscribers.
    pub fn record(&self, event: SafetyEvent) {
        self.lock().push(event.clone());
        // No subscribers is the normal case.
        let _ = self.sender.send(event);
    }

    /// Write every recorded event the mirror has not seen yet.
    pub fn flush(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let mut mirror = mirror.lock().unwrap_or_else(|p| p.into_inner());
        let pending: Vec<SafetyEvent> = self.lock().get(mirror.written..).unwrap_or_default().to_vec();
        for event in &pending {
            let written = serde_json::to_string(event)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(mirror.file, "{line}"));
            if let Err(e) = written {
                warn!(error = %e, "safety log mirror write failed");
            }
            mirror.written += 1;
        }
    }

    /// Copy of every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<SafetyEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn last(&self) -> Option<SafetyEvent> {
        self.lock().last().cloned()
    }

    /// Receive every event appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SafetyEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armcore_types::{RobotState, SafetyCause};

    fn ev(from: RobotState, to: RobotState) -> SafetyEvent {
        SafetyEvent::new(from, to, SafetyCause::OperatorRequest)
    }

    #[test]
    fn events_are_kept_in_order() {
        let log = SafetyLog::new();
        assert!(log.is_empty());
        log.append(ev(RobotState::Idle, RobotState::Planning));
        log.append(ev(RobotState::Planning, RobotState::Moving));
        let all = log.events();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].to, RobotState::Planning);
        assert_eq!(log.last().unwrap().to, RobotState::Moving);
    }

    #[tokio::test]
    async fn subscribers_see_new_events() {
        let log = SafetyLog::new();
        log.append(ev(RobotState::Idle, RobotState::Planning));
        let mut rx = log.subscribe();
        log.append(ev(RobotState::Moving, RobotState::Estop));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.to, RobotState::Estop);
    }

    #[test]
    fn mirror_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("safety.jsonl");
        let log = SafetyLog::with_mirror(&path).unwrap();
        log.append(ev(RobotState::Idle, RobotState::Planning));
        log.append(ev(RobotState::Planning, RobotState::Idle));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<SafetyEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, log.events());
    }

    #[test]
    fn recorded_events_reach_mirror_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety.jsonl");
        let log = SafetyLog::with_mirror(&path).unwrap();

        log.record(ev(RobotState::Idle, RobotState::Planning));
        log.record(ev(RobotState::Planning, RobotState::Moving));
        assert_eq!(log.len(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        log.flush();
        log.append(ev(RobotState::Moving, RobotState::Idle));
        log.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<SafetyEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, log.events());
    }
}
