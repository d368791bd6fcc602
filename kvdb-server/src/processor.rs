//! Command processor: validates and dispatches a [`CommandMessage`] against
//! the persistent map, tracks per-result-code counters, and periodically
//! reports and flushes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kvdb_core::{CommandMessage, CommandType, MapError, PersistentMap, ResultCode, ResultMessage};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Shared command processor handed to every accepted session.
///
/// Counter updates are protected by a plain mutex rather than an actor
/// mailbox: each increment is O(1) and held for a negligible duration, so
/// the lock never becomes a contention point even under concurrent
/// sessions.
pub struct CommandProcessor {
    map: Arc<PersistentMap>,
    counters: Mutex<HashMap<ResultCode, u64>>,
}

impl CommandProcessor {
    pub fn new(map: Arc<PersistentMap>) -> Self {
        let mut counters = HashMap::new();
        for code in ResultCode::ALL {
            counters.insert(code, 0);
        }
        CommandProcessor { map, counters: Mutex::new(counters) }
    }

    /// Validates and dispatches `command`, returning the [`ResultMessage`]
    /// to send back to the client.
    pub fn process(&self, command: CommandMessage) -> ResultMessage {
        let result = if let Some(code) = self.validate(&command) {
            ResultMessage::new(command.id, code)
        } else {
            match command.command_type {
                CommandType::Insert => self.dispatch_insert(&command),
                CommandType::Update => self.dispatch_update(&command),
                CommandType::Get => self.dispatch_get(&command),
                CommandType::Delete => self.dispatch_delete(&command),
                CommandType::Unknown => ResultMessage::new(command.id, ResultCode::UnknownCommand),
            }
        };
        self.record(result.code);
        result
    }

    /// Rejects malformed commands before dispatch: an empty key on any
    /// operation, or a non-empty value on GET/DELETE, both map to
    /// `WrongCommandFormat` rather than reaching the map.
    fn validate(&self, command: &CommandMessage) -> Option<ResultCode> {
        if command.key.is_empty() {
            return Some(ResultCode::WrongCommandFormat);
        }
        match command.command_type {
            CommandType::Get | CommandType::Delete if !command.value.is_empty() => {
                Some(ResultCode::WrongCommandFormat)
            }
            _ => None,
        }
    }

    fn dispatch_insert(&self, command: &CommandMessage) -> ResultMessage {
        match self.map.insert(command.key.as_str(), command.value.as_str()) {
            Ok(()) => ResultMessage::new(command.id, ResultCode::InsertSuccess),
            Err(MapError::AlreadyExists) => ResultMessage::new(command.id, ResultCode::InsertFailed),
            Err(e) => self.log_and_fail(command.id, ResultCode::InsertFailed, e),
        }
    }

    fn dispatch_update(&self, command: &CommandMessage) -> ResultMessage {
        match self.map.update(command.key.as_str(), command.value.as_str()) {
            Ok(()) => ResultMessage::new(command.id, ResultCode::UpdateSuccess),
            Err(MapError::NotFound) => ResultMessage::new(command.id, ResultCode::UpdateFailed),
            Err(e) => self.log_and_fail(command.id, ResultCode::UpdateFailed, e),
        }
    }

    fn dispatch_get(&self, command: &CommandMessage) -> ResultMessage {
        match self.map.get(command.key.as_str()) {
            Ok(value) => ResultMessage::with_value(command.id, ResultCode::GetSuccess, &value)
                .unwrap_or_else(|_| ResultMessage::new(command.id, ResultCode::GetFailed)),
            Err(MapError::NotFound) => ResultMessage::new(command.id, ResultCode::GetFailed),
            Err(e) => self.log_and_fail(command.id, ResultCode::GetFailed, e),
        }
    }

    fn dispatch_delete(&self, command: &CommandMessage) -> ResultMessage {
        match self.map.delete(command.key.as_str()) {
            Ok(()) => ResultMessage::new(command.id, ResultCode::DeleteSuccess),
            Err(MapError::NotFound) => ResultMessage::new(command.id, ResultCode::DeleteFailed),
            Err(e) => self.log_and_fail(command.id, ResultCode::DeleteFailed, e),
        }
    }

    fn log_and_fail(&self, command_id: kvdb_core::CommandId, code: ResultCode, err: MapError) -> ResultMessage {
        warn!(command_id, ?err, "map operation failed");
        ResultMessage::new(command_id, code)
    }

    fn record(&self, code: ResultCode) {
        *self.counters.lock().entry(code).or_insert(0) += 1;
    }

    /// Snapshot of all counters, used by the periodic report and available
    /// for external inspection.
    pub fn counters_snapshot(&self) -> HashMap<ResultCode, u64> {
        self.counters.lock().clone()
    }

    /// Logs the current counters and the map's [`kvdb_core::Stat`], then
    /// flushes the map to disk. Runs on the interval configured by
    /// `report_interval`.
    pub fn report_and_flush(&self) {
        let counters = self.counters_snapshot();
        match self.map.stat() {
            Ok(stat) => info!(
                live_entries = stat.live_entries,
                tombstones = stat.tombstones,
                segment_len = stat.segment_len,
                write_offset = stat.write_offset,
                ?counters,
                "performance report"
            ),
            Err(e) => warn!(?e, "failed to read map stat for performance report"),
        }
        if let Err(e) = self.map.flush() {
            warn!(?e, "failed to flush map during performance report");
        }
    }

    /// Spawns a background task that calls [`Self::report_and_flush`] on a
    /// fixed interval until the returned handle is dropped or aborted.
    pub fn spawn_report_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                self.report_and_flush();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn processor() -> (NamedTempFile, CommandProcessor) {
        let file = NamedTempFile::new().unwrap();
        let map = Arc::new(PersistentMap::open(file.path(), 4096).unwrap());
        (file, CommandProcessor::new(map))
    }

    #[test]
    fn insert_then_get_success() {
        let (_f, proc) = processor();
        let insert = proc.process(CommandMessage::insert(1, "k", "v").unwrap());
        assert_eq!(insert.code, ResultCode::InsertSuccess);

        let get = proc.process(CommandMessage::get(2, "k").unwrap());
        assert_eq!(get.code, ResultCode::GetSuccess);
        assert_eq!(get.value.as_str(), "v");
    }

    #[test]
    fn duplicate_insert_fails() {
        let (_f, proc) = processor();
        proc.process(CommandMessage::insert(1, "k", "v").unwrap());
        let second = proc.process(CommandMessage::insert(2, "k", "v2").unwrap());
        assert_eq!(second.code, ResultCode::InsertFailed);
    }

    #[test]
    fn get_missing_key_fails() {
        let (_f, proc) = processor();
        let get = proc.process(CommandMessage::get(1, "missing").unwrap());
        assert_eq!(get.code, ResultCode::GetFailed);
    }

    #[test]
    fn update_missing_key_fails() {
        let (_f, proc) = processor();
        let update = proc.process(CommandMessage::update(1, "missing", "v").unwrap());
        assert_eq!(update.code, ResultCode::UpdateFailed);
    }

    #[test]
    fn delete_then_get_fails() {
        let (_f, proc) = processor();
        proc.process(CommandMessage::insert(1, "k", "v").unwrap());
        let delete = proc.process(CommandMessage::delete(2, "k").unwrap());
        assert_eq!(delete.code, ResultCode::DeleteSuccess);
        let get = proc.process(CommandMessage::get(3, "k").unwrap());
        assert_eq!(get.code, ResultCode::GetFailed);
    }

    #[test]
    fn empty_key_is_wrong_command_format() {
        let (_f, proc) = processor();
        let insert = proc.process(CommandMessage::insert(1, "", "v").unwrap());
        assert_eq!(insert.code, ResultCode::WrongCommandFormat);
        let get = proc.process(CommandMessage::get(2, "").unwrap());
        assert_eq!(get.code, ResultCode::WrongCommandFormat);
        let delete = proc.process(CommandMessage::delete(3, "").unwrap());
        assert_eq!(delete.code, ResultCode::WrongCommandFormat);
        let update = proc.process(CommandMessage::update(4, "", "v").unwrap());
        assert_eq!(update.code, ResultCode::WrongCommandFormat);
    }

    #[test]
    fn get_with_non_empty_value_is_wrong_command_format() {
        let (_f, proc) = processor();
        let command = CommandMessage {
            id: 1,
            command_type: kvdb_core::CommandType::Get,
            key: kvdb_core::LimitedString::new("k").unwrap(),
            value: kvdb_core::LimitedString::new("should-be-empty").unwrap(),
        };
        let result = proc.process(command);
        assert_eq!(result.code, ResultCode::WrongCommandFormat);
    }

    #[test]
    fn delete_with_non_empty_value_is_wrong_command_format() {
        let (_f, proc) = processor();
        let command = CommandMessage {
            id: 1,
            command_type: kvdb_core::CommandType::Delete,
            key: kvdb_core::LimitedString::new("k").unwrap(),
            value: kvdb_core::LimitedString::new("should-be-empty").unwrap(),
        };
        let result = proc.process(command);
        assert_eq!(result.code, ResultCode::WrongCommandFormat);
    }

    #[test]
    fn counters_track_every_processed_command() {
        let (_f, proc) = processor();
        proc.process(CommandMessage::insert(1, "k", "v").unwrap());
        proc.process(CommandMessage::get(2, "k").unwrap());
        proc.process(CommandMessage::get(3, "missing").unwrap());
        let counters = proc.counters_snapshot();
        assert_eq!(counters[&ResultCode::InsertSuccess], 1);
        assert_eq!(counters[&ResultCode::GetSuccess], 1);
        assert_eq!(counters[&ResultCode::GetFailed], 1);
    }
}
