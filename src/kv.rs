//! Key-value store access for identity checks.
//!
//! Talks to redis through `redis-cli`, the same way the rest of the harness
//! drives docker through its CLI.

use std::time::Duration;

use crate::harness::exec::Executor;
use crate::utils::{shell_quote, CheckError, CheckResult};

pub trait KvStore {
    /// Value under `key`; an absent key reads as an empty string.
    fn get(&self, key: &str) -> CheckResult<String>;
}

pub struct RedisCli<'a> {
    exec: &'a Executor,
    base: String,
    timeout: Duration,
}

impl<'a> RedisCli<'a> {
    /// Open database `db` and confirm the server answers.
    pub fn connect(exec: &'a Executor, host: &str, port: u16, timeout: Duration, db: u32) -> CheckResult<Self> {
        let base = format!("redis-cli -h {} -p {} -n {}", shell_quote(host), port, db);
        let store = Self { exec, base, timeout };
        let reply = store
            .exec
            .run_text(&format!("{} PING", store.base), store.timeout)
            .map_err(|e| CheckError::Store(format!("{}:{} db{} unreachable: {}", host, port, db, e)))?;
        if reply != "PONG" {
            return Err(CheckError::Store(format!("{}:{} db{} answered `{}` to PING", host, port, db, reply)));
        }
        Ok(store)
    }
}

impl KvStore for RedisCli<'_> {
    fn get(&self, key: &str) -> CheckResult<String> {
        self.exec
            .run_text(&format!("{} --raw GET {}", self.base, shell_quote(key)), self.timeout)
            .map_err(|e| CheckError::Store(format!("GET {} failed: {}", key, e)))
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;

    /// In-memory store for check logic tests.
    #[derive(Default)]
    pub struct MemoryStore(pub HashMap<String, String>);

    impl KvStore for MemoryStore {
        fn get(&self, key: &str) -> CheckResult<String> {
            Ok(self.0.get(key).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_server_is_a_store_error() {
        let exec = Executor::new(Duration::from_secs(5));
        // Port 1 on localhost refuses; if redis-cli is absent the shell fails too
        match RedisCli::connect(&exec, "127.0.0.1", 1, Duration::from_secs(5), 4) {
            Err(CheckError::Store(msg)) => assert!(msg.contains("127.0.0.1:1 db4")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }
}
