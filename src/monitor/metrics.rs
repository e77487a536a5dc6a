// src/monitor/metrics.rs

use super::*;
use std::fmt::Write;

use crate::engine::keyspace::Keyspace;

const PREFIX: &str = "crab_stash";

#[derive(Default, Debug)]
pub struct Metrics {
    pub command_count: AtomicU64,
    pub failed_commands: AtomicU64,
    pub auth_failures: AtomicU64,
    pub command_stats: DashMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// `command` is expected upper-cased so that `get` and `GET` share a counter.
    pub fn record_command(&self, command: &str, ok: bool) {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed_commands.fetch_add(1, Ordering::Relaxed);
        }
        self.command_stats.entry(command.to_string()).and_modify(|c| *c += 1).or_insert(1);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_total(&self, command: &str) -> u64 {
        self.command_stats.get(command).map_or(0, |c| *c)
    }

    pub fn to_prometheus(&self, keyspace: &Keyspace) -> String {
        let mut output = String::new();

        let counters = [
            ("command_count", "Total commands processed", self.command_count.load(Ordering::Relaxed)),
            ("failed_commands", "Commands that returned an error", self.failed_commands.load(Ordering::Relaxed)),
            ("auth_failures", "Requests rejected by the auth gate", self.auth_failures.load(Ordering::Relaxed)),
            ("expired_keys", "Keys reclaimed by expiry since startup", keyspace.expired_total()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(output, "# TYPE {PREFIX}_{name} counter");
            let _ = writeln!(output, "{PREFIX}_{name} {value}");
        }

        let _ = writeln!(output, "# HELP {PREFIX}_keys Live keys in the keyspace");
        let _ = writeln!(output, "# TYPE {PREFIX}_keys gauge");
        let _ = writeln!(output, "{PREFIX}_keys {}", keyspace.len());

        let _ = writeln!(output, "# HELP {PREFIX}_command_stats Command statistics");
        let _ = writeln!(output, "# TYPE {PREFIX}_command_stats counter");
        let mut stats: Vec<(String, u64)> = self
            .command_stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        stats.sort();
        for (command, count) in stats {
            let _ = writeln!(output, "{PREFIX}_command_stats{{command=\"{command}\"}} {count}");
        }

        output
    }
}
