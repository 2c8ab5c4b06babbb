//! Coarse activity counters, logged and reset on a fixed interval.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pullgate_data::Login;

#[derive(Default)]
struct Counters {
    pull_requests: HashSet<String>,
    approvers: HashSet<Login>,
    disapprovers: HashSet<Login>,
}

#[derive(Clone, Default)]
pub struct Stats {
    counters: Arc<Mutex<Counters>>,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_pull_request(&self, repo_slug: &str, number: u32) {
        let mut counters = self.counters.lock().unwrap();
        counters.pull_requests.insert(format!("{repo_slug}#{number}"));
    }

    pub fn record_approver(&self, login: &Login) {
        let mut counters = self.counters.lock().unwrap();
        counters.approvers.insert(login.clone());
    }

    pub fn record_disapprover(&self, login: &Login) {
        let mut counters = self.counters.lock().unwrap();
        counters.disapprovers.insert(login.clone());
    }

    /// Logs the current counts and starts a fresh window.
    pub fn flush(&self) {
        let mut counters = self.counters.lock().unwrap();
        log::info!(
            "activity: {} pull requests, {} approvers, {} disapprovers",
            counters.pull_requests.len(),
            counters.approvers.len(),
            counters.disapprovers.len()
        );
        *counters = Counters::default();
    }

    /// Spawns a background thread that flushes on every tick.
    pub fn start_ticker(&self, interval: Duration) {
        let stats = self.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            stats.flush();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_actors_are_counted_once() {
        let stats = Stats::new();
        stats.record_approver(&Login::from("Alice"));
        stats.record_approver(&Login::from("alice"));
        stats.record_pull_request("octo/widgets", 7);
        stats.record_pull_request("octo/widgets", 7);
        let counters = stats.counters.lock().unwrap();
        assert_eq!(counters.approvers.len(), 1);
        assert_eq!(counters.pull_requests.len(), 1);
    }

    #[test]
    fn flush_resets_the_window() {
        let stats = Stats::new();
        stats.record_disapprover(&Login::from("bob"));
        stats.flush();
        let counters = stats.counters.lock().unwrap();
        assert!(counters.disapprovers.is_empty());
    }
}
