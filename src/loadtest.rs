//! HTTP traffic generator for load-testing a running server.
//!
//! Each simulated user picks health checks and chat completions in a fixed 1:2
//! ratio and records per-endpoint latency and failure counts.

use log::{info, warn};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

pub const CHAT_PROMPT: &str = "Who won the Stanley Cup in 2020?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Health,
    ChatCompletion,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Health, Task::ChatCompletion];

    pub fn weight(&self) -> usize {
        match self {
            Task::Health => 1,
            Task::ChatCompletion => 2,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Task::Health => "/v1/health",
            Task::ChatCompletion => "/v1/chat/completions",
        }
    }

    /// Name the task's results are grouped under.
    pub fn stats_name(&self) -> &'static str {
        match self {
            Task::Health => "/v1/health (GET)",
            Task::ChatCompletion => "/v1/chat/completions (POST)",
        }
    }
}

/// Endless cycle of tasks where every task appears as often as its weight says.
#[derive(Debug, Clone)]
pub struct TaskSchedule {
    cycle: Vec<Task>,
    position: usize,
}

impl TaskSchedule {
    /// `offset` staggers users so they don't all start with the same task.
    pub fn new(offset: usize) -> Self {
        let cycle: Vec<Task> = Task::ALL
            .iter()
            .flat_map(|task| std::iter::repeat_n(*task, task.weight()))
            .collect();
        let position = offset % cycle.len();

        Self { cycle, position }
    }

    pub fn cycle_len(&self) -> usize {
        self.cycle.len()
    }
}

impl Iterator for TaskSchedule {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        let task = self.cycle[self.position];
        self.position = (self.position + 1) % self.cycle.len();
        Some(task)
    }
}

pub fn chat_payload() -> serde_json::Value {
    json!({
        "messages": [
            {"role": "user", "content": CHAT_PROMPT}
        ],
        "temperature": 0.7,
        "max_tokens": 50
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointStats {
    pub requests: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub max_latency: Duration,
}

impl EndpointStats {
    pub fn mean_latency(&self) -> Duration {
        if self.requests == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_latency.as_nanos() / u128::from(self.requests);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    endpoints: BTreeMap<&'static str, EndpointStats>,
}

impl LoadStats {
    pub fn record(&mut self, task: Task, latency: Duration, success: bool) {
        let stats = self.endpoints.entry(task.stats_name()).or_default();
        stats.requests += 1;
        if !success {
            stats.failures += 1;
        }
        stats.total_latency += latency;
        stats.max_latency = stats.max_latency.max(latency);
    }

    pub fn merge(&mut self, other: LoadStats) {
        for (name, theirs) in other.endpoints {
            let ours = self.endpoints.entry(name).or_default();
            ours.requests += theirs.requests;
            ours.failures += theirs.failures;
            ours.total_latency += theirs.total_latency;
            ours.max_latency = ours.max_latency.max(theirs.max_latency);
        }
    }

    pub fn get(&self, task: Task) -> Option<&EndpointStats> {
        self.endpoints.get(task.stats_name())
    }

    pub fn total_requests(&self) -> u64 {
        self.endpoints.values().map(|s| s.requests).sum()
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:>10} {:>10} {:>12} {:>12}",
            "Name", "# reqs", "# fails", "avg (ms)", "max (ms)"
        )?;
        for (name, stats) in &self.endpoints {
            writeln!(
                f,
                "{:<32} {:>10} {:>10} {:>12} {:>12}",
                name,
                stats.requests,
                stats.failures,
                stats.mean_latency().as_millis(),
                stats.max_latency.as_millis()
            )?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct LoadClient {
    client: reqwest::Client,
    host: String,
}

impl LoadClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn url(&self, task: Task) -> String {
        format!("{}{}", self.host, task.path())
    }

    /// Runs one task. `Ok(false)` means the server answered with a non-success status.
    pub async fn run_task(&self, task: Task) -> Result<bool, reqwest::Error> {
        let request = match task {
            Task::Health => self.client.get(self.url(task)),
            Task::ChatCompletion => self.client.post(self.url(task)).json(&chat_payload()),
        };

        let response = request.send().await?;
        Ok(response.status().is_success())
    }
}

/// Simulates one user until `deadline`. A request still in flight at the deadline is
/// abandoned and counted as a failure.
pub async fn run_user(user: usize, client: LoadClient, deadline: Instant) -> LoadStats {
    info!("A new load test user {user} is starting...");

    let mut stats = LoadStats::default();
    for task in TaskSchedule::new(user) {
        if Instant::now() >= deadline {
            break;
        }

        let start = Instant::now();
        match timeout_at(deadline, client.run_task(task)).await {
            Ok(Ok(success)) => stats.record(task, start.elapsed(), success),
            Ok(Err(e)) => {
                warn!("user {user}: {} failed: {e}", task.stats_name());
                stats.record(task, start.elapsed(), false);
            }
            Err(_) => {
                warn!("user {user}: {} still pending at the deadline", task.stats_name());
                stats.record(task, start.elapsed(), false);
                break;
            }
        }
    }

    info!("Load test user {user} is stopping...");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_respects_weights() {
        let tasks: Vec<Task> = TaskSchedule::new(0).take(300).collect();

        let health = tasks.iter().filter(|t| **t == Task::Health).count();
        let chat = tasks.iter().filter(|t| **t == Task::ChatCompletion).count();
        assert_eq!(health, 100);
        assert_eq!(chat, 200);
    }

    #[test]
    fn test_schedule_offset_staggers_users() {
        let first: Vec<Task> = TaskSchedule::new(0).take(3).collect();
        let second: Vec<Task> = TaskSchedule::new(1).take(3).collect();

        assert_eq!(TaskSchedule::new(0).cycle_len(), 3);
        assert_ne!(first, second);
        assert_eq!(first[0], Task::Health);
        assert_eq!(second[2], Task::Health);
    }

    #[test]
    fn test_chat_payload_shape() {
        let payload = chat_payload();

        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], CHAT_PROMPT);
        assert_eq!(payload["temperature"], 0.7);
        assert_eq!(payload["max_tokens"], 50);
    }

    #[test]
    fn test_stats_record_and_merge() {
        let mut first = LoadStats::default();
        first.record(Task::Health, Duration::from_millis(10), true);
        first.record(Task::Health, Duration::from_millis(30), false);

        let mut second = LoadStats::default();
        second.record(Task::Health, Duration::from_millis(50), true);
        second.record(Task::ChatCompletion, Duration::from_millis(900), true);

        first.merge(second);

        let health = first.get(Task::Health).unwrap();
        assert_eq!(health.requests, 3);
        assert_eq!(health.failures, 1);
        assert_eq!(health.mean_latency(), Duration::from_millis(30));
        assert_eq!(health.max_latency, Duration::from_millis(50));
        assert_eq!(first.get(Task::ChatCompletion).unwrap().requests, 1);
        assert_eq!(first.total_requests(), 4);
    }

    #[test]
    fn test_report_lists_every_endpoint() {
        let mut stats = LoadStats::default();
        stats.record(Task::Health, Duration::from_millis(5), true);
        stats.record(Task::ChatCompletion, Duration::from_millis(5), false);

        let report = stats.to_string();
        assert!(report.contains("/v1/health (GET)"));
        assert!(report.contains("/v1/chat/completions (POST)"));
    }

    #[test]
    fn test_mean_latency_with_large_counts() {
        let stats = EndpointStats {
            requests: 1 << 32,
            failures: 0,
            total_latency: Duration::from_secs(1 << 32),
            max_latency: Duration::from_secs(2),
        };

        assert_eq!(stats.mean_latency(), Duration::from_secs(1));
        assert_eq!(EndpointStats::default().mean_latency(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_user_stops_at_deadline_when_server_hangs() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        // Accepts connections and never answers.
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let client = LoadClient::new(format!("http://{address}"));
        let deadline = Instant::now() + Duration::from_millis(200);

        let stats = tokio::time::timeout(Duration::from_secs(5), run_user(0, client, deadline))
            .await
            .expect("user kept running past its deadline");

        assert!(Instant::now() >= deadline);
        let health = stats.get(Task::Health).unwrap();
        assert_eq!(health.requests, 1);
        assert_eq!(health.failures, 1);
        assert!(stats.get(Task::ChatCompletion).is_none());

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_errors_count_as_failures() {
        // Bind then drop to get a port nothing listens on.
        let address = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let client = LoadClient::new(format!("http://{address}"));
        let deadline = Instant::now() + Duration::from_millis(100);

        let stats = run_user(0, client, deadline).await;

        assert!(stats.total_requests() > 0);
        let health = stats.get(Task::Health).unwrap();
        assert_eq!(health.failures, health.requests);
    }

    #[test]
    fn test_client_urls() {
        let client = LoadClient::new("http://localhost:3000/");

        assert_eq!(client.url(Task::Health), "http://localhost:3000/v1/health");
        assert_eq!(
            client.url(Task::ChatCompletion),
            "http://localhost:3000/v1/chat/completions"
        );
    }
}
