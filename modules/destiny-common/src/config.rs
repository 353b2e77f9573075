use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables. One
/// constructor per role, mirroring the teacher's per-binary `Config`
/// builders — each role only requires the env vars it actually reads.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (Persistence Gateway relational half)
    pub database_url: String,

    // OpenSearch (Persistence Gateway search half — index + percolator)
    pub search_url: String,

    // Object storage (Blob Gateway)
    pub blob_bucket: String,
    pub blob_region: String,
    pub presign_ttl_secs: u64,

    // HTTP server
    pub web_host: String,
    pub web_port: u16,

    // Robot authentication
    pub robot_auth_replay_window_secs: i64,

    // Task bus / worker pool
    pub worker_slots: usize,
    pub ingest_fanout: usize,

    // Dedup tuning (spec §9 Open Questions: thresholds are configuration)
    pub dedup: DedupConfig,

    // Robot HTTP client timeouts (spec §5)
    pub robot_connect_timeout: Duration,
    pub robot_total_timeout: Duration,

    // Enhancement request batching window (spec §4.H)
    pub automation_window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub trusted_unique_identifier_types: Vec<String>,
    pub candidate_k: usize,
    pub title_jaccard_duplicate_threshold: f64,
    pub title_jaccard_unresolved_floor: f64,
    pub shared_identifier_title_jaccard_threshold: f64,
    pub author_overlap_saturation: usize,
    pub decision_stale_retry_cap: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            trusted_unique_identifier_types: vec!["doi".to_string(), "open_alex".to_string()],
            candidate_k: 25,
            title_jaccard_duplicate_threshold: 0.5,
            title_jaccard_unresolved_floor: 0.3,
            shared_identifier_title_jaccard_threshold: 0.3,
            author_overlap_saturation: 8,
            decision_stale_retry_cap: 3,
        }
    }
}

impl Config {
    /// Load config for an ingestion worker (needs the store, blob gateway
    /// and task bus; no web server, no robot auth).
    pub fn ingest_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            search_url: required_env("SEARCH_URL"),
            blob_bucket: required_env("BLOB_BUCKET"),
            blob_region: env::var("BLOB_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            presign_ttl_secs: env_u64("PRESIGN_TTL_SECS", 3600),
            web_host: String::new(),
            web_port: 0,
            robot_auth_replay_window_secs: 300,
            worker_slots: env_usize("WORKER_SLOTS", 4),
            ingest_fanout: env_usize("INGEST_FANOUT", 32),
            dedup: DedupConfig::default(),
            robot_connect_timeout: Duration::from_secs(5),
            robot_total_timeout: Duration::from_secs(60),
            automation_window_secs: env_u64("AUTOMATION_WINDOW_SECS", 30),
        }
    }

    /// Load config for the dedup worker.
    pub fn dedup_from_env() -> Self {
        Self::ingest_from_env()
    }

    /// Load config for the orchestrator/API server (adds the HTTP listener
    /// and robot auth settings).
    pub fn server_from_env() -> Self {
        let mut cfg = Self::ingest_from_env();
        cfg.web_host = env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        cfg.web_port = env::var("WEB_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .expect("WEB_PORT must be a number");
        cfg.robot_auth_replay_window_secs = env_i64("ROBOT_AUTH_REPLAY_WINDOW_SECS", 300);
        cfg
    }

    /// Log the presence (not value) of sensitive env-derived fields.
    pub fn log_redacted(&self) {
        let fields = [
            ("DATABASE_URL", &self.database_url),
            ("SEARCH_URL", &self.search_url),
            ("BLOB_BUCKET", &self.blob_bucket),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
