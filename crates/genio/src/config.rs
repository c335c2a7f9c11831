use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("genio/", env!("CARGO_PKG_VERSION"));

/// Tunables for the failover strategy. The counts are deployment knobs, not
/// contracts; the defaults reflect the most complete strategy observed in
/// production.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// How many of the freshest pool credentials are eligible at all.
    /// Older entries are presumed stale and never tried.
    pub eligible_pool_window: usize,

    /// Pool credentials sampled (shuffled) against the current server in
    /// robust mode.
    pub primary_pool_sample: usize,

    /// Backup servers to try after the current server in robust mode.
    pub backup_server_count: usize,

    /// Pool credentials sampled against each backup server.
    pub backup_pool_sample: usize,

    /// Pool fallback attempts appended after an explicit credential in
    /// strict mode (unless the call is an exact probe).
    pub strict_pool_fallback: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            eligible_pool_window: 10,
            primary_pool_sample: 5,
            backup_server_count: 2,
            backup_pool_sample: 3,
            strict_pool_fallback: 5,
        }
    }
}

/// Tunables for the admission gate.
///
/// Admission is advisory: the controller never blocks a request forever.
/// Worst-case added latency is `max_slot_attempts * slot_retry_delay`.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Cooldown window forwarded to the counting service.
    pub cooldown: Duration,

    /// How many times a denied slot is re-requested before proceeding anyway.
    pub max_slot_attempts: u32,

    /// Wait between slot requests after a denial.
    pub slot_retry_delay: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            max_slot_attempts: 3,
            slot_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Options for the shared HTTP client used by the transport and slot gate.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for one generation attempt. Generation jobs are slow,
    /// so this is much longer than a typical API timeout.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub failover: FailoverConfig,
    pub admission: AdmissionConfig,

    /// Seed for the plan-order randomness. `None` draws from the OS; tests
    /// pin this to make attempt ordering reproducible.
    pub plan_seed: Option<u64>,
}
