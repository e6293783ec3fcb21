//! Core types for feedreel

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playable source in the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub url: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Ordered feed of entries. Playback order is insertion order and index
/// arithmetic wraps around.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(Vec<CatalogEntry>);

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.0.get(index)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.0
    }

    /// Wrap any index into `[0, len)`. Returns `None` for an empty catalog.
    pub fn normalize(&self, index: i64) -> Option<usize> {
        if self.0.is_empty() {
            return None;
        }
        let len = self.0.len() as i64;
        Some(index.rem_euclid(len) as usize)
    }

    /// Neighbour of `index` in the given direction
    pub fn step(&self, index: usize, direction: Direction) -> Option<usize> {
        self.normalize(index as i64 + direction.offset())
    }

    /// First index whose id equals `id`
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.0.iter().position(|entry| entry.id == id)
    }
}

/// Navigation direction. `Up` moves forward through the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl Direction {
    pub fn offset(&self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Session state machine states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No source selected yet
    #[default]
    Idle,
    /// Backend is preparing the current source
    Loading,
    /// Current source is playing
    Playing,
    /// Waiting out a backoff before re-attempting the same source
    Retrying,
    /// Source exhausted its retries, showing the load error
    Error,
    /// Moving on to the next source
    Advancing,
    /// Network dropped while a load was pending or during playback
    Offline,
    /// Every entry in the catalog has failed
    Exhausted,
}

impl SessionStatus {
    /// A backend load is pending; new selections are ignored
    pub fn is_load_in_flight(&self) -> bool {
        matches!(
            self,
            SessionStatus::Loading | SessionStatus::Retrying | SessionStatus::Offline
        )
    }

    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, target),
            // Reset
            (_, Idle) |
            // Selection
            (Idle | Playing | Error | Advancing | Exhausted, Loading) |
            (Retrying | Offline, Loading) |
            // Outcomes
            (Loading | Retrying, Playing) |
            (Loading | Playing, Retrying) |
            (Loading | Retrying | Playing, Error) |
            (Error | Playing, Advancing) |
            (Loading | Retrying | Playing, Offline) |
            (Idle | Playing | Error | Advancing, Exhausted)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Loading => write!(f, "loading"),
            SessionStatus::Playing => write!(f, "playing"),
            SessionStatus::Retrying => write!(f, "retrying"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Advancing => write!(f, "advancing"),
            SessionStatus::Offline => write!(f, "offline"),
            SessionStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Snapshot of the controller's mutable session variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_index: usize,
    pub status: SessionStatus,
    pub resume_seconds: f64,
    pub retry_count: u32,
    pub direction: Direction,
}

/// Coarse link quality used to scale timeouts and gate preloading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Good,
    Poor,
    #[default]
    Unknown,
}

impl NetworkQuality {
    /// Map a link-type hint (`slow-2g`, `2g`, `3g`, `4g`) to a quality class
    pub fn from_effective_type(effective_type: &str) -> Self {
        match effective_type.trim().to_ascii_lowercase().as_str() {
            "slow-2g" | "2g" => NetworkQuality::Poor,
            "3g" | "4g" => NetworkQuality::Good,
            _ => NetworkQuality::Unknown,
        }
    }
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkQuality::Good => write!(f, "good"),
            NetworkQuality::Poor => write!(f, "poor"),
            NetworkQuality::Unknown => write!(f, "unknown"),
        }
    }
}

/// Connectivity snapshot published by the network monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub online: bool,
    pub quality: NetworkQuality,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            online: true,
            quality: NetworkQuality::Unknown,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Retry attempts per source before it is blacklisted
    pub max_retries: u32,
    /// Backoff base delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: u64,
    /// Load timeout on good or unknown networks
    pub load_timeout_ms: u64,
    /// Load timeout on poor networks
    pub poor_network_load_timeout_ms: u64,
    /// How long the terminal load error is shown before advancing
    pub error_display_ms: u64,
    /// Auto-dismiss delay for transient notices
    pub notice_display_ms: u64,
    /// Resume position persistence interval
    pub resume_save_interval_ms: u64,
    /// Run a reachability probe before each load attempt
    pub validate_sources: bool,
    /// Reachability probe timeout
    pub validation_timeout_ms: u64,
    /// Warm up the next source on good networks
    pub preload_enabled: bool,
    /// Mute preference when none is stored
    pub default_muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            load_timeout_ms: 20_000,
            poor_network_load_timeout_ms: 30_000,
            error_display_ms: 2000,
            notice_display_ms: 1500,
            resume_save_interval_ms: 1000,
            validate_sources: false,
            validation_timeout_ms: 5000,
            preload_enabled: true,
            default_muted: true,
        }
    }
}

impl SessionConfig {
    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }

    pub fn notice_display(&self) -> Duration {
        Duration::from_millis(self.notice_display_ms)
    }

    pub fn resume_save_interval(&self) -> Duration {
        Duration::from_millis(self.resume_save_interval_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.retry_base_delay_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "retry_base_delay_ms must be positive".into(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(crate::Error::InvalidConfig(
                "retry_max_delay_ms must not be below retry_base_delay_ms".into(),
            ));
        }
        if self.load_timeout_ms == 0 || self.poor_network_load_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "load timeouts must be positive".into(),
            ));
        }
        if self.resume_save_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "resume_save_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(n: usize) -> Catalog {
        Catalog::new(
            (0..n)
                .map(|i| CatalogEntry::new(i.to_string(), format!("https://cdn.example/{i}.mp4")))
                .collect(),
        )
    }

    #[test]
    fn test_normalize_wraps_both_ways() {
        let c = catalog(3);
        assert_eq!(c.normalize(0), Some(0));
        assert_eq!(c.normalize(3), Some(0));
        assert_eq!(c.normalize(-1), Some(2));
        assert_eq!(c.normalize(-7), Some(2));
        assert_eq!(c.normalize(8), Some(2));
        assert_eq!(Catalog::default().normalize(4), None);
    }

    #[test]
    fn test_step() {
        let c = catalog(2);
        assert_eq!(c.step(1, Direction::Up), Some(0));
        assert_eq!(c.step(0, Direction::Down), Some(1));
    }

    #[test]
    fn test_position_of_first_match() {
        let c = Catalog::new(vec![
            CatalogEntry::new("7", "a.mp4"),
            CatalogEntry::new("7", "b.mp4"),
        ]);
        assert_eq!(c.position_of("7"), Some(0));
        assert_eq!(c.position_of("8"), None);
    }

    #[test]
    fn test_quality_table() {
        assert_eq!(NetworkQuality::from_effective_type("slow-2g"), NetworkQuality::Poor);
        assert_eq!(NetworkQuality::from_effective_type("2g"), NetworkQuality::Poor);
        assert_eq!(NetworkQuality::from_effective_type("3g"), NetworkQuality::Good);
        assert_eq!(NetworkQuality::from_effective_type("4G"), NetworkQuality::Good);
        assert_eq!(NetworkQuality::from_effective_type("wifi"), NetworkQuality::Unknown);
    }

    #[test]
    fn test_status_transitions() {
        use SessionStatus::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Playing));
        assert!(Retrying.can_transition_to(Loading));
        assert!(Offline.can_transition_to(Loading));
        assert!(Error.can_transition_to(Advancing));
        assert!(!Idle.can_transition_to(Playing));
        assert!(!Exhausted.can_transition_to(Playing));
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        let config = SessionConfig {
            retry_max_delay_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
