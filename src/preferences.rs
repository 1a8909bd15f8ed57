//! Notification preferences: data, validation, and local persistence.
//!
//! Preferences are immutable snapshots. Every edit produces a new value that
//! the caller saves locally first and then pushes to the server, so a failed
//! push never loses the edit.
//!
//! The keyword list and the category map are independent. `mode` decides
//! which one the server matches against; switching modes clears neither.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{
    DEFAULT_SCHEDULE_END, DEFAULT_SCHEDULE_START, KEYWORD_MAX_CHARS, KEYWORD_MIN_CHARS,
    PREFERENCES_KEY, SCHEDULE_UTC_OFFSET_SECS,
};
use crate::error::{StorageError, ValidationError};
use crate::storage::SharedStore;

/// Which list the server matches incoming content against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Everything in the enabled categories.
    #[default]
    All,
    /// Only content matching a keyword.
    Keyword,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "keyword" => Ok(Self::Keyword),
            other => Err(format!("unknown mode {other:?}, expected \"all\" or \"keyword\"")),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

/// Wall-clock `HH:MM` in KST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WallClock(NaiveTime);

impl WallClock {
    /// Parse strict two-digit `HH:MM`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTime(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 5
            || bytes[2] != b':'
            || ![0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit())
        {
            return Err(invalid());
        }
        NaiveTime::parse_from_str(s, "%H:%M")
            .map(Self)
            .map_err(|_parse| invalid())
    }

    /// Underlying time of day.
    pub fn time(self) -> NaiveTime {
        self.0
    }
}

impl std::fmt::Display for WallClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for WallClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Daily delivery window ("quiet hours" outside of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Whether the window is enforced.
    pub enabled: bool,
    /// Window start, inclusive.
    pub start_time: WallClock,
    /// Window end, exclusive.
    pub end_time: WallClock,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: default_clock(DEFAULT_SCHEDULE_START),
            end_time: default_clock(DEFAULT_SCHEDULE_END),
        }
    }
}

fn default_clock(s: &str) -> WallClock {
    WallClock::parse(s).unwrap_or(WallClock(NaiveTime::MIN))
}

impl Schedule {
    /// Build a validated schedule.
    pub fn new(enabled: bool, start: &str, end: &str) -> Result<Self, ValidationError> {
        let start_time = WallClock::parse(start)?;
        let end_time = WallClock::parse(end)?;
        if start_time == end_time {
            return Err(ValidationError::EmptyWindow);
        }
        Ok(Self {
            enabled,
            start_time,
            end_time,
        })
    }

    /// Whether delivery is allowed at `at`.
    ///
    /// Windows with `end < start` wrap past midnight.
    pub fn allows(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = (at.naive_utc() + chrono::Duration::seconds(i64::from(SCHEDULE_UTC_OFFSET_SECS)))
            .time();
        let (start, end) = (self.start_time.time(), self.end_time.time());
        if start < end {
            start <= local && local < end
        } else {
            local >= start || local < end
        }
    }
}

/// Check a keyword candidate against the current list.
///
/// Checks run in a fixed order and the first violation wins: length,
/// characters, duplicate, capacity.
pub fn validate_keyword(
    candidate: &str,
    existing: &[String],
    max: usize,
) -> Result<(), ValidationError> {
    let keyword = candidate.trim();
    let len = keyword.chars().count();

    if len < KEYWORD_MIN_CHARS {
        return Err(ValidationError::TooShort {
            min: KEYWORD_MIN_CHARS,
        });
    }
    if len > KEYWORD_MAX_CHARS {
        return Err(ValidationError::TooLong {
            max: KEYWORD_MAX_CHARS,
        });
    }
    if !keyword.chars().all(is_keyword_char) {
        return Err(ValidationError::InvalidCharacters);
    }
    if existing.iter().any(|k| k == keyword) {
        return Err(ValidationError::Duplicate(keyword.to_string()));
    }
    if existing.len() >= max {
        return Err(ValidationError::CapacityReached { max });
    }
    Ok(())
}

/// ASCII letters and digits, Hangul, whitespace.
fn is_keyword_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(c,
            '\u{AC00}'..='\u{D7A3}' // syllables
            | '\u{1100}'..='\u{11FF}' // jamo
            | '\u{3130}'..='\u{318F}' // compatibility jamo
        )
}

/// Device notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    /// Master switch (false while paused).
    pub enabled: bool,
    /// Active matching mode.
    pub mode: Mode,
    /// Keywords, in insertion order.
    pub keywords: Vec<String>,
    /// Category switches, used in [`Mode::All`].
    pub categories: BTreeMap<String, bool>,
    /// Delivery window.
    pub schedule: Schedule,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: Mode::All,
            keywords: Vec::new(),
            categories: BTreeMap::new(),
            schedule: Schedule::default(),
        }
    }
}

impl NotificationPreferences {
    /// Snapshot with `candidate` appended, if valid.
    pub fn add_keyword(&self, candidate: &str, max: usize) -> Result<Self, ValidationError> {
        validate_keyword(candidate, &self.keywords, max)?;
        let mut next = self.clone();
        next.keywords.push(candidate.trim().to_string());
        Ok(next)
    }

    /// Snapshot without `keyword`. Unknown keywords leave the list as is.
    pub fn remove_keyword(&self, keyword: &str) -> Self {
        let keyword = keyword.trim();
        let mut next = self.clone();
        next.keywords.retain(|k| k != keyword);
        next
    }

    /// Snapshot with a different mode; keywords and categories are kept.
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Snapshot with the master switch set.
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    /// Snapshot with one category switched.
    pub fn with_category(&self, name: &str, on: bool) -> Self {
        let mut next = self.clone();
        next.categories.insert(name.to_string(), on);
        next
    }

    /// Snapshot with a new schedule.
    pub fn with_schedule(&self, schedule: Schedule) -> Self {
        Self {
            schedule,
            ..self.clone()
        }
    }
}

/// Local persistence for [`NotificationPreferences`].
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    storage: SharedStore,
}

impl PreferenceStore {
    /// Store preferences in `storage`.
    pub fn new(storage: SharedStore) -> Self {
        Self { storage }
    }

    /// Load saved preferences, or the defaults.
    ///
    /// Missing, unreadable, or corrupt state yields the defaults so the user
    /// can always start over.
    pub fn load(&self) -> NotificationPreferences {
        match self.storage.get(PREFERENCES_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt saved notification preferences: {e}");
                NotificationPreferences::default()
            }),
            Ok(None) => NotificationPreferences::default(),
            Err(e) => {
                log::warn!("Notification preferences unreadable: {e}");
                NotificationPreferences::default()
            }
        }
    }

    /// Persist preferences.
    pub fn save(&self, prefs: &NotificationPreferences) -> Result<(), StorageError> {
        let json = serde_json::to_string(prefs)
            .map_err(|e| StorageError::Unavailable(format!("serialize preferences: {e}")))?;
        self.storage.set(PREFERENCES_KEY, &json)
    }

    /// Drop saved preferences.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(PREFERENCES_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MAX_KEYWORDS;
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::TimeZone;
    use std::rc::Rc;

    fn kw(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_keyword_scenarios() {
        assert_eq!(validate_keyword("AI", &[], 10), Ok(()));
        assert_eq!(
            validate_keyword("A", &[], 10),
            Err(ValidationError::TooShort { min: 2 })
        );
        assert_eq!(
            validate_keyword("AI", &kw(&["AI"]), 10),
            Err(ValidationError::Duplicate("AI".to_string()))
        );
        assert_eq!(
            validate_keyword("AI", &vec!["x".to_string(); 10], 10),
            Err(ValidationError::CapacityReached { max: 10 })
        );
    }

    #[test]
    fn test_validate_keyword_bounds_and_charset() {
        assert_eq!(
            validate_keyword(&"a".repeat(21), &[], 10),
            Err(ValidationError::TooLong { max: 20 })
        );
        assert_eq!(validate_keyword(&"a".repeat(20), &[], 10), Ok(()));
        assert_eq!(validate_keyword("부동산", &[], 10), Ok(()));
        assert_eq!(validate_keyword("기본 소득", &[], 10), Ok(()));
        assert_eq!(validate_keyword("GPT4", &[], 10), Ok(()));
        assert_eq!(
            validate_keyword("AI!", &[], 10),
            Err(ValidationError::InvalidCharacters)
        );
        assert_eq!(
            validate_keyword("c++", &[], 10),
            Err(ValidationError::InvalidCharacters)
        );
        assert_eq!(
            validate_keyword("   ", &[], 10),
            Err(ValidationError::TooShort { min: 2 })
        );
    }

    #[test]
    fn test_validate_keyword_first_violation_wins() {
        // Too short and full: length is reported
        let full = vec!["x".to_string(); 10];
        assert_eq!(
            validate_keyword("!", &full, 10),
            Err(ValidationError::TooShort { min: 2 })
        );
        // Bad charset and duplicate: charset is reported
        assert_eq!(
            validate_keyword("a!", &kw(&["a!"]), 10),
            Err(ValidationError::InvalidCharacters)
        );
        // Duplicate and full: duplicate is reported
        let mut full_with_ai = vec!["x".to_string(); 9];
        full_with_ai.push("AI".to_string());
        assert_eq!(
            validate_keyword("AI", &full_with_ai, 10),
            Err(ValidationError::Duplicate("AI".to_string()))
        );
    }

    #[test]
    fn test_keywords_are_case_preserving() {
        let prefs = NotificationPreferences::default()
            .add_keyword("AI", DEFAULT_MAX_KEYWORDS)
            .unwrap()
            .add_keyword("ai", DEFAULT_MAX_KEYWORDS)
            .unwrap();
        assert_eq!(prefs.keywords, kw(&["AI", "ai"]));
    }

    #[test]
    fn test_add_and_remove_keyword_return_new_snapshots() {
        let base = NotificationPreferences::default();
        let added = base.add_keyword("  반도체 ", DEFAULT_MAX_KEYWORDS).unwrap();
        assert!(base.keywords.is_empty());
        assert_eq!(added.keywords, kw(&["반도체"]));

        let removed = added.remove_keyword("반도체");
        assert_eq!(added.keywords.len(), 1);
        assert!(removed.keywords.is_empty());

        assert_eq!(removed.remove_keyword("missing"), removed);
    }

    #[test]
    fn test_mode_switch_preserves_lists() {
        let prefs = NotificationPreferences::default()
            .add_keyword("AI", DEFAULT_MAX_KEYWORDS)
            .unwrap()
            .with_category("economy", true);

        let keyword_mode = prefs.with_mode(Mode::Keyword);
        let back = keyword_mode.with_mode(Mode::All);

        assert_eq!(keyword_mode.keywords, prefs.keywords);
        assert_eq!(keyword_mode.categories, prefs.categories);
        assert_eq!(back, prefs);
    }

    #[test]
    fn test_default_preferences() {
        let prefs = NotificationPreferences::default();
        assert!(!prefs.enabled);
        assert_eq!(prefs.mode, Mode::All);
        assert!(prefs.keywords.is_empty());
        assert!(!prefs.schedule.enabled);
        assert_eq!(prefs.schedule.start_time.to_string(), "09:00");
        assert_eq!(prefs.schedule.end_time.to_string(), "22:00");
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(NotificationPreferences::default()).unwrap();
        assert_eq!(json["mode"], "all");
        assert_eq!(json["schedule"]["startTime"], "09:00");
        assert_eq!(json["schedule"]["endTime"], "22:00");
        assert_eq!(json["schedule"]["enabled"], false);
    }

    #[test]
    fn test_wall_clock_parse() {
        assert!(WallClock::parse("00:00").is_ok());
        assert!(WallClock::parse("23:59").is_ok());
        assert!(WallClock::parse("24:00").is_err());
        assert!(WallClock::parse("9:00").is_err());
        assert!(WallClock::parse("09:60").is_err());
        assert!(WallClock::parse("0900").is_err());
    }

    #[test]
    fn test_wall_clock_parse_rejects_padding_inside_digits() {
        assert!(WallClock::parse(" 9:00").is_err());
        assert!(WallClock::parse("09: 5").is_err());
        assert!(WallClock::parse("9 :00").is_err());
        assert!(WallClock::parse("+9:00").is_err());
        assert!(Schedule::new(true, " 8:00", "20:00").is_err());
    }

    #[test]
    fn test_schedule_rejects_empty_window() {
        assert_eq!(
            Schedule::new(true, "08:00", "08:00"),
            Err(ValidationError::EmptyWindow)
        );
        assert_eq!(
            Schedule::new(true, "8am", "10:00"),
            Err(ValidationError::InvalidTime("8am".to_string()))
        );
    }

    #[test]
    fn test_schedule_allows_in_kst() {
        let schedule = Schedule::new(true, "09:00", "22:00").unwrap();
        // 00:30 UTC = 09:30 KST
        assert!(schedule.allows(Utc.with_ymd_and_hms(2026, 3, 2, 0, 30, 0).unwrap()));
        // 13:30 UTC = 22:30 KST
        assert!(!schedule.allows(Utc.with_ymd_and_hms(2026, 3, 2, 13, 30, 0).unwrap()));
        // 23:59 UTC = 08:59 KST
        assert!(!schedule.allows(Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 0).unwrap()));

        let disabled = Schedule {
            enabled: false,
            ..schedule
        };
        assert!(disabled.allows(Utc.with_ymd_and_hms(2026, 3, 2, 13, 30, 0).unwrap()));
    }

    #[test]
    fn test_schedule_wraps_midnight() {
        let night = Schedule::new(true, "22:00", "06:00").unwrap();
        // 14:00 UTC = 23:00 KST
        assert!(night.allows(Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()));
        // 20:00 UTC = 05:00 KST
        assert!(night.allows(Utc.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap()));
        // 03:00 UTC = 12:00 KST
        assert!(!night.allows(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap()));
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let store = PreferenceStore::new(Rc::new(MemoryStore::new()));
        let prefs = NotificationPreferences::default()
            .with_enabled(true)
            .with_mode(Mode::Keyword)
            .add_keyword("AI", DEFAULT_MAX_KEYWORDS)
            .unwrap()
            .with_category("politics", false)
            .with_schedule(Schedule::new(false, "07:30", "23:00").unwrap());

        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn test_load_falls_back_to_default() {
        let storage = Rc::new(MemoryStore::new());
        let store = PreferenceStore::new(storage.clone());
        assert_eq!(store.load(), NotificationPreferences::default());

        storage.set(PREFERENCES_KEY, "{not json").unwrap();
        assert_eq!(store.load(), NotificationPreferences::default());

        storage.set_available(false);
        assert_eq!(store.load(), NotificationPreferences::default());
    }

    #[test]
    fn test_load_fills_missing_fields() {
        let storage = Rc::new(MemoryStore::new());
        storage
            .set(PREFERENCES_KEY, r#"{"enabled":true,"keywords":["AI"]}"#)
            .unwrap();
        let prefs = PreferenceStore::new(storage).load();
        assert!(prefs.enabled);
        assert_eq!(prefs.keywords, kw(&["AI"]));
        assert_eq!(prefs.schedule, Schedule::default());
    }
}
