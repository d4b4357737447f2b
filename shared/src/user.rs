use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::{level_for, GithubHandle, IsoWeek, MonthNumber, TimePeriod, Trophy, TrophyChest};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub total_score: u64,
    pub weekly_score: BTreeMap<IsoWeek, i64>,
    pub monthly_score: BTreeMap<MonthNumber, i64>,
    pub level: u32,
}

#[derive(Debug, Default)]
struct ScoreState {
    score: ScoreSnapshot,
    trophies: Option<Arc<TrophyChest>>,
}

/// Account data as reported by the identity provider (GitHub `/users/{login}` shape).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteIdentity {
    pub login: GithubHandle,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// One platform account with its progress.
///
/// Counters live behind their own lock so `&self` is enough to score; this lock
/// is unrelated to the persistence guard, committing stays a separate step.
#[derive(Debug, Deserialize)]
#[serde(from = "ProfileRecord")]
pub struct UserProfile {
    pub username: GithubHandle,
    pub name: String,
    pub email: Option<String>,
    pub location: String,
    pub avatar_url: String,
    pub profile_url: String,
    active: bool,
    public_profile: bool,
    state: RwLock<ScoreState>,
}

impl UserProfile {
    pub fn new(username: impl Into<GithubHandle>) -> Self {
        Self {
            username: username.into(),
            name: String::new(),
            email: None,
            location: String::new(),
            avatar_url: String::new(),
            profile_url: String::new(),
            active: false,
            public_profile: false,
            state: RwLock::default(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ScoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ScoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increase_score(&self, amount: u32) {
        self.increase_score_at(amount, Utc::now())
    }

    pub fn increase_score_at(&self, amount: u32, now: DateTime<Utc>) {
        let mut state = self.write_state();
        let score = &mut state.score;
        score.total_score = score.total_score.saturating_add(u64::from(amount));
        score.level = level_for(score.total_score);

        *score
            .weekly_score
            .entry(TimePeriod::Week.bucket(now))
            .or_default() += i64::from(amount);
        *score
            .monthly_score
            .entry(TimePeriod::Month.bucket(now))
            .or_default() += i64::from(amount);
    }

    pub fn decrease_score(&self, amount: u32) {
        self.decrease_score_at(amount, Utc::now())
    }

    /// The total stops at zero, the weekly and monthly buckets take the full amount.
    pub fn decrease_score_at(&self, amount: u32, now: DateTime<Utc>) {
        let mut state = self.write_state();
        let score = &mut state.score;
        score.total_score = score.total_score.saturating_sub(u64::from(amount));
        score.level = level_for(score.total_score);

        *score
            .weekly_score
            .entry(TimePeriod::Week.bucket(now))
            .or_default() -= i64::from(amount);
        *score
            .monthly_score
            .entry(TimePeriod::Month.bucket(now))
            .or_default() -= i64::from(amount);
    }

    /// Staff correction on top of the level table. The override holds until
    /// the next score change recomputes the level from the total.
    pub fn increase_level(&self) {
        let mut state = self.write_state();
        state.score.level = state.score.level.saturating_add(1);
    }

    /// Staff correction, floored at zero. Like [`Self::increase_level`] it
    /// holds until the next score change.
    pub fn decrease_level(&self) {
        let mut state = self.write_state();
        state.score.level = state.score.level.saturating_sub(1);
    }

    /// Returns the chest, creating an empty one on first access.
    pub fn trophy_chest(&self) -> Arc<TrophyChest> {
        if let Some(chest) = &self.read_state().trophies {
            return chest.clone();
        }

        self.write_state()
            .trophies
            .get_or_insert_with(Default::default)
            .clone()
    }

    pub fn total_score(&self) -> u64 {
        self.read_state().score.total_score
    }

    pub fn level(&self) -> u32 {
        self.read_state().score.level
    }

    pub fn weekly_score(&self, week: IsoWeek) -> i64 {
        self.read_state()
            .score
            .weekly_score
            .get(&week)
            .copied()
            .unwrap_or_default()
    }

    pub fn monthly_score(&self, month: MonthNumber) -> i64 {
        self.read_state()
            .score
            .monthly_score
            .get(&month)
            .copied()
            .unwrap_or_default()
    }

    pub fn score(&self) -> ScoreSnapshot {
        self.read_state().score.clone()
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_public_profile(&mut self, public: bool) {
        self.public_profile = public;
    }

    pub fn is_public_profile(&self) -> bool {
        self.public_profile
    }

    /// Copies the fields the provider reported. Absent fields and malformed
    /// emails leave the stored values untouched.
    pub fn import_identity(&mut self, identity: &RemoteIdentity) {
        if let Some(name) = &identity.name {
            self.name = name.clone();
        }
        if let Some(avatar_url) = &identity.avatar_url {
            self.avatar_url = avatar_url.clone();
        }
        if let Some(html_url) = &identity.html_url {
            self.profile_url = html_url.clone();
        }
        if let Some(location) = &identity.location {
            self.location = location.clone();
        }
        if let Some(email) = identity.email.as_deref().map(str::trim) {
            if is_plausible_email(email) {
                self.email = Some(email.to_string());
            }
        }
    }

    fn to_record(&self) -> ProfileRecord {
        let state = self.read_state();
        ProfileRecord {
            username: self.username.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            location: self.location.clone(),
            avatar_url: self.avatar_url.clone(),
            profile_url: self.profile_url.clone(),
            active: self.active,
            public_profile: self.public_profile,
            score: state.score.clone(),
            trophies: state.trophies.as_ref().map(|chest| chest.trophies()),
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Serialize, Deserialize)]
struct ProfileRecord {
    username: GithubHandle,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    avatar_url: String,
    #[serde(default)]
    profile_url: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    public_profile: bool,
    #[serde(default)]
    score: ScoreSnapshot,
    #[serde(default)]
    trophies: Option<Vec<Trophy>>,
}

impl From<ProfileRecord> for UserProfile {
    fn from(record: ProfileRecord) -> Self {
        Self {
            username: record.username,
            name: record.name,
            email: record.email,
            location: record.location,
            avatar_url: record.avatar_url,
            profile_url: record.profile_url,
            active: record.active,
            public_profile: record.public_profile,
            state: RwLock::new(ScoreState {
                score: record.score,
                trophies: record
                    .trophies
                    .map(|trophies| Arc::new(TrophyChest::from_trophies(trophies))),
            }),
        }
    }
}

impl Serialize for UserProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}
