use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trophy {
    pub id: String,
    pub title: String,
    pub awarded_at: DateTime<Utc>,
}

impl Trophy {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            awarded_at: Utc::now(),
        }
    }
}

/// Trophies a user has collected, keyed by trophy id.
#[derive(Debug, Default)]
pub struct TrophyChest {
    trophies: RwLock<BTreeMap<String, Trophy>>,
}

impl TrophyChest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trophies(trophies: impl IntoIterator<Item = Trophy>) -> Self {
        Self {
            trophies: RwLock::new(
                trophies
                    .into_iter()
                    .map(|trophy| (trophy.id.clone(), trophy))
                    .collect(),
            ),
        }
    }

    /// Returns false if a trophy with the same id was already awarded.
    pub fn award(&self, trophy: Trophy) -> bool {
        let mut trophies = self
            .trophies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if trophies.contains_key(&trophy.id) {
            return false;
        }
        trophies.insert(trophy.id.clone(), trophy);
        true
    }

    pub fn has(&self, id: &str) -> bool {
        self.trophies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn trophies(&self) -> Vec<Trophy> {
        self.trophies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trophies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
