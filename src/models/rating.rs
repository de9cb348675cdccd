use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::GenreSet;

/// TMDB identifier of a movie
pub type ItemId = u32;

/// Release year assumed when none can be determined
pub const UNKNOWN_YEAR: i32 = 1900;

/// User identifier namespaced by the source the rating came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserKey {
    /// MovieLens user (rendered as `ml_<id>`)
    External(u32),
    /// Application user (rendered as `loc_<id>`)
    Local(i64),
}

impl UserKey {
    pub fn is_local(&self) -> bool {
        matches!(self, UserKey::Local(_))
    }
}

impl Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserKey::External(id) => write!(f, "ml_{}", id),
            UserKey::Local(id) => write!(f, "loc_{}", id),
        }
    }
}

impl FromStr for UserKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("ml_") {
            id.parse()
                .map(UserKey::External)
                .map_err(|e| format!("invalid external user id {:?}: {}", s, e))
        } else if let Some(id) = s.strip_prefix("loc_") {
            id.parse()
                .map(UserKey::Local)
                .map_err(|e| format!("invalid local user id {:?}: {}", s, e))
        } else {
            Err(format!("unknown user id namespace: {:?}", s))
        }
    }
}

/// Decade bucket of a year, e.g. 1994 -> 1990
pub fn decade_of(year: i32) -> i32 {
    year.div_euclid(10) * 10
}

/// One training rating on the unified 0-5 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user: UserKey,
    pub item: ItemId,
    pub rating: f64,
    pub timestamp: i64,
    pub year: i32,
    pub decade: i32,
    pub genres: GenreSet,
}

impl RatingRecord {
    /// Builds a record, deriving the decade from the year
    pub fn new(
        user: UserKey,
        item: ItemId,
        rating: f64,
        timestamp: i64,
        year: i32,
        genres: GenreSet,
    ) -> Self {
        Self {
            user,
            item,
            rating,
            timestamp,
            year,
            decade: decade_of(year),
            genres,
        }
    }
}

/// Movie metadata from the external dataset, joined onto ratings
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMetadata {
    /// MovieLens movieId
    pub external_id: u32,
    /// TMDB id used everywhere downstream
    pub item_id: ItemId,
    pub year: i32,
    pub genres: GenreSet,
    /// Raw tags as listed in the dataset
    pub genre_tags: Vec<String>,
}

/// Review stored by the application (0-10 scale)
#[derive(Debug, Clone, PartialEq)]
pub struct LocalReview {
    pub user_id: i64,
    /// Application primary key of the reviewed movie
    pub movie_id: i64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

/// Movie row stored by the application
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMovie {
    pub id: i64,
    pub tmdb_id: Option<ItemId>,
    pub release_year: Option<i32>,
    /// TMDB genre names
    pub genres: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key_namespaces() {
        let external = UserKey::External(7);
        let local = UserKey::Local(7);
        assert_ne!(external, local);
        assert_eq!(external.to_string(), "ml_7");
        assert_eq!(local.to_string(), "loc_7");
        assert!(local.is_local());
    }

    #[test]
    fn test_user_key_parse_round_trip() {
        assert_eq!("ml_42".parse::<UserKey>(), Ok(UserKey::External(42)));
        assert_eq!("loc_3".parse::<UserKey>(), Ok(UserKey::Local(3)));
        assert!("42".parse::<UserKey>().is_err());
    }

    #[test]
    fn test_decade_of() {
        assert_eq!(decade_of(1994), 1990);
        assert_eq!(decade_of(2000), 2000);
        assert_eq!(decade_of(UNKNOWN_YEAR), 1900);
    }

    #[test]
    fn test_record_derives_decade() {
        let record = RatingRecord::new(UserKey::External(1), 603, 4.5, 0, 1999, GenreSet::empty());
        assert_eq!(record.decade, 1990);
    }
}
