use regex::Regex;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::LazyLock,
};

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        Genre, GenreSet, ItemId, ItemMetadata, LocalMovie, LocalReview, RatingRecord, UserKey,
        UNKNOWN_YEAR,
    },
};

const NO_GENRES: &str = "(no genres listed)";

#[derive(Debug, Deserialize)]
struct LinkRow {
    #[serde(rename = "movieId")]
    movie_id: u32,
    #[serde(rename = "tmdbId", deserialize_with = "csv::invalid_option")]
    tmdb_id: Option<ItemId>,
}

#[derive(Debug, Deserialize)]
struct MovieRow {
    #[serde(rename = "movieId")]
    movie_id: u32,
    title: String,
    genres: String,
}

#[derive(Debug, Deserialize)]
struct RatingRow {
    #[serde(rename = "userId")]
    user_id: u32,
    #[serde(rename = "movieId")]
    movie_id: u32,
    rating: f64,
    timestamp: i64,
}

/// Item metadata keyed by MovieLens movieId, plus the item genre table
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub items: HashMap<u32, ItemMetadata>,
    /// TMDB id -> raw genre tags
    pub item_genres: HashMap<ItemId, Vec<String>>,
}

/// The unified training frame
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<RatingRecord>,
    /// TMDB id -> genre tags, exported with the model
    pub item_genres: HashMap<ItemId, Vec<String>>,
}

impl Dataset {
    pub fn user_counts(&self) -> (usize, usize) {
        let users: HashSet<UserKey> = self.records.iter().map(|r| r.user).collect();
        let local = users.iter().filter(|u| u.is_local()).count();
        (local, users.len() - local)
    }
}

/// Fails with `DatasetMissing` naming the first absent input file
pub fn ensure_dataset_files(paths: &[&Path]) -> AppResult<()> {
    match paths.iter().find(|path| !path.is_file()) {
        Some(missing) => Err(AppError::DatasetMissing(missing.to_path_buf())),
        None => Ok(()),
    }
}

/// First "(dddd)" group of a movie title
static TITLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{4})\)").expect("year pattern is valid"));

/// Release year from the first "(dddd)" group of a title
pub fn parse_year(title: &str) -> i32 {
    TITLE_YEAR
        .captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
        .unwrap_or(UNKNOWN_YEAR)
}

/// Pipe-split genre tags; the "(no genres listed)" marker yields none
pub fn parse_genre_tags(genres: &str) -> Vec<String> {
    let genres = genres.trim();
    if genres.is_empty() || genres == NO_GENRES {
        return Vec::new();
    }
    genres.split('|').map(|tag| tag.trim().to_string()).collect()
}

/// In-app reviews use a 0-10 scale
pub fn rescale_local_rating(rating: f64) -> f64 {
    rating / 2.0
}

/// Joins movies.csv onto links.csv, dropping movies without a TMDB id
pub fn load_catalog(movies_path: &Path, links_path: &Path) -> AppResult<Catalog> {
    let mut tmdb_ids = HashMap::new();
    for row in csv::Reader::from_path(links_path)?.deserialize::<LinkRow>() {
        let row = row?;
        if let Some(tmdb_id) = row.tmdb_id {
            tmdb_ids.insert(row.movie_id, tmdb_id);
        }
    }

    let mut catalog = Catalog::default();
    for row in csv::Reader::from_path(movies_path)?.deserialize::<MovieRow>() {
        let row = row?;
        let Some(&item_id) = tmdb_ids.get(&row.movie_id) else {
            continue;
        };
        let genre_tags = parse_genre_tags(&row.genres);
        let metadata = ItemMetadata {
            external_id: row.movie_id,
            item_id,
            year: parse_year(&row.title),
            genres: GenreSet::from_movielens(&row.genres),
            genre_tags: genre_tags.clone(),
        };
        catalog.item_genres.insert(item_id, genre_tags);
        catalog.items.insert(row.movie_id, metadata);
    }

    tracing::info!(
        links = tmdb_ids.len(),
        items = catalog.items.len(),
        "Loaded item metadata"
    );
    Ok(catalog)
}

/// Number of ratings per MovieLens user, before any join
pub fn count_user_ratings(ratings_path: &Path) -> AppResult<HashMap<u32, usize>> {
    let mut counts = HashMap::new();
    for row in csv::Reader::from_path(ratings_path)?.deserialize::<RatingRow>() {
        *counts.entry(row?.user_id).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Streams ratings.csv, keeping active users with known items
pub fn load_external_ratings(
    ratings_path: &Path,
    catalog: &Catalog,
    min_user_ratings: usize,
) -> AppResult<Vec<RatingRecord>> {
    let counts = count_user_ratings(ratings_path)?;
    let active: HashSet<u32> = counts
        .iter()
        .filter(|&(_, &count)| count >= min_user_ratings)
        .map(|(&user, _)| user)
        .collect();
    tracing::info!(
        users = counts.len(),
        active_users = active.len(),
        min_user_ratings,
        "Pruned sparse users"
    );
    drop(counts);

    let mut records = Vec::new();
    let mut unmatched = 0usize;
    for row in csv::Reader::from_path(ratings_path)?.deserialize::<RatingRow>() {
        let row = row?;
        if !active.contains(&row.user_id) {
            continue;
        }
        let Some(item) = catalog.items.get(&row.movie_id) else {
            unmatched += 1;
            continue;
        };
        records.push(RatingRecord::new(
            UserKey::External(row.user_id),
            item.item_id,
            row.rating,
            row.timestamp,
            item.year,
            item.genres,
        ));
    }

    tracing::info!(
        ratings = records.len(),
        unmatched,
        "Loaded external ratings"
    );
    Ok(records)
}

/// Loads and joins the three dataset files named by `config`
pub fn load_dataset(config: &Config) -> AppResult<Dataset> {
    let ratings_path = config.ratings_path();
    let movies_path = config.movies_path();
    let links_path = config.links_path();
    ensure_dataset_files(&[&ratings_path, &movies_path, &links_path])?;

    let catalog = load_catalog(&movies_path, &links_path)?;
    let records = load_external_ratings(&ratings_path, &catalog, config.min_user_ratings)?;
    Ok(Dataset {
        records,
        item_genres: catalog.item_genres,
    })
}

/// How many times each local row is repeated
///
/// Matches the average local user's row count to the average external
/// user's, within `[1, max]`.
pub fn local_boost_factor(
    external_rows: usize,
    external_users: usize,
    local_rows: usize,
    local_users: usize,
    max: usize,
) -> usize {
    let external_avg = external_rows as f64 / external_users.max(1) as f64;
    let local_avg = local_rows as f64 / local_users.max(1) as f64;
    let factor = (external_avg / local_avg.max(1.0)).floor() as usize;
    factor.clamp(1, max.max(1))
}

/// Converts in-app reviews into records and appends them to the frame
///
/// Reviews of movies without a TMDB id are dropped. Movie genres are mapped
/// onto the MovieLens vocabulary and backfill the item genre table for items
/// it has no tags for. Returns the number of rows appended.
pub fn merge_local(
    dataset: &mut Dataset,
    reviews: &[LocalReview],
    movies: &[LocalMovie],
    boost_max: usize,
) -> usize {
    let mut movie_map: HashMap<i64, (ItemId, i32, GenreSet)> = HashMap::new();
    for movie in movies {
        let Some(tmdb_id) = movie.tmdb_id else {
            continue;
        };
        let mapped: Vec<Genre> = movie
            .genres
            .iter()
            .map(String::as_str)
            .filter_map(Genre::from_tmdb)
            .collect();
        if !mapped.is_empty() {
            let has_tags = dataset
                .item_genres
                .get(&tmdb_id)
                .is_some_and(|tags| !tags.is_empty());
            if !has_tags {
                let tags = mapped.iter().map(|g| g.movielens_name().to_string()).collect();
                dataset.item_genres.insert(tmdb_id, tags);
            }
        }
        let year = movie.release_year.unwrap_or(UNKNOWN_YEAR);
        movie_map.insert(movie.id, (tmdb_id, year, mapped.into_iter().collect()));
    }

    let local: Vec<RatingRecord> = reviews
        .iter()
        .filter_map(|review| {
            let &(item, year, genres) = movie_map.get(&review.movie_id)?;
            Some(RatingRecord::new(
                UserKey::Local(review.user_id),
                item,
                rescale_local_rating(review.rating),
                review.created_at.timestamp(),
                year,
                genres,
            ))
        })
        .collect();

    let dropped = reviews.len() - local.len();
    if local.is_empty() {
        tracing::info!(dropped, "No usable local reviews");
        return 0;
    }

    let external_users: HashSet<UserKey> = dataset
        .records
        .iter()
        .filter(|r| !r.user.is_local())
        .map(|r| r.user)
        .collect();
    let external_rows = dataset.records.iter().filter(|r| !r.user.is_local()).count();
    let local_users: HashSet<UserKey> = local.iter().map(|r| r.user).collect();
    let boost = local_boost_factor(
        external_rows,
        external_users.len(),
        local.len(),
        local_users.len(),
        boost_max,
    );

    let added = local.len() * boost;
    dataset.records.reserve(added);
    for _ in 0..boost {
        dataset.records.extend_from_slice(&local);
    }

    tracing::info!(
        reviews = local.len(),
        users = local_users.len(),
        boost,
        dropped,
        "Merged local reviews"
    );
    added
}
