pub mod postgres;

pub use postgres::{create_pool, PgLocalRatingSource};

use crate::{
    error::AppResult,
    models::{LocalMovie, LocalReview},
    services::loader::{merge_local, Dataset},
};

/// Source of ratings made inside the application
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LocalRatingSource: Send + Sync {
    /// Movie reviews on the application's 0-10 scale
    async fn fetch_reviews(&self) -> AppResult<Vec<LocalReview>>;

    /// Movies with their TMDB id, release year and TMDB genre names
    async fn fetch_movies(&self) -> AppResult<Vec<LocalMovie>>;
}

/// Fetches local reviews and merges them into the training frame
///
/// Returns the number of rows appended.
pub async fn load_local_ratings(
    source: &dyn LocalRatingSource,
    dataset: &mut Dataset,
    boost_max: usize,
) -> AppResult<usize> {
    let reviews = source.fetch_reviews().await?;
    if reviews.is_empty() {
        tracing::info!("No local reviews found");
        return Ok(0);
    }
    let movies = source.fetch_movies().await?;

    Ok(merge_local(dataset, &reviews, &movies, boost_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::UserKey;
    use chrono::{TimeZone, Utc};

    fn reviews() -> Vec<LocalReview> {
        vec![
            LocalReview {
                user_id: 3,
                movie_id: 10,
                rating: 7.0,
                created_at: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            },
            LocalReview {
                user_id: 3,
                movie_id: 11,
                rating: 9.0,
                created_at: Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap(),
            },
        ]
    }

    fn movies() -> Vec<LocalMovie> {
        vec![LocalMovie {
            id: 10,
            tmdb_id: Some(550),
            release_year: Some(1999),
            genres: vec!["Drama".to_string()],
        }]
    }

    #[tokio::test]
    async fn test_load_local_ratings_merges_known_movies() {
        let mut source = MockLocalRatingSource::new();
        source.expect_fetch_reviews().times(1).returning(|| Ok(reviews()));
        source.expect_fetch_movies().times(1).returning(|| Ok(movies()));

        let mut dataset = Dataset::default();
        let added = load_local_ratings(&source, &mut dataset, 1).await.unwrap();

        assert_eq!(added, 1);
        let record = dataset.records[0];
        assert_eq!(record.user, UserKey::Local(3));
        assert_eq!(record.item, 550);
        assert_eq!(record.rating, 3.5);
        assert_eq!(record.decade, 1990);
        assert_eq!(dataset.item_genres[&550], vec!["Drama"]);
    }

    #[tokio::test]
    async fn test_no_reviews_skips_movie_query() {
        let mut source = MockLocalRatingSource::new();
        source.expect_fetch_reviews().returning(|| Ok(Vec::new()));
        source.expect_fetch_movies().never();

        let mut dataset = Dataset::default();
        let added = load_local_ratings(&source, &mut dataset, 1).await.unwrap();
        assert_eq!(added, 0);
        assert!(dataset.records.is_empty());
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let mut source = MockLocalRatingSource::new();
        source
            .expect_fetch_reviews()
            .returning(|| Err(AppError::Internal("connection reset".to_string())));

        let mut dataset = Dataset::default();
        let result = load_local_ratings(&source, &mut dataset, 1).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
