use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::LocalRatingSource,
    error::AppResult,
    models::{LocalMovie, LocalReview},
};

/// Creates a PostgreSQL connection pool
///
/// The trainer issues a handful of sequential queries, so the pool stays small.
pub async fn create_pool(database_url: &str) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

const REVIEWS_QUERY: &str = r#"
    SELECT r.user_id::bigint, r.object_id::bigint, r.rating::float8, r.date_added
    FROM custom_auth_review r
    JOIN django_content_type ct ON ct.id = r.content_type_id
    WHERE ct.model = 'movie'
"#;

const MOVIES_QUERY: &str = r#"
    SELECT m.id::bigint,
           m.tmdb_id,
           EXTRACT(YEAR FROM m.release_date)::int,
           COALESCE(array_agg(g.name) FILTER (WHERE g.name IS NOT NULL), '{}')
    FROM custom_auth_movie m
    LEFT JOIN custom_auth_movie_genres mg ON mg.movie_id = m.id
    LEFT JOIN custom_auth_genre g ON g.id = mg.genre_id
    GROUP BY m.id, m.tmdb_id, m.release_date
"#;

/// Reads reviews and movies from the application database
#[derive(Clone)]
pub struct PgLocalRatingSource {
    pool: PgPool,
}

impl PgLocalRatingSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LocalRatingSource for PgLocalRatingSource {
    async fn fetch_reviews(&self) -> AppResult<Vec<LocalReview>> {
        let rows = sqlx::query_as::<_, (i64, i64, f64, DateTime<Utc>)>(REVIEWS_QUERY)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(rows = rows.len(), "Fetched local reviews");

        Ok(rows
            .into_iter()
            .map(|(user_id, movie_id, rating, created_at)| LocalReview {
                user_id,
                movie_id,
                rating,
                created_at,
            })
            .collect())
    }

    async fn fetch_movies(&self) -> AppResult<Vec<LocalMovie>> {
        let rows =
            sqlx::query_as::<_, (i64, Option<i32>, Option<i32>, Vec<String>)>(MOVIES_QUERY)
                .fetch_all(&self.pool)
                .await?;

        tracing::debug!(rows = rows.len(), "Fetched local movies");

        Ok(rows
            .into_iter()
            .map(|(id, tmdb_id, release_year, genres)| LocalMovie {
                id,
                tmdb_id: tmdb_id.and_then(|t| u32::try_from(t).ok()),
                release_year,
                genres,
            })
            .collect())
    }
}
