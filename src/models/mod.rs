pub mod artifact;
pub mod genre;
pub mod rating;

pub use artifact::{ArtifactMetadata, ModelArtifact, MODEL_VERSION};
pub use genre::{Genre, GenreSet, TMDB_GENRE_NAMES};
pub use rating::{
    decade_of, ItemId, ItemMetadata, LocalMovie, LocalReview, RatingRecord, UserKey,
    UNKNOWN_YEAR,
};
