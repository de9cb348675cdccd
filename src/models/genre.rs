use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// MovieLens genre vocabulary
///
/// The declaration order is significant: user×genre biases are estimated
/// genre by genre in exactly this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genre {
    Action,
    Adventure,
    Animation,
    #[serde(rename = "Children's")]
    Childrens,
    Comedy,
    Crime,
    Documentary,
    Drama,
    Fantasy,
    #[serde(rename = "Film-Noir")]
    FilmNoir,
    Horror,
    Musical,
    Mystery,
    Romance,
    #[serde(rename = "Sci-Fi")]
    SciFi,
    Thriller,
    War,
    Western,
}

impl Genre {
    pub const ALL: [Genre; 18] = [
        Genre::Action,
        Genre::Adventure,
        Genre::Animation,
        Genre::Childrens,
        Genre::Comedy,
        Genre::Crime,
        Genre::Documentary,
        Genre::Drama,
        Genre::Fantasy,
        Genre::FilmNoir,
        Genre::Horror,
        Genre::Musical,
        Genre::Mystery,
        Genre::Romance,
        Genre::SciFi,
        Genre::Thriller,
        Genre::War,
        Genre::Western,
    ];

    /// Tag as written in the MovieLens genres column
    pub fn movielens_name(self) -> &'static str {
        match self {
            Genre::Action => "Action",
            Genre::Adventure => "Adventure",
            Genre::Animation => "Animation",
            Genre::Childrens => "Children's",
            Genre::Comedy => "Comedy",
            Genre::Crime => "Crime",
            Genre::Documentary => "Documentary",
            Genre::Drama => "Drama",
            Genre::Fantasy => "Fantasy",
            Genre::FilmNoir => "Film-Noir",
            Genre::Horror => "Horror",
            Genre::Musical => "Musical",
            Genre::Mystery => "Mystery",
            Genre::Romance => "Romance",
            Genre::SciFi => "Sci-Fi",
            Genre::Thriller => "Thriller",
            Genre::War => "War",
            Genre::Western => "Western",
        }
    }

    /// Exact-token lookup of a MovieLens tag
    pub fn from_movielens(tag: &str) -> Option<Genre> {
        Genre::ALL
            .into_iter()
            .find(|genre| genre.movielens_name() == tag.trim())
    }

    /// Maps a TMDB genre name onto the MovieLens vocabulary
    ///
    /// Returns `None` for TMDB genres with no MovieLens counterpart.
    pub fn from_tmdb(name: &str) -> Option<Genre> {
        match name.trim() {
            "Family" => Some(Genre::Childrens),
            "History" => Some(Genre::Drama),
            "Music" => Some(Genre::Musical),
            "Science Fiction" => Some(Genre::SciFi),
            "TV Movie" => None,
            other => Genre::from_movielens(other),
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.movielens_name())
    }
}

/// TMDB genre names the application knows, with their MovieLens mapping
pub const TMDB_GENRE_NAMES: [&str; 19] = [
    "Action",
    "Adventure",
    "Animation",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Family",
    "Fantasy",
    "History",
    "Horror",
    "Music",
    "Mystery",
    "Romance",
    "Science Fiction",
    "Thriller",
    "War",
    "Western",
    "TV Movie",
];

/// Set of genres attached to one item, stored as a bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenreSet(u32);

impl GenreSet {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Parses a pipe-separated MovieLens genres string
    ///
    /// Tokens outside the vocabulary (including "(no genres listed)") are ignored.
    pub fn from_movielens(genres: &str) -> Self {
        genres
            .split('|')
            .filter_map(Genre::from_movielens)
            .collect()
    }

    pub fn insert(&mut self, genre: Genre) {
        self.0 |= genre.bit();
    }

    pub fn contains(self, genre: Genre) -> bool {
        self.0 & genre.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Genres in vocabulary order
    pub fn iter(self) -> impl Iterator<Item = Genre> {
        Genre::ALL.into_iter().filter(move |g| self.contains(*g))
    }
}

impl FromIterator<Genre> for GenreSet {
    fn from_iter<I: IntoIterator<Item = Genre>>(iter: I) -> Self {
        let mut set = GenreSet::empty();
        for genre in iter {
            set.insert(genre);
        }
        set
    }
}
