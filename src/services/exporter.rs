use chrono::Utc;
use ndarray::Array2;
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        ArtifactMetadata, Genre, ItemId, ModelArtifact, RatingRecord, MODEL_VERSION,
        TMDB_GENRE_NAMES,
    },
    services::training::TrainedModel,
};

/// Years before this are too sparse to anchor an extrapolation
const EXTRAPOLATION_MIN_YEAR: i32 = 1950;
/// Number of trailing known years averaged for unseen future years
const EXTRAPOLATION_WINDOW: i32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub keep_versioned: bool,
    pub extrapolate_years_until: i32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            keep_versioned: true,
            extrapolate_years_until: 2030,
        }
    }
}

/// Files written by one export
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub metadata_path: PathBuf,
    pub versioned_path: Option<PathBuf>,
    pub bytes: u64,
}

/// TMDB genre name -> MovieLens tag, for every TMDB genre the application knows
pub fn genre_mapping() -> BTreeMap<String, Option<String>> {
    TMDB_GENRE_NAMES
        .iter()
        .map(|&name| {
            let mapped = Genre::from_tmdb(name).map(|g| g.movielens_name().to_string());
            (name.to_string(), mapped)
        })
        .collect()
}

/// Fills years after the last known one up to `until` with a recent average
///
/// The average covers known years (>= 1950) within five years of the
/// latest. Returns the filled value, or `None` when nothing was known.
pub fn extrapolate_year_biases(year_biases: &mut HashMap<i32, f64>, until: i32) -> Option<f64> {
    let max_known = year_biases
        .keys()
        .copied()
        .filter(|&y| y >= EXTRAPOLATION_MIN_YEAR)
        .max()?;

    let recent: Vec<f64> = year_biases
        .iter()
        .filter(|(&y, _)| y >= EXTRAPOLATION_MIN_YEAR && y > max_known - EXTRAPOLATION_WINDOW)
        .map(|(_, &b)| b)
        .collect();
    let average = recent.iter().sum::<f64>() / recent.len() as f64;

    for year in (max_known + 1)..=until {
        year_biases.insert(year, average);
    }
    if until > max_known {
        tracing::info!(
            from = max_known + 1,
            until,
            average,
            "Extrapolated year biases"
        );
    }
    Some(average)
}

/// Assembles the artifact from a trained model and the frame it was fit on
pub fn build_artifact(
    model: TrainedModel,
    records: &[RatingRecord],
    item_genres: HashMap<ItemId, Vec<String>>,
    extrapolate_years_until: i32,
) -> ModelArtifact {
    let TrainedModel {
        biases,
        factors,
        params,
    } = model;

    let mut year_biases = biases.year;
    extrapolate_year_biases(&mut year_biases, extrapolate_years_until);

    let mut item_years = HashMap::new();
    for record in records {
        item_years.entry(record.item).or_insert(record.year);
    }

    let n_local_users = factors.users.keys().iter().filter(|u| u.is_local()).count();
    let metadata = ArtifactMetadata {
        run_id: Uuid::new_v4(),
        trained_at: Utc::now(),
        k: factors.rank(),
        damping: params.damping,
        n_users: factors.users.len(),
        n_items: factors.items.len(),
        n_ratings: records.len(),
        n_local_users,
        n_external_users: factors.users.len() - n_local_users,
        model_version: MODEL_VERSION.to_string(),
    };

    ModelArtifact {
        sigma: Array2::from_diag(&factors.singular_values),
        u: factors.u,
        vt: factors.vt,
        user_to_idx: factors.users.to_map(),
        item_to_idx: factors.items.to_map(),
        known_item_ids: factors.items.keys().to_vec(),
        global_mean: biases.global_mean,
        year_biases,
        item_biases: biases.item,
        user_biases: biases.user,
        user_genre_biases: biases.user_genre,
        user_decade_biases: biases.user_decade,
        item_genres,
        genre_mapping: genre_mapping(),
        item_years,
        metadata,
    }
}

/// Serializes the artifact next to `path` and renames it into place
///
/// Readers of `path` see either the previous artifact or the complete new
/// one. Returns the number of bytes written.
pub fn write_artifact_atomic(path: &Path, artifact: &ModelArtifact) -> AppResult<u64> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        bincode::serialize_into(&mut writer, artifact)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    let bytes = tmp.as_file().metadata()?.len();

    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(bytes)
}

/// Reads an artifact written by [`write_artifact_atomic`]
pub fn load_artifact(path: &Path) -> AppResult<ModelArtifact> {
    let reader = BufReader::new(File::open(path)?);
    let artifact: ModelArtifact = bincode::deserialize_from(reader)?;
    if !artifact.is_consistent() {
        return Err(AppError::InvalidInput(format!(
            "artifact at {} has mismatched factor shapes",
            path.display()
        )));
    }
    Ok(artifact)
}

/// `<path>.json`
pub fn metadata_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".json");
    PathBuf::from(os)
}

fn versioned_path(path: &Path, metadata: &ArtifactMetadata) -> PathBuf {
    let name = format!(
        "svd_model_{}.bin",
        metadata.trained_at.format("%Y%m%d_%H%M%S")
    );
    path.with_file_name(name)
}

/// Writes the artifact, its metadata sidecar and an optional versioned copy
pub fn export(artifact: &ModelArtifact, path: &Path, options: &ExportOptions) -> AppResult<ExportSummary> {
    let bytes = write_artifact_atomic(path, artifact)?;

    let metadata_path = metadata_path(path);
    fs::write(&metadata_path, serde_json::to_vec_pretty(&artifact.metadata)?)?;

    let versioned_path = if options.keep_versioned {
        let versioned = versioned_path(path, &artifact.metadata);
        fs::copy(path, &versioned)?;
        Some(versioned)
    } else {
        None
    };

    tracing::info!(
        path = %path.display(),
        bytes,
        users = artifact.metadata.n_users,
        items = artifact.metadata.n_items,
        k = artifact.metadata.k,
        versioned = versioned_path.is_some(),
        "Model exported"
    );

    Ok(ExportSummary {
        path: path.to_path_buf(),
        metadata_path,
        versioned_path,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenreSet, UserKey};
    use crate::services::training::{train_model, Hyperparameters, TrainingOptions};
    use tempfile::TempDir;

    fn frame() -> Vec<RatingRecord> {
        let mut genres = GenreSet::empty();
        genres.insert(Genre::Drama);
        vec![
            RatingRecord::new(UserKey::External(1), 10, 4.0, 0, 2019, genres),
            RatingRecord::new(UserKey::External(1), 11, 2.0, 0, 2021, GenreSet::empty()),
            RatingRecord::new(UserKey::External(2), 10, 3.0, 0, 2019, genres),
            RatingRecord::new(UserKey::External(2), 12, 5.0, 0, 2022, GenreSet::empty()),
            RatingRecord::new(UserKey::Local(1), 11, 4.5, 0, 2021, GenreSet::empty()),
            RatingRecord::new(UserKey::Local(1), 12, 1.0, 0, 2022, GenreSet::empty()),
        ]
    }

    fn artifact(until: i32) -> ModelArtifact {
        let records = frame();
        let model = train_model(
            &records,
            Hyperparameters { k: 2, damping: 1.0 },
            &TrainingOptions::default(),
        )
        .unwrap();
        let item_genres = HashMap::from([(10, vec!["Drama".to_string()])]);
        build_artifact(model, &records, item_genres, until)
    }

    #[test]
    fn test_extrapolation_uses_recent_known_years() {
        let mut biases = HashMap::from([
            (1900, 9.0),
            (2015, 1.0),
            (2016, 0.1),
            (2017, 0.2),
            (2018, 0.3),
            (2019, 0.4),
            (2020, 0.5),
        ]);
        let average = extrapolate_year_biases(&mut biases, 2023).unwrap();
        assert!((average - 0.3).abs() < 1e-12);
        assert_eq!(biases[&2023], average);
        assert_eq!(biases[&2020], 0.5);
        assert!(!biases.contains_key(&2024));
    }

    #[test]
    fn test_extrapolation_without_modern_years() {
        let mut biases = HashMap::from([(1900, 0.2), (1930, -0.1)]);
        assert_eq!(extrapolate_year_biases(&mut biases, 2030), None);
        assert_eq!(biases.len(), 2);
    }

    #[test]
    fn test_artifact_is_consistent() {
        let artifact = artifact(2024);
        assert!(artifact.is_consistent());
        assert_eq!(artifact.rank(), 2);
        assert_eq!(artifact.known_item_ids, vec![10, 11, 12]);
        assert_eq!(artifact.user_to_idx[&UserKey::External(2)], 1);
        assert_eq!(artifact.item_years[&12], 2022);
        assert_eq!(artifact.metadata.n_local_users, 1);
        assert_eq!(artifact.metadata.n_external_users, 2);
        assert_eq!(artifact.metadata.n_ratings, 6);
        assert!(artifact.year_biases.contains_key(&2024));
        assert_eq!(artifact.sigma[[0, 1]], 0.0);
        assert_eq!(artifact.genre_mapping["Family"].as_deref(), Some("Children's"));
        assert_eq!(artifact.genre_mapping["TV Movie"], None);
    }

    #[test]
    fn test_export_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("svd_model_latest.bin");
        let artifact = artifact(2030);

        let summary = export(&artifact, &path, &ExportOptions::default()).unwrap();
        assert!(summary.bytes > 0);

        let loaded = load_artifact(&path).unwrap();
        assert_eq!(loaded, artifact);
        let interaction = loaded.interaction(&UserKey::Local(1), 12);
        assert!(interaction.is_some());

        let versioned = summary.versioned_path.unwrap();
        assert_eq!(load_artifact(&versioned).unwrap(), artifact);

        let sidecar: ArtifactMetadata =
            serde_json::from_slice(&fs::read(summary.metadata_path).unwrap()).unwrap();
        assert_eq!(sidecar, artifact.metadata);
    }

    #[test]
    fn test_export_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"stale").unwrap();

        let artifact = artifact(2030);
        let options = ExportOptions {
            keep_versioned: false,
            ..ExportOptions::default()
        };
        let summary = export(&artifact, &path, &options).unwrap();
        assert!(summary.versioned_path.is_none());
        assert_eq!(load_artifact(&path).unwrap(), artifact);

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"not a model").unwrap();
        assert!(load_artifact(&path).is_err());
    }
}
