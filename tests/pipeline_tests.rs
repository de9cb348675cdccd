use std::fs;

use occam_recommender::{
    config::{Config, SplitStrategy},
    error::AppError,
    models::{Genre, GenreSet, RatingRecord, UserKey},
    services::{
        biases::estimate_biases,
        evaluation::evaluate,
        exporter::{build_artifact, export, load_artifact, ExportOptions},
        loader::load_dataset,
        residuals::debiased_rating,
        search::{trial_score, tune, RandomSearch},
        training::{train_model, Hyperparameters, TrainingOptions},
    },
};
use tempfile::TempDir;

fn record(user: u32, item: u32, rating: f64, year: i32, genres: GenreSet) -> RatingRecord {
    RatingRecord::new(UserKey::External(user), item, rating, 0, year, genres)
}

fn full_matrix(n_users: u32, n_items: u32) -> Vec<RatingRecord> {
    let mut frame = Vec::new();
    for user in 1..=n_users {
        for item in 1..=n_items {
            let rating = ((user * 7 + item * 3) % 10) as f64 / 2.0;
            frame.push(record(user, item, rating, 2001, GenreSet::empty()));
        }
    }
    frame
}

#[test]
fn test_full_small_matrix_fits_exactly() {
    let frame = full_matrix(3, 3);
    let model = train_model(
        &frame,
        Hyperparameters { k: 1000, damping: 0.0 },
        &TrainingOptions::default(),
    )
    .unwrap();

    assert_eq!(model.factors.rank(), 2);
    let report = evaluate(&model, &frame);
    assert_eq!(report.skipped, 0);
    assert!(report.rmse() < 1e-9, "rmse = {}", report.rmse());
}

#[test]
fn test_requested_rank_is_clamped() {
    let frame = full_matrix(5, 5);
    let model = train_model(
        &frame,
        Hyperparameters { k: 1000, damping: 3.0 },
        &TrainingOptions::default(),
    )
    .unwrap();

    assert_eq!(model.factors.rank(), 4);
    assert_eq!(model.factors.u.dim(), (5, 4));
    assert_eq!(model.factors.vt.dim(), (4, 5));
    let s = &model.factors.singular_values;
    assert!(s.iter().zip(s.iter().skip(1)).all(|(a, b)| a >= b));
}

#[test]
fn test_residual_matches_bias_decomposition() {
    let mut drama = GenreSet::empty();
    drama.insert(Genre::Drama);
    let mut both = drama;
    both.insert(Genre::Comedy);

    let frame = vec![
        record(1, 10, 4.0, 1994, drama),
        record(1, 11, 2.5, 2003, both),
        record(2, 10, 3.0, 1994, drama),
        record(2, 12, 5.0, 1978, GenreSet::empty()),
        record(3, 11, 1.0, 2003, both),
        record(3, 12, 4.5, 1978, GenreSet::empty()),
    ];
    let fit = estimate_biases(&frame, 2.0).unwrap();

    for (row, residual) in frame.iter().zip(fit.residuals.iter()) {
        let expected = row.rating - fit.biases.baseline(row);
        assert!((residual - expected).abs() < 1e-12);
        assert!((debiased_rating(&fit.biases, row, None) - expected).abs() < 1e-12);
    }
}

#[test]
fn test_search_survives_single_row_validation() {
    let frame = full_matrix(4, 4);
    let validation = vec![frame[5]];
    let score = trial_score(
        &frame,
        &validation,
        Hyperparameters { k: 50, damping: 2.0 },
        &TrainingOptions::default(),
    );
    assert!(score.is_finite());

    let tiny = vec![record(1, 1, 3.0, 2000, GenreSet::empty())];
    let mut strategy = RandomSearch::new(2, Hyperparameters { k: 20, damping: 5.0 }, 1);
    let outcome = tune(
        &tiny,
        &mut strategy,
        SplitStrategy::Random,
        0.8,
        1,
        &TrainingOptions::default(),
    );
    assert_eq!(outcome.trials.len(), 2);
    assert!(outcome.trials.iter().all(|t| t.score.is_infinite()));
    assert_eq!(outcome.best.k, 20);
}

#[test]
fn test_single_run_on_degenerate_frame_fails() {
    let frame = vec![
        record(1, 1, 3.0, 2000, GenreSet::empty()),
        record(2, 1, 4.0, 2000, GenreSet::empty()),
    ];
    let result = train_model(
        &frame,
        Hyperparameters { k: 5, damping: 1.0 },
        &TrainingOptions::default(),
    );
    assert!(matches!(result, Err(AppError::Factorization(_))));
}

#[test]
fn test_csv_dataset_to_artifact() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("ml");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("links.csv"),
        "movieId,imdbId,tmdbId\n1,1,862\n2,2,8844\n3,3,15602\n4,4,31357\n",
    )
    .unwrap();
    fs::write(
        data.join("movies.csv"),
        "movieId,title,genres\n\
         1,Toy Story (1995),Animation|Children's|Comedy\n\
         2,Jumanji (1995),Adventure|Children's|Fantasy\n\
         3,Grumpier Old Men (1995),Comedy|Romance\n\
         4,\"Waiting to Exhale (1995)\",Comedy|Drama|Romance\n",
    )
    .unwrap();

    let mut ratings = String::from("userId,movieId,rating,timestamp\n");
    for user in 1..=4u32 {
        for round in 0..3u32 {
            for movie in 1..=4u32 {
                let rating = ((user + movie + round) % 5 + 1) as f64;
                ratings.push_str(&format!("{},{},{},{}\n", user, movie, rating, round));
            }
        }
    }
    // Too few ratings to survive pruning
    ratings.push_str("9,1,5.0,0\n9,2,1.0,0\n");
    fs::write(data.join("ratings.csv"), ratings).unwrap();

    let config = Config {
        data_dir: data.clone(),
        min_user_ratings: 10,
        ..Config::default()
    };
    let dataset = load_dataset(&config).unwrap();
    assert_eq!(dataset.records.len(), 48);
    assert!(dataset
        .records
        .iter()
        .all(|r| r.user != UserKey::External(9)));

    let model = train_model(
        &dataset.records,
        Hyperparameters { k: 2, damping: 5.0 },
        &TrainingOptions::default(),
    )
    .unwrap();
    let artifact = build_artifact(model, &dataset.records, dataset.item_genres, 2030);

    let path = dir.path().join("ml_models").join("svd_model_latest.bin");
    let options = ExportOptions {
        keep_versioned: false,
        ..ExportOptions::default()
    };
    export(&artifact, &path, &options).unwrap();

    let loaded = load_artifact(&path).unwrap();
    assert_eq!(loaded.rank(), 2);
    assert_eq!(loaded.known_item_ids, vec![862, 8844, 15602, 31357]);
    assert_eq!(loaded.item_years[&31357], 1995);
    assert_eq!(loaded.item_genres[&862].len(), 3);
    assert!(loaded.year_biases.contains_key(&2030));
    assert!(loaded.interaction(&UserKey::External(3), 8844).is_some());
    assert!(loaded.interaction(&UserKey::External(9), 8844).is_none());
}
