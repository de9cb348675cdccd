use std::time::Instant;

use tracing_subscriber::EnvFilter;

use occam_recommender::{
    config::Config,
    db::{create_pool, load_local_ratings, PgLocalRatingSource},
    error::AppResult,
    services::{
        evaluation::evaluate,
        exporter::{build_artifact, export, ExportOptions},
        factorization::SvdOptions,
        loader::load_dataset,
        search::{tune, FixedParams, RandomSearch, SearchStrategy},
        training::{train_model, Hyperparameters, TrainingOptions},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    if let Err(e) = run(&config).await {
        tracing::error!(error = %e, fatal_input = e.is_fatal_input(), "Training run aborted");
        return Err(e.into());
    }

    Ok(())
}

fn search_strategy(config: &Config, configured: Hyperparameters) -> Box<dyn SearchStrategy> {
    if config.optimize {
        Box::new(RandomSearch::new(config.n_trials, configured, config.seed))
    } else {
        Box::new(FixedParams::new(configured))
    }
}

async fn run(config: &Config) -> AppResult<()> {
    let started = Instant::now();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_path = %config.model_path.display(),
        optimize = config.optimize,
        "Starting training run"
    );

    let mut dataset = load_dataset(config)?;

    match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            let source = PgLocalRatingSource::new(pool);
            load_local_ratings(&source, &mut dataset, config.local_boost_max).await?;
        }
        None => tracing::warn!("DATABASE_URL not set, training without local reviews"),
    }

    let (local_users, external_users) = dataset.user_counts();
    tracing::info!(
        ratings = dataset.records.len(),
        local_users,
        external_users,
        "Training frame ready"
    );

    let options = TrainingOptions {
        svd: SvdOptions {
            oversampling: config.svd_oversampling,
            power_iterations: config.svd_power_iterations,
            seed: config.seed,
            ..SvdOptions::default()
        },
        residual_clip: config.residual_clip,
    };
    let configured = Hyperparameters {
        k: config.latent_factors,
        damping: config.damping,
    };

    let mut strategy = search_strategy(config, configured);
    let outcome = tune(
        &dataset.records,
        strategy.as_mut(),
        config.split_strategy,
        config.train_fraction,
        config.seed,
        &options,
    );

    let model = train_model(&dataset.records, outcome.best, &options)?;
    let fit = evaluate(&model, &dataset.records);
    tracing::info!(train_rmse = fit.rmse(), "Final model trained");

    let export_options = ExportOptions {
        keep_versioned: config.keep_versioned,
        extrapolate_years_until: config.extrapolate_years_until,
    };
    let artifact = build_artifact(
        model,
        &dataset.records,
        dataset.item_genres,
        export_options.extrapolate_years_until,
    );
    export(&artifact, &config.model_path, &export_options)?;

    tracing::info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Training run complete"
    );
    Ok(())
}
