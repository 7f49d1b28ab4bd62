use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use digest_core::{
    create_backend, DigestConfig, DisabledNarrativeBackend, LlmError, NarrativeBackend,
};
use tracing_subscriber::{fmt, EnvFilter};

use digest_server::{DigestJob, NarrativeSynthesizer, PgDigestStore, ThematicPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "digest.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// User to build a thematic digest for
    #[arg(long)]
    user: Option<String>,

    /// Digest day (YYYY-MM-DD), defaults to today in UTC
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Daily email digest to read from, instead of the latest one for the day
    #[arg(long)]
    email_digest_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (GOOGLE_API_KEY in development)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match DigestConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let pool = match digest_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match digest_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Digest DB health check passed");
        return Ok(());
    }

    let Some(user_id) = args.user else {
        anyhow::bail!("--user is required unless --health is given");
    };
    let digest_date = args.date.unwrap_or_else(|| Utc::now().date_naive());

    digest_core::db::run_migrations(&pool).await?;

    let store = PgDigestStore::new(pool);
    let (email_digest_id, emails) = store
        .load_digest_emails(&user_id, digest_date, args.email_digest_id)
        .await?;
    tracing::info!(
        user_id = %user_id,
        digest_date = %digest_date,
        emails = emails.len(),
        "Loaded digest emails"
    );

    let backend: Arc<dyn NarrativeBackend> = match create_backend(&config.llm, None) {
        Ok(b) => b,
        Err(e @ LlmError::UnknownBackend(_)) => return Err(e.into()),
        Err(e) => {
            tracing::warn!("Narrative backend unavailable, every theme will use fallback text: {}", e);
            Arc::new(DisabledNarrativeBackend)
        }
    };

    let synthesizer = NarrativeSynthesizer::from_config(backend, &config);
    let pipeline = ThematicPipeline::from_config(synthesizer, Arc::new(store), &config);
    let job = DigestJob {
        user_id,
        digest_date,
        email_digest_id,
    };

    // Writes happen in one transaction at the end, so an interrupted run stores nothing.
    let report = tokio::select! {
        result = pipeline.run(&job, &emails) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Shutdown signal received, thematic digest not stored");
            return Ok(());
        }
    };

    tracing::info!(
        run_id = %report.run_id,
        digest_id = report.digest_id,
        sections = report.sections,
        total_source_emails = report.total_source_emails,
        degraded = report.degraded.len(),
        "Thematic digest complete"
    );
    println!("{}", report.digest_id);

    Ok(())
}
