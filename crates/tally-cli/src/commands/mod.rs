//! Command implementations
//!
//! `App` wires the whole per-user subsystem the way a host application
//! would: SQLite-backed local store, directory-backed cloud, static
//! identity, FX service, classifier, and pending queue.

pub mod books;
pub mod categories;
pub mod entries;
pub mod pending;
pub mod prefs;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use tally_core::{
    kv::{LocalStore, SqliteStore},
    Classifier, CoreConfig, FxService, HttpRateProvider, LearningStore, LedgerStore,
    OllamaProvider, PendingQueue, StaticIdentity, SyncOrchestrator, UserId,
};

use crate::cli::Cli;
use crate::cloud_dir::DirCloud;

pub struct App {
    pub data_dir: PathBuf,
    pub cloud_dir: PathBuf,
    pub db_path: PathBuf,
    pub store: Arc<LedgerStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub classifier: Classifier,
    pub queue: PendingQueue,
    pub config: CoreConfig,
}

impl App {
    pub fn build(cli: &Cli) -> Result<Self> {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("tally")))
            .context("could not determine a data directory; pass --data-dir")?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;

        let cloud_dir = cli
            .cloud_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("cloud"));

        let config = CoreConfig::load_from(&data_dir.join("config").join("tally.toml"))?;
        let user = UserId::from(cli.user.as_str());

        let db_path = data_dir.join(format!("{}.db", cli.user));
        let kv: Arc<dyn LocalStore> = Arc::new(
            SqliteStore::open(&db_path.to_string_lossy())
                .with_context(|| format!("opening {}", db_path.display()))?,
        );

        let fx = Arc::new(FxService::new(
            Arc::new(HttpRateProvider::new(&config.fx.endpoint)),
            &config.fx,
        ));
        let store = LedgerStore::open(user.clone(), kv.clone(), fx, &config)?;

        let cloud = Arc::new(DirCloud::new(&cloud_dir)?);
        let identity = Arc::new(StaticIdentity::new(user));
        let orchestrator =
            SyncOrchestrator::new(store.clone(), cloud, identity, &config.sync);

        let learning = Arc::new(LearningStore::open(kv.clone())?);
        let mut classifier = Classifier::new(store.clone(), learning.clone(), &config);
        if config.llm.enabled {
            classifier = classifier.with_llm(Arc::new(OllamaProvider::from_config(&config.llm)));
        }
        let queue = PendingQueue::new(kv, store.clone(), learning);

        Ok(Self {
            data_dir,
            cloud_dir,
            db_path,
            store,
            orchestrator,
            classifier,
            queue,
            config,
        })
    }
}

pub fn cmd_init(app: &App) -> Result<()> {
    // Building App already created the store; make the layout visible.
    println!("Data directory:  {}", app.data_dir.display());
    println!("Local store:     {}", app.db_path.display());
    println!("Cloud directory: {}", app.cloud_dir.display());
    println!(
        "Config override: {} (optional)",
        app.data_dir.join("config").join("tally.toml").display()
    );
    let categories = app.store.live_categories();
    println!(
        "Ready. {} categor{} available.",
        categories.len(),
        if categories.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}
