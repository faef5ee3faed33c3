//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns one explicit instance of every component; nothing is global. The
//! registry receives the session as its `CurrentSlideProvider`, and the
//! watcher receives the cache, registry, and reload flag as its targets.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::cache::CacheStore;
use crate::services::content::ContentCompiler;
use crate::services::feedback::FeedbackStore;
use crate::services::forms::ResponseStore;
use crate::services::persistence::Exportable;
use crate::services::registry::ConnectionRegistry;
use crate::services::session::SessionState;
use crate::services::stats::StatsStore;
use crate::services::watcher::{ReloadFlag, ReloadTargets};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub session: Arc<SessionState>,
    pub stats: Arc<StatsStore>,
    pub forms: Arc<ResponseStore>,
    pub feedback: Arc<FeedbackStore>,
    /// Compiled HTML keyed by locale.
    pub cache: Arc<CacheStore<String>>,
    pub registry: Arc<ConnectionRegistry>,
    pub reload: ReloadFlag,
    pub compiler: Arc<dyn ContentCompiler>,
}

impl AppState {
    /// Wire components together, loading durable stores from `config.data_dir`.
    #[must_use]
    pub fn new(config: AppConfig, session: SessionState, compiler: Arc<dyn ContentCompiler>) -> Self {
        let session = Arc::new(session);
        let stats = Arc::new(StatsStore::load(config.stats_path()));
        let forms = Arc::new(ResponseStore::load(config.forms_path()));
        let feedback = Arc::new(FeedbackStore::load(config.feedback_path()));
        let cache = Arc::new(CacheStore::new(config.cache_capacity));
        let registry = Arc::new(ConnectionRegistry::new(
            session.clone(),
            session.clone(),
            stats.clone(),
            feedback.clone(),
        ));

        Self {
            config: Arc::new(config),
            session,
            stats,
            forms,
            feedback,
            cache,
            registry,
            reload: ReloadFlag::default(),
            compiler,
        }
    }

    /// Stores flushed by the background export task and on shutdown.
    #[must_use]
    pub fn stores(&self) -> Vec<Arc<dyn Exportable>> {
        vec![self.stats.clone() as Arc<dyn Exportable>, self.forms.clone(), self.feedback.clone()]
    }

    #[must_use]
    pub fn reload_targets(&self) -> ReloadTargets {
        ReloadTargets {
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            reload: self.reload.clone(),
        }
    }
}

#[cfg(test)]
pub mod test_helpers {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::WatchMode;
    use crate::services::content::FileCompiler;

    pub const TEST_TOKEN: &str = "test-presenter-token";

    /// Config rooted in `dir`: content under `slides/`, data under `data/`.
    #[must_use]
    pub fn test_config(dir: &Path) -> AppConfig {
        AppConfig {
            port: 0,
            content_dir: dir.join("slides"),
            data_dir: dir.join("data"),
            presenter_token: Some(TEST_TOKEN.into()),
            cache_capacity: 4,
            watch_mode: WatchMode::Off,
            watch_debounce: Duration::from_millis(50),
            persist_interval: Duration::from_millis(100),
            default_locale: "en".into(),
        }
    }

    /// `AppState` over `dir` with a fixed presenter token and file compiler.
    #[must_use]
    pub fn test_app_state(dir: &Path) -> AppState {
        let config = test_config(dir);
        let compiler = Arc::new(FileCompiler::new(config.content_dir.clone()));
        AppState::new(config, SessionState::with_credential(TEST_TOKEN), compiler)
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
