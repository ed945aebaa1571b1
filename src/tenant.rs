use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, EngineOptions};
use crate::limits::MAX_TENANTS;
use crate::notify::NotifyHub;
use crate::reaper;
use crate::wal::Wal;

/// Per-company engines, loaded lazily on first use. Each company gets its own
/// engine, WAL file, waitlist reaper and compactor.
pub struct TenantManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    /// Serializes loads so one WAL file is never opened twice.
    loading: Mutex<()>,
    data_dir: PathBuf,
    compact_threshold: u64,
    reaper_interval: Duration,
    max_tenants: usize,
    options: EngineOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, reaper_interval: Duration, options: EngineOptions) -> Self {
        Self {
            engines: DashMap::new(),
            loading: Mutex::new(()),
            data_dir,
            compact_threshold,
            reaper_interval,
            max_tenants: MAX_TENANTS,
            options,
        }
    }

    pub fn with_max_tenants(mut self, max_tenants: usize) -> Self {
        self.max_tenants = max_tenants;
        self
    }

    pub fn wal_path(&self, company_id: Ulid) -> PathBuf {
        self.data_dir.join(format!("{company_id}.wal"))
    }

    fn loaded(&self, company_id: &Ulid) -> Option<Arc<Engine>> {
        self.engines.get(company_id).map(|e| e.value().clone())
    }

    /// The engine of a company that already exists, loading its WAL if needed.
    /// Nothing is created for an unknown company.
    pub async fn get(&self, company_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.loaded(&company_id) {
            return Ok(engine);
        }
        let exists = tokio::fs::try_exists(self.wal_path(company_id))
            .await
            .map_err(|e| EngineError::TransientRead(format!("looking up company {company_id}: {e}")))?;
        if !exists {
            return Err(EngineError::not_found("company", company_id));
        }
        self.load(company_id).await
    }

    /// The engine for `company_id`, starting an empty company if there is none.
    pub async fn get_or_create(&self, company_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.loaded(&company_id) {
            return Ok(engine);
        }
        self.load(company_id).await
    }

    /// Open and replay the WAL on the blocking pool. A replay failure is a read
    /// failure of internal state, never an empty company.
    async fn load(&self, company_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        let _guard = self.loading.lock().await;
        if let Some(engine) = self.loaded(&company_id) {
            return Ok(engine);
        }
        if self.engines.len() >= self.max_tenants {
            return Err(EngineError::LimitExceeded("too many companies"));
        }

        let path = self.wal_path(company_id);
        let read_failed = |e: String| EngineError::TransientRead(format!("loading company {company_id}: {e}"));
        let (wal, replay) = tokio::task::spawn_blocking(move || Wal::open(&path))
            .await
            .map_err(|e| read_failed(e.to_string()))?
            .map_err(|e| read_failed(e.to_string()))?;

        let engine = Arc::new(Engine::from_wal(
            company_id,
            wal,
            replay,
            Arc::new(NotifyHub::new()),
            self.options.clone(),
        ));
        self.engines.insert(company_id, engine.clone());

        tokio::spawn(reaper::run_reaper(engine.clone(), self.reaper_interval));
        tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(%company_id, "company loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveTime;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, Duration::from_secs(30), EngineOptions::default())
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));
        let a = tm.get_or_create(Ulid::new()).await.unwrap();
        let b = tm.get_or_create(Ulid::new()).await.unwrap();

        let sid = Ulid::new();
        let service = Service {
            id: sid,
            duration_minutes: 30,
            buffer_minutes: 0,
            min_notice_minutes: 0,
            max_lead_days: None,
            required_resource_type: None,
            max_capacity: 1,
        };
        a.upsert_service(service).await.unwrap();
        a.replace_schedule(
            Owner::Company,
            vec![ScheduleBlock {
                owner: Owner::Company,
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                is_unavailable: false,
            }],
        )
        .await
        .unwrap();

        // Same service id is unknown to the other company.
        assert!(matches!(
            b.remove_service(sid).await,
            Err(EngineError::NotFound { kind: "service", .. })
        ));
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(b.display_hours(date).await.unwrap().windows.is_empty());
        assert_eq!(a.display_hours(date).await.unwrap().windows.len(), 1);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        assert!(tm.is_empty());

        let company = Ulid::new();
        tm.get_or_create(company).await.unwrap();
        assert!(dir.join(format!("{company}.wal")).exists());
        assert_eq!(tm.len(), 1);
    }

    #[tokio::test]
    async fn unknown_company_is_not_created_by_get() {
        let dir = test_data_dir("get_unknown");
        let tm = manager(dir.clone());
        let company = Ulid::new();
        assert!(matches!(
            tm.get(company).await,
            Err(EngineError::NotFound { kind: "company", .. })
        ));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        assert!(tm.is_empty());
    }

    #[tokio::test]
    async fn get_loads_existing_company_from_disk() {
        let dir = test_data_dir("get_existing");
        let company = Ulid::new();
        let sid = Ulid::new();
        {
            let first = manager(dir.clone());
            first
                .get_or_create(company)
                .await
                .unwrap()
                .upsert_service(Service {
                    id: sid,
                    duration_minutes: 30,
                    buffer_minutes: 0,
                    min_notice_minutes: 0,
                    max_lead_days: None,
                    required_resource_type: None,
                    max_capacity: 1,
                })
                .await
                .unwrap();
        }

        let second = manager(dir);
        let engine = second.get(company).await.unwrap();
        assert_eq!(second.len(), 1);
        engine.remove_service(sid).await.unwrap();
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));
        let company = Ulid::new();
        let e1 = tm.get_or_create(company).await.unwrap();
        let e2 = tm.get_or_create(company).await.unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = manager(test_data_dir("count_limit")).with_max_tenants(3);
        for _ in 0..3 {
            tm.get_or_create(Ulid::new()).await.unwrap();
        }
        assert!(matches!(
            tm.get_or_create(Ulid::new()).await,
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[tokio::test]
    async fn unreadable_wal_is_a_read_failure() {
        let dir = test_data_dir("unreadable");
        let tm = manager(dir.clone());
        let company = Ulid::new();
        // A directory where the WAL file should be cannot be opened as a log.
        fs::create_dir_all(dir.join(format!("{company}.wal"))).unwrap();
        assert!(matches!(
            tm.get_or_create(company).await,
            Err(EngineError::TransientRead(_))
        ));
        assert!(tm.is_empty());
    }
}
