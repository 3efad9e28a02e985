//! Background tasks
//!
//! A [`TaskScheduler`] holds named jobs with run intervals. A tokio interval
//! ticks every `tick_seconds` and runs whatever is due. A failing job is
//! logged and retried on its next interval; it never stops the loop.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::TasksConfig;
use crate::services::email::EmailService;
use crate::services::media::MediaService;
use crate::services::post::PostService;
use crate::services::search::SearchService;
use crate::services::settings::{keys, SettingsService};
use crate::services::sitemap::SitemapService;
use crate::services::user::UserService;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

struct ScheduledTask {
    name: String,
    interval: ChronoDuration,
    last_run: Option<DateTime<Utc>>,
    job: TaskFn,
}

/// Outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRun {
    pub name: String,
    pub success: bool,
    pub message: String,
}

pub struct TaskScheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
    tick: std::time::Duration,
}

impl TaskScheduler {
    pub fn new(tick: std::time::Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            tick,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job; a name registered twice replaces the earlier job
    pub fn register<F, Fut>(&self, name: &str, interval: ChronoDuration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let job: TaskFn = Arc::new(move || job().boxed());
        let mut tasks = self.lock();
        tasks.retain(|t| t.name != name);
        tasks.push(ScheduledTask {
            name: name.to_string(),
            interval,
            last_run: None,
            job,
        });
        debug!("Registered task '{}' every {}s", name, interval.num_seconds());
    }

    pub fn task_names(&self) -> Vec<String> {
        self.lock().iter().map(|t| t.name.clone()).collect()
    }

    pub fn last_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.last_run)
    }

    /// Run every job that has never run or whose interval has elapsed
    pub async fn run_pending(&self, now: DateTime<Utc>) -> Vec<TaskRun> {
        let due: Vec<(String, TaskFn)> = {
            let mut tasks = self.lock();
            tasks
                .iter_mut()
                .filter(|t| t.last_run.map_or(true, |last| now - last >= t.interval))
                .map(|t| {
                    t.last_run = Some(now);
                    (t.name.clone(), t.job.clone())
                })
                .collect()
        };

        let mut runs = Vec::with_capacity(due.len());
        for (name, job) in due {
            runs.push(execute(&name, job).await);
        }
        runs
    }

    /// Run one job now, regardless of its schedule
    pub async fn run(&self, name: &str) -> Result<TaskRun> {
        let job = {
            let mut tasks = self.lock();
            let task = tasks
                .iter_mut()
                .find(|t| t.name == name)
                .ok_or_else(|| anyhow!("Unknown task: {}", name))?;
            task.last_run = Some(Utc::now());
            task.job.clone()
        };
        Ok(execute(name, job).await)
    }

    /// Tick forever on the tokio runtime
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            info!(
                "Task scheduler started ({} tasks, tick {}s)",
                self.task_names().len(),
                self.tick.as_secs()
            );
            loop {
                interval.tick().await;
                self.run_pending(Utc::now()).await;
            }
        })
    }
}

async fn execute(name: &str, job: TaskFn) -> TaskRun {
    match job().await {
        Ok(message) => {
            info!("Task '{}' finished: {}", name, message);
            TaskRun {
                name: name.to_string(),
                success: true,
                message,
            }
        }
        Err(e) => {
            error!("Task '{}' failed: {:#}", name, e);
            TaskRun {
                name: name.to_string(),
                success: false,
                message: format!("{:#}", e),
            }
        }
    }
}

/// Everything the default jobs touch
pub struct TaskContext {
    pub posts: Arc<PostService>,
    pub users: Arc<UserService>,
    pub media: Arc<MediaService>,
    pub email: Arc<EmailService>,
    pub settings: Arc<SettingsService>,
    pub search: Arc<SearchService>,
    pub sitemap: Arc<SitemapService>,
    pub config: TasksConfig,
    pub upload_dir: PathBuf,
    pub database_file: Option<PathBuf>,
    pub base_url: String,
}

pub fn register_default_tasks(scheduler: &TaskScheduler, ctx: Arc<TaskContext>) {
    let c = ctx.clone();
    scheduler.register("cleanup_old_drafts", ChronoDuration::hours(24), move || {
        let c = c.clone();
        async move {
            let removed = c.posts.cleanup_old_drafts(c.config.draft_retention_days).await?;
            Ok(format!("removed {} drafts", removed))
        }
    });

    let c = ctx.clone();
    scheduler.register("cleanup_expired_sessions", ChronoDuration::hours(1), move || {
        let c = c.clone();
        async move {
            let removed = c.users.cleanup_expired_sessions().await?;
            Ok(format!("removed {} sessions", removed))
        }
    });

    let c = ctx.clone();
    scheduler.register("cleanup_old_media", ChronoDuration::days(7), move || {
        let c = c.clone();
        async move {
            let removed = c.media.cleanup(c.config.media_retention_days).await?;
            Ok(format!("removed {} files", removed))
        }
    });

    let c = ctx.clone();
    scheduler.register("send_digest_emails", ChronoDuration::hours(24), move || {
        let c = c.clone();
        async move { send_digests(&c).await }
    });

    let c = ctx.clone();
    scheduler.register("update_search_index", ChronoDuration::hours(1), move || {
        let c = c.clone();
        async move {
            let indexed = c.search.reindex().await?;
            Ok(format!("indexed {} documents", indexed))
        }
    });

    let c = ctx.clone();
    scheduler.register("update_sitemap", ChronoDuration::hours(24), move || {
        let c = c.clone();
        async move {
            let path = c.sitemap.write_to(&c.upload_dir).await?;
            Ok(format!("wrote {}", path.display()))
        }
    });

    let c = ctx;
    scheduler.register("backup_database", ChronoDuration::days(1), move || {
        let c = c.clone();
        async move {
            let backup_dir = c.config.backup_dir.clone();
            let database_file = c.database_file.clone();
            let upload_dir = c.upload_dir.clone();
            let keep = c.config.backup_keep;
            let report = tokio::task::spawn_blocking(move || {
                create_backup(
                    database_file.as_deref(),
                    &upload_dir,
                    &backup_dir,
                    keep,
                    Utc::now(),
                )
            })
            .await
            .context("Backup task panicked")??;
            Ok(report.to_string())
        }
    });
}

async fn send_digests(ctx: &TaskContext) -> Result<String> {
    if !ctx.settings.get_bool(keys::ENABLE_DIGESTS, false).await? {
        return Ok("digests disabled".to_string());
    }
    let since = Utc::now() - ChronoDuration::days(1);
    let posts: Vec<_> = ctx
        .posts
        .recent(50)
        .await?
        .into_iter()
        .filter(|p| p.created_at > since)
        .collect();
    if posts.is_empty() {
        return Ok("no new posts".to_string());
    }

    let mut sent = 0;
    for address in ctx.users.admin_emails().await? {
        if ctx.email.send_digest(&address, &posts, &ctx.base_url).await? {
            sent += 1;
        }
    }
    Ok(format!("sent {} digests covering {} posts", sent, posts.len()))
}

#[derive(Debug, Default)]
pub struct BackupReport {
    pub database: Option<PathBuf>,
    pub uploads: Option<PathBuf>,
    pub pruned: usize,
}

impl std::fmt::Display for BackupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "skipped".to_string())
        };
        write!(
            f,
            "database: {}, uploads: {}, pruned {}",
            show(&self.database),
            show(&self.uploads),
            self.pruned
        )
    }
}

/// Copy the SQLite file and zip the upload directory into `backup_dir`,
/// keeping the newest `keep` of each
pub fn create_backup(
    database_file: Option<&Path>,
    upload_dir: &Path,
    backup_dir: &Path,
    keep: usize,
    now: DateTime<Utc>,
) -> Result<BackupReport> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;
    let stamp = now.format("%Y%m%d_%H%M%S");
    let mut report = BackupReport::default();

    if let Some(db) = database_file.filter(|p| p.is_file()) {
        let target = backup_dir.join(format!("webbly_{}.db", stamp));
        fs::copy(db, &target)
            .with_context(|| format!("Failed to copy {}", db.display()))?;
        report.database = Some(target);
    }

    if upload_dir.is_dir() {
        let target = backup_dir.join(format!("uploads_{}.zip", stamp));
        zip_directory(upload_dir, &target)?;
        report.uploads = Some(target);
    }

    report.pruned = prune(backup_dir, "webbly_", ".db", keep)?
        + prune(backup_dir, "uploads_", ".zip", keep)?;
    Ok(report)
}

fn zip_directory(source: &Path, target: &Path) -> Result<()> {
    let file = File::create(target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let mut stack = vec![source.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = path
                .strip_prefix(source)
                .context("entry outside upload dir")?
                .to_string_lossy()
                .replace('\\', "/");
            writer.start_file(name, options)?;
            let mut input = File::open(&path)?;
            io::copy(&mut input, &mut writer)?;
        }
    }
    writer.finish()?.flush()?;
    Ok(())
}

/// Remove all but the `keep` newest files named `{prefix}*{suffix}`.
/// Names embed a sortable timestamp, so name order is age order.
fn prune(dir: &Path, prefix: &str, suffix: &str, keep: usize) -> Result<usize> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
        .collect();
    names.sort();

    let excess = names.len().saturating_sub(keep);
    for name in &names[..excess] {
        fs::remove_file(dir.join(name))?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn counting(scheduler: &TaskScheduler, name: &str, every: ChronoDuration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        scheduler.register(name, every, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("ok".to_string())
            }
        });
        count
    }

    #[tokio::test]
    async fn test_run_pending_respects_interval() {
        let scheduler = TaskScheduler::new(std::time::Duration::from_secs(60));
        let hourly = counting(&scheduler, "hourly", ChronoDuration::hours(1));
        let daily = counting(&scheduler, "daily", ChronoDuration::days(1));
        let start = Utc::now();

        assert_eq!(scheduler.run_pending(start).await.len(), 2);
        assert!(scheduler.run_pending(start + ChronoDuration::minutes(30)).await.is_empty());

        let runs = scheduler.run_pending(start + ChronoDuration::hours(1)).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].name, "hourly");
        assert_eq!(hourly.load(Ordering::SeqCst), 2);
        assert_eq!(daily.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.last_run("hourly"), Some(start + ChronoDuration::hours(1)));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_tasks() {
        let scheduler = TaskScheduler::new(std::time::Duration::from_secs(60));
        scheduler.register("broken", ChronoDuration::hours(1), || async {
            Err(anyhow!("disk on fire"))
        });
        let healthy = counting(&scheduler, "healthy", ChronoDuration::hours(1));

        let runs = scheduler.run_pending(Utc::now()).await;
        assert_eq!(runs.len(), 2);
        let broken = runs.iter().find(|r| r.name == "broken").unwrap();
        assert!(!broken.success);
        assert!(broken.message.contains("disk on fire"));
        assert_eq!(healthy.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_on_demand() {
        let scheduler = TaskScheduler::new(std::time::Duration::from_secs(60));
        let count = counting(&scheduler, "job", ChronoDuration::days(7));

        let run = scheduler.run("job").await.unwrap();
        assert!(run.success);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.last_run("job").is_some());
        assert!(scheduler.run("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let scheduler = TaskScheduler::new(std::time::Duration::from_secs(60));
        counting(&scheduler, "job", ChronoDuration::hours(1));
        let second = counting(&scheduler, "job", ChronoDuration::hours(1));
        assert_eq!(scheduler.task_names(), vec!["job".to_string()]);

        scheduler.run("job").await.unwrap();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backup_copies_and_prunes() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("webbly.db");
        fs::write(&db, b"sqlite bytes").unwrap();
        let uploads = dir.path().join("uploads");
        fs::create_dir_all(uploads.join("images")).unwrap();
        fs::write(uploads.join("images").join("a.png"), b"png").unwrap();
        let backups = dir.path().join("backups");

        let start = Utc::now();
        for i in 0..3 {
            let report = create_backup(
                Some(&db),
                &uploads,
                &backups,
                2,
                start + ChronoDuration::seconds(i),
            )
            .unwrap();
            assert!(report.database.is_some());
            assert!(report.uploads.is_some());
        }

        let mut names: Vec<String> = fs::read_dir(&backups)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.iter().filter(|n| n.ends_with(".db")).count(), 2);
        assert_eq!(names.iter().filter(|n| n.ends_with(".zip")).count(), 2);

        let newest_zip = backups.join(names.iter().filter(|n| n.ends_with(".zip")).last().unwrap());
        let archive = zip::ZipArchive::new(File::open(newest_zip).unwrap()).unwrap();
        assert!(archive.file_names().any(|n| n == "images/a.png"));
    }

    #[test]
    fn test_backup_without_database_file() {
        let dir = TempDir::new().unwrap();
        let report = create_backup(
            None,
            &dir.path().join("missing-uploads"),
            &dir.path().join("backups"),
            5,
            Utc::now(),
        )
        .unwrap();
        assert!(report.database.is_none());
        assert!(report.uploads.is_none());
        assert_eq!(report.pruned, 0);
    }
}
