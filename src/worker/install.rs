use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::config::InstallConfig;
use crate::errors::worker::{InstallError, InstallResult};
use crate::models::{InstallRequest, InstallStage, InstallTaskInfo, TaskId};
use crate::services::ContainerHost;

struct TaskRecord {
    info: InstallTaskInfo,
    cancel: CancellationToken,
}

struct ManagerInner {
    host: ContainerHost,
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    latest_by_user: RwLock<HashMap<i64, TaskId>>,
    semaphore: Arc<Semaphore>,
    animation_step: Duration,
}

/// Runs app installs (pull, then create and start) in the background.
///
/// Each install gets a task id right away. Installs past the concurrency
/// limit wait for a permit in the `queued` stage. Records live in memory
/// only and are lost on restart.
#[derive(Clone)]
pub struct InstallManager {
    inner: Arc<ManagerInner>,
}

impl InstallManager {
    pub fn new(host: ContainerHost, config: &InstallConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                host,
                tasks: RwLock::new(HashMap::new()),
                latest_by_user: RwLock::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                animation_step: Duration::from_millis(config.animation_step_ms),
            }),
        }
    }

    pub async fn enqueue(&self, user_id: i64, request: InstallRequest) -> TaskId {
        let task_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let info = InstallTaskInfo {
            task_id,
            user_id,
            app_name: request.name.clone(),
            image: request.image.clone(),
            stage: InstallStage::Queued,
            submission_time: Utc::now(),
            completion_time: None,
        };

        self.inner.tasks.write().await.insert(
            task_id,
            TaskRecord {
                info,
                cancel: cancel.clone(),
            },
        );
        self.inner.latest_by_user.write().await.insert(user_id, task_id);
        tracing::info!("Queued install {} of {} ({}) for user {}", task_id, request.name, request.image, user_id);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_task(task_id, request, cancel).await;
        });
        task_id
    }

    pub async fn task(&self, task_id: TaskId) -> Option<InstallTaskInfo> {
        self.inner
            .tasks
            .read()
            .await
            .get(&task_id)
            .map(|record| record.info.clone())
    }

    pub async fn latest_for_user(&self, user_id: i64) -> Option<InstallTaskInfo> {
        let task_id = *self.inner.latest_by_user.read().await.get(&user_id)?;
        self.task(task_id).await
    }

    /// Stops a task that has not finished yet. The task reports `cancelled`
    /// from this point on.
    pub async fn cancel(&self, task_id: TaskId) -> InstallResult<InstallTaskInfo> {
        let mut tasks = self.inner.tasks.write().await;
        let record = tasks
            .get_mut(&task_id)
            .ok_or_else(|| InstallError::TaskNotFound(task_id.to_string()))?;

        if record.info.stage.is_terminal() {
            return Err(InstallError::AlreadyFinished(task_id.to_string()));
        }

        record.cancel.cancel();
        record.info.stage = InstallStage::Cancelled;
        record.info.completion_time = Some(Utc::now());
        tracing::info!("Install {} cancelled", task_id);
        Ok(record.info.clone())
    }
}

impl ManagerInner {
    async fn run_task(&self, task_id: TaskId, request: InstallRequest, cancel: CancellationToken) {
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(InstallError::Cancelled),
            result = self.execute(task_id, &request) => result,
        };

        match result {
            Ok(()) => {
                self.advance(task_id, InstallStage::Done).await;
            }
            Err(InstallError::Cancelled) => {
                self.advance(task_id, InstallStage::Cancelled).await;
            }
            Err(e) => {
                tracing::error!("Install {} of {} failed: {}", task_id, request.name, e);
                self.advance(task_id, InstallStage::Failed { reason: e.to_string() }).await;
            }
        }
    }

    async fn execute(&self, task_id: TaskId, request: &InstallRequest) -> InstallResult<()> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| InstallError::PoolClosed)?;

        self.advance(task_id, InstallStage::Pulling).await;
        self.host.pull(&request.image).await?;
        self.advance(task_id, InstallStage::ImageReady).await;

        // Creation gives no progress feedback, so step through 91..99
        for percent in (InstallStage::IMAGE_READY_PERCENT + 1)..100 {
            sleep(self.animation_step).await;
            self.advance(task_id, InstallStage::Creating { percent }).await;
        }

        let container_id = self.host.run(&request.run_spec()).await?;
        tracing::info!("Install {} started container {}", task_id, container_id);
        Ok(())
    }

    /// Moves a task to `next` when that keeps progress monotonic.
    /// Returns false when the move was refused.
    async fn advance(&self, task_id: TaskId, next: InstallStage) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(record) = tasks.get_mut(&task_id) else {
            return false;
        };

        if !record.info.stage.can_advance_to(&next) {
            tracing::debug!(
                "Install {} ignoring move from {} to {}",
                task_id,
                record.info.stage.name(),
                next.name()
            );
            return false;
        }

        tracing::debug!("Install {}: {} -> {}", task_id, record.info.stage.name(), next.name());
        if next.is_terminal() {
            record.info.completion_time = Some(Utc::now());
            tracing::info!("Install {} finished as {}", task_id, next.name());
        }
        record.info.stage = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RetryPolicy;
    use crate::test_support::MockEngine;
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    fn manager(engine: Arc<MockEngine>, max_concurrent: usize) -> InstallManager {
        let host = ContainerHost::new(engine, RetryPolicy::default());
        InstallManager::new(host, &InstallConfig { max_concurrent, animation_step_ms: 1 })
    }

    fn request(name: &str) -> InstallRequest {
        InstallRequest {
            name: name.to_string(),
            image: format!("{}:latest", name),
            ports: [("80/tcp".to_string(), 8080)].into_iter().collect(),
            env: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Polls until the task is terminal, returning every progress value seen
    async fn watch(manager: &InstallManager, task_id: TaskId) -> Vec<i32> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let info = manager.task(task_id).await.unwrap();
                seen.push(info.stage.progress());
                if info.stage.is_terminal() {
                    break;
                }
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        seen
    }

    async fn wait_for_stage(manager: &InstallManager, task_id: TaskId, stage: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.task(task_id).await.unwrap().stage.name() != stage {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_install_progress_is_monotonic() {
        let engine = Arc::new(MockEngine::default());
        let manager = manager(engine.clone(), 2);

        let task_id = manager.enqueue(1, request("jellyfin")).await;
        let seen = watch(&manager, task_id).await;

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
        assert_eq!(*seen.last().unwrap(), 100);
        let info = manager.task(task_id).await.unwrap();
        assert!(info.completion_time.is_some());
        assert!(engine.containers.lock().iter().any(|c| c.name == "jellyfin"));
    }

    #[tokio::test]
    async fn test_failed_pull_reports_minus_one() {
        let engine = Arc::new(MockEngine::default());
        engine.pull_failures.store(1, Ordering::SeqCst);
        let manager = manager(engine.clone(), 2);

        let task_id = manager.enqueue(1, request("broken")).await;
        let seen = watch(&manager, task_id).await;
        assert_eq!(*seen.last().unwrap(), -1);

        sleep(Duration::from_millis(20)).await;
        let info = manager.task(task_id).await.unwrap();
        assert_eq!(info.stage.progress(), -1);
        match info.stage {
            InstallStage::Failed { reason } => assert!(reason.contains("manifest")),
            other => panic!("unexpected stage {:?}", other),
        }
        assert!(engine.containers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_after_pull() {
        let engine = Arc::new(MockEngine::default());
        engine.fail_run.store(true, Ordering::SeqCst);
        let manager = manager(engine, 1);

        let task_id = manager.enqueue(1, request("portclash")).await;
        let seen = watch(&manager, task_id).await;
        // Reached the synthetic creation range before failing
        assert!(seen.iter().any(|p| *p >= 90));
        assert_eq!(*seen.last().unwrap(), -1);
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let engine = Arc::new(MockEngine::default());
        let gate = Arc::new(Notify::new());
        *engine.pull_gate.lock() = Some(gate.clone());
        let manager = manager(engine.clone(), 1);

        let first = manager.enqueue(7, request("first")).await;
        wait_for_stage(&manager, first, "pulling").await;
        let second = manager.enqueue(7, request("second")).await;
        assert_eq!(manager.task(second).await.unwrap().stage, InstallStage::Queued);

        let cancelled = manager.cancel(second).await.unwrap();
        assert_eq!(cancelled.stage.progress(), -1);
        assert_eq!(manager.latest_for_user(7).await.unwrap().task_id, second);

        gate.notify_one();
        let seen = watch(&manager, first).await;
        assert_eq!(*seen.last().unwrap(), 100);

        assert_eq!(manager.task(second).await.unwrap().stage, InstallStage::Cancelled);
        assert_eq!(engine.pull_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(manager.cancel(first).await, Err(InstallError::AlreadyFinished(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_pull() {
        let engine = Arc::new(MockEngine::default());
        *engine.pull_gate.lock() = Some(Arc::new(Notify::new()));
        let manager = manager(engine.clone(), 1);

        let task_id = manager.enqueue(1, request("slow")).await;
        wait_for_stage(&manager, task_id, "pulling").await;
        manager.cancel(task_id).await.unwrap();

        sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.task(task_id).await.unwrap().stage, InstallStage::Cancelled);
        assert!(engine.containers.lock().is_empty());

        // The permit was released with the dropped pull
        *engine.pull_gate.lock() = None;
        let next = manager.enqueue(1, request("fast")).await;
        assert_eq!(*watch(&manager, next).await.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let manager = manager(Arc::new(MockEngine::default()), 1);
        assert!(manager.task(Uuid::new_v4()).await.is_none());
        assert!(manager.latest_for_user(99).await.is_none());
        assert!(matches!(
            manager.cancel(Uuid::new_v4()).await,
            Err(InstallError::TaskNotFound(_))
        ));
    }
}
