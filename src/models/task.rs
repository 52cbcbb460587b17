use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;
use super::container::RunSpec;

pub type TaskId = Uuid;

// Stages of one pull+run sequence. The numeric progress reported to the
// browser is derived from the stage, see `InstallStage::progress`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum InstallStage {
    Queued,
    Pulling,
    ImageReady,
    Creating { percent: u8 },
    Done,
    Failed { reason: String },
    Cancelled,
}

impl InstallStage {
    pub const IMAGE_READY_PERCENT: u8 = 90;

    pub fn progress(&self) -> i32 {
        match self {
            InstallStage::Queued | InstallStage::Pulling => 0,
            InstallStage::ImageReady => Self::IMAGE_READY_PERCENT as i32,
            InstallStage::Creating { percent } => *percent as i32,
            InstallStage::Done => 100,
            InstallStage::Failed { .. } | InstallStage::Cancelled => -1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstallStage::Queued => "queued",
            InstallStage::Pulling => "pulling",
            InstallStage::ImageReady => "image_ready",
            InstallStage::Creating { .. } => "creating",
            InstallStage::Done => "done",
            InstallStage::Failed { .. } => "failed",
            InstallStage::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallStage::Done | InstallStage::Failed { .. } | InstallStage::Cancelled
        )
    }

    // Position on the happy path; terminal failures have none
    fn rank(&self) -> Option<(i32, u8)> {
        let ordinal = match self {
            InstallStage::Queued => 0,
            InstallStage::Pulling => 1,
            InstallStage::ImageReady => 2,
            InstallStage::Creating { .. } => 3,
            InstallStage::Done => 4,
            InstallStage::Failed { .. } | InstallStage::Cancelled => return None,
        };
        Some((self.progress(), ordinal))
    }

    /// Whether a task sitting in `self` may move to `next`.
    ///
    /// Terminal stages never move again. Failure and cancellation are
    /// reachable from any live stage; everything else must move forward.
    pub fn can_advance_to(&self, next: &InstallStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

impl InstallRequest {
    pub fn run_spec(&self) -> RunSpec {
        RunSpec {
            image: self.image.clone(),
            name: self.name.clone(),
            ports: self.ports.clone(),
            env: self.env.clone(),
            volumes: self.volumes.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstallTaskInfo {
    pub task_id: TaskId,
    pub user_id: i64,
    pub app_name: String,
    pub image: String,
    pub stage: InstallStage,
    pub submission_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_values() {
        assert_eq!(InstallStage::Queued.progress(), 0);
        assert_eq!(InstallStage::Pulling.progress(), 0);
        assert_eq!(InstallStage::ImageReady.progress(), 90);
        assert_eq!(InstallStage::Creating { percent: 95 }.progress(), 95);
        assert_eq!(InstallStage::Done.progress(), 100);
        assert_eq!(InstallStage::Failed { reason: "x".into() }.progress(), -1);
        assert_eq!(InstallStage::Cancelled.progress(), -1);
    }

    #[test]
    fn test_forward_only_transitions() {
        let creating = InstallStage::Creating { percent: 93 };
        assert!(InstallStage::Queued.can_advance_to(&InstallStage::Pulling));
        assert!(InstallStage::Pulling.can_advance_to(&InstallStage::ImageReady));
        assert!(InstallStage::ImageReady.can_advance_to(&creating));
        assert!(creating.can_advance_to(&InstallStage::Creating { percent: 94 }));
        assert!(creating.can_advance_to(&InstallStage::Done));

        assert!(!creating.can_advance_to(&InstallStage::Creating { percent: 92 }));
        assert!(!creating.can_advance_to(&InstallStage::ImageReady));
        assert!(!InstallStage::Pulling.can_advance_to(&InstallStage::Queued));
    }

    #[test]
    fn test_failure_is_terminal() {
        let failed = InstallStage::Failed { reason: "pull failed".into() };
        assert!(InstallStage::Pulling.can_advance_to(&failed));
        assert!(!failed.can_advance_to(&InstallStage::Done));
        assert!(!failed.can_advance_to(&InstallStage::Creating { percent: 99 }));
        assert!(!InstallStage::Done.can_advance_to(&failed));
        assert!(!InstallStage::Cancelled.can_advance_to(&InstallStage::Pulling));
    }

    #[test]
    fn test_install_request_defaults() {
        let request: InstallRequest =
            serde_json::from_str(r#"{"name":"jellyfin","image":"jellyfin/jellyfin"}"#).unwrap();
        assert!(request.ports.is_empty());
        assert!(request.env.is_empty());
        let spec = request.run_spec();
        assert_eq!(spec.name, "jellyfin");
        assert_eq!(spec.image, "jellyfin/jellyfin");
    }
}
