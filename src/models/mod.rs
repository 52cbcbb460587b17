mod user;
mod forms;
mod task;
mod catalog;
mod container;

pub use user::{Account, SessionUser};
pub use forms::{LoginForm, RegisterForm, ChangePasswordForm, PullImageForm, WallpaperRequest};
pub use task::{InstallRequest, InstallStage, InstallTaskInfo, TaskId};
pub use catalog::{AppCatalogEntry, AppPatch, CatalogView};
pub use container::{ContainerSummary, ImageSummary, PortMapping, RunSpec, ExecOutput, OpOutcome};
