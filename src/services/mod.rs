mod account_store;
mod catalog_store;
mod docker_service;
mod filebrowser;
mod monitor;

pub use account_store::AccountStore;
pub use catalog_store::CatalogStore;
pub use docker_service::{ContainerEngine, ContainerHost, DockerEngine, RetryPolicy};
pub use filebrowser::FileBrowserBridge;
pub use monitor::ResourceMonitor;
