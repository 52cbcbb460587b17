mod install;

pub use install::InstallManager;
