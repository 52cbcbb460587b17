use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortMapping {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub host_ip: Option<String>,
    pub protocol: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub ports: Vec<PortMapping>,
    pub web_url: Option<String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
    pub size: i64,
}

// Everything needed to create and start a detached container
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub ports: BTreeMap<String, u16>,  // "80/tcp" -> host port
    pub env: Vec<String>,              // KEY=VALUE
    pub volumes: Vec<String>,          // host:container[:mode]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

// Result of a guarded engine call, ready to show to the user
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct OpOutcome {
    pub ok: bool,
    pub message: String,
}

impl OpOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}
