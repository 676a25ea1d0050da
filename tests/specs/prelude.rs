//! Test harness for behavioral specifications.
//!
//! Boots a daemon in-process against a temp state dir and exposes a small
//! wire-protocol client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agendo_core::test_support::{AgentBuilder, CapabilityBuilder, TaskBuilder};
use agendo_core::{Capability, Execution, StreamEvent};
use agendo_daemon::env::EnvMode;
use agendo_daemon::listener::Listener;
use agendo_daemon::protocol::{self, Request, Response};
use agendo_daemon::{lifecycle, Config};
use tempfile::TempDir;
use tokio::net::UnixStream;

pub const SPEC_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const SPEC_WAIT_MAX: Duration = Duration::from_secs(10);

/// One in-process daemon on its own state dir.
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    worker: Arc<agendo_daemon::worker::Worker>,
}

impl Harness {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(&workdir).unwrap();

        let config = Config {
            state_dir: dir.path().join("state"),
            worker_id: agendo_core::WorkerId::new("spec-worker"),
            poll_interval: Duration::from_millis(50),
            max_concurrent_jobs: 3,
            log_dir: dir.path().join("logs"),
            stale_threshold: Duration::from_secs(120),
            heartbeat_interval: Duration::from_millis(500),
            allowed_working_dirs: vec![workdir.canonicalize().unwrap()],
            env_mode: EnvMode::Test,
            jwt_secret: None,
            message_root: dir.path().join("messages"),
            min_free_bytes: 0,
        };

        let result = lifecycle::startup(config.clone()).await.unwrap();
        let ctx = Arc::new(result.daemon.listen_ctx(Arc::clone(&result.shutdown)));
        tokio::spawn(Listener::new(result.listener, ctx).run());
        let worker = Arc::clone(&result.daemon.worker);
        tokio::spawn(Arc::clone(&worker).run());

        // Keep the daemon state alive for the test's lifetime
        std::mem::forget(result.daemon);

        Self {
            dir,
            config,
            worker,
        }
    }

    pub fn workdir(&self) -> PathBuf {
        self.config.allowed_working_dirs[0].clone()
    }

    /// One request, one response.
    pub async fn request(&self, request: Request) -> Response {
        let stream = UnixStream::connect(self.config.socket_path()).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        protocol::write_message(&mut writer, &request).await.unwrap();
        let bytes = protocol::read_message(&mut reader).await.unwrap();
        protocol::decode(&bytes).unwrap()
    }

    /// Open a log stream and return its reader after the `Stream` ack.
    pub async fn open_stream(
        &self,
        request: Request,
    ) -> tokio::net::unix::OwnedReadHalf {
        let stream = UnixStream::connect(self.config.socket_path()).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        protocol::write_message(&mut writer, &request).await.unwrap();
        let bytes = protocol::read_message(&mut reader).await.unwrap();
        let ack: Response = protocol::decode(&bytes).unwrap();
        assert_eq!(ack, Response::Stream);
        // The writer half must outlive the stream; leak it
        std::mem::forget(writer);
        reader
    }

    pub async fn next_stream_event(
        &self,
        reader: &mut tokio::net::unix::OwnedReadHalf,
    ) -> StreamEvent {
        let bytes = tokio::time::timeout(SPEC_WAIT_MAX, protocol::read_message(reader))
            .await
            .expect("stream event timed out")
            .unwrap();
        protocol::decode(&bytes).unwrap()
    }

    /// Register a template agent+capability+task trio.
    pub async fn seed_template(&self, tokens: &[&str], timeout_sec: u64, max_output_bytes: u64) {
        let agent = AgentBuilder::default()
            .id("agent-1")
            .binary_path("/bin/echo")
            .default_working_dir(self.workdir())
            .max_concurrent(10)
            .build();
        assert_eq!(
            self.request(Request::RegisterAgent { agent }).await,
            Response::Ok
        );

        let capability: Capability = CapabilityBuilder::default()
            .id("cap-1")
            .agent_id("agent-1")
            .command_tokens(tokens)
            .timeout_sec(timeout_sec)
            .max_output_bytes(max_output_bytes)
            .build();
        assert_eq!(
            self.request(Request::RegisterCapability { capability }).await,
            Response::Ok
        );

        let task = TaskBuilder::default().id("task-1").build();
        assert_eq!(self.request(Request::CreateTask { task }).await, Response::Ok);
    }

    /// Create an execution and return its id.
    pub async fn create_execution(&self, args: &[(&str, &str)]) -> String {
        let response = self
            .request(Request::CreateExecution {
                task_id: "task-1".to_string(),
                capability_id: "cap-1".to_string(),
                args: args
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
                    .collect::<HashMap<_, _>>(),
                parent_execution_id: None,
                session_ref: None,
                cli_flags: vec![],
            })
            .await;
        match response {
            Response::ExecutionCreated { id } => id,
            other => panic!("create failed: {other:?}"),
        }
    }

    pub async fn get_execution(&self, id: &str) -> Option<Execution> {
        match self
            .request(Request::GetExecution { id: id.to_string() })
            .await
        {
            Response::Execution { execution } => Some(*execution),
            Response::Error { .. } => None,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    /// Poll until the execution reaches a terminal status.
    pub async fn wait_terminal(&self, id: &str) -> Execution {
        let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
        loop {
            if let Some(execution) = self.get_execution(id).await {
                if execution.is_terminal() {
                    return execution;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "execution {id} never reached a terminal status"
            );
            tokio::time::sleep(SPEC_POLL_INTERVAL).await;
        }
    }

    pub fn read_log(&self, execution: &Execution) -> String {
        let path = execution.log_path.as_ref().expect("log path set");
        std::fs::read_to_string(path).unwrap_or_default()
    }

    /// Write an executable shim script into the harness dir and return
    /// its path. Named shims stand in for agent binaries (the factory
    /// dispatches on the basename).
    pub fn write_shim(&self, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.dir.path().join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
