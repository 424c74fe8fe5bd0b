//! Shared doubles for host tests.

use std::ffi::OsString;
use std::fs;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde_json::{Value, json};
use tempfile::TempDir;

use appctl::{ComponentBehaviour, ExitCause, RootProcess, StartType, Started};
use appctl_config::Config;

use crate::{ConfigLoader, ShutdownError, ShutdownRequest, ShutdownSignal};

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Library root on disk holding component resource definitions.
pub(crate) struct Library {
    dir: TempDir,
}

impl Library {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create library root"),
        }
    }

    pub(crate) fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf-8 temp path")
    }

    pub(crate) fn define(&self, name: &str, definition: &Value) {
        let dir = self.dir.path().join(name);
        fs::create_dir_all(&dir).expect("create component directory");
        fs::write(
            dir.join(format!("{name}.component.json")),
            definition.to_string(),
        )
        .expect("write resource definition");
    }

    /// Writes `raw` next to the component directories and returns its path.
    pub(crate) fn write_overrides(&self, raw: &str) -> Utf8PathBuf {
        let path = self.root().join("overrides.json");
        fs::write(&path, raw).expect("write override document");
        path
    }

    /// Defines `db` and a `web` component that depends on it.
    pub(crate) fn with_web_stack(self) -> Self {
        self.define(
            "db",
            &json!({ "name": "db", "callback": { "module": "worker" }, "env": { "port": 5432 } }),
        );
        self.define(
            "web",
            &json!({
                "name": "web",
                "dependencies": ["db"],
                "callback": { "module": "worker" }
            }),
        );
        self
    }

    pub(crate) fn config(&self, boot: &[&str]) -> Config {
        Config {
            lib_dirs: vec![self.root()],
            boot: boot.iter().map(|name| (*name).to_owned()).collect(),
            env_timeout_ms: 200,
            ..Config::default()
        }
    }
}

/// Loader returning a fixed configuration or error.
pub(crate) struct TestConfigLoader {
    result: Result<Config, Arc<OrthoError>>,
}

impl TestConfigLoader {
    pub(crate) const fn new(config: Config) -> Self {
        Self { result: Ok(config) }
    }

    /// Resolves a configuration file that is not valid TOML.
    pub(crate) fn malformed(library: &Library) -> Self {
        let path = library.root().join("appctl.toml");
        fs::write(&path, "lib_dirs = [unterminated").expect("write malformed config");
        let args = [
            OsString::from("appctld"),
            OsString::from("--config-path"),
            OsString::from(path.as_str()),
        ];
        Self {
            result: Config::load_from_iter(args),
        }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        self.result.clone()
    }
}

/// Shutdown signal fired by the test.
#[derive(Clone, Default)]
pub(crate) struct TriggeredShutdown {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TriggeredShutdown {
    pub(crate) fn trigger(&self) {
        let (flag, ready) = &*self.state;
        *flag.lock().expect("shutdown flag lock") = true;
        ready.notify_all();
    }
}

impl ShutdownSignal for TriggeredShutdown {
    fn wait(&self) -> Result<ShutdownRequest, ShutdownError> {
        let (flag, ready) = &*self.state;
        let guard = flag.lock().expect("shutdown flag lock");
        drop(
            ready
                .wait_while(guard, |fired| !*fired)
                .expect("shutdown condvar wait"),
        );
        Ok(ShutdownRequest::new("test trigger"))
    }
}

/// Shutdown signal whose listener cannot be installed.
pub(crate) struct BrokenShutdown;

impl ShutdownSignal for BrokenShutdown {
    fn wait(&self) -> Result<ShutdownRequest, ShutdownError> {
        Err(ShutdownError::Install {
            source: std::io::Error::other("no signal support"),
        })
    }
}

/// Callback module whose root processes idle until stopped, or exit with a
/// cause sent through [`Worker::crash`].
pub(crate) struct Worker {
    crash_tx: Mutex<Sender<ExitCause>>,
    crash_rx: Arc<Mutex<Receiver<ExitCause>>>,
}

impl Worker {
    pub(crate) fn new() -> Arc<Self> {
        let (crash_tx, crash_rx) = mpsc::channel();
        Arc::new(Self {
            crash_tx: Mutex::new(crash_tx),
            crash_rx: Arc::new(Mutex::new(crash_rx)),
        })
    }

    /// Makes the next root process to poll exit with `cause`.
    pub(crate) fn crash(&self, cause: ExitCause) {
        self.crash_tx
            .lock()
            .expect("crash sender lock")
            .send(cause)
            .expect("worker listening");
    }
}

impl ComponentBehaviour for Worker {
    fn start(&self, _start_type: &StartType, _args: &Value) -> Result<Started, Value> {
        let crashes = Arc::clone(&self.crash_rx);
        RootProcess::spawn("worker", move |ctx| {
            loop {
                if ctx.wait_for_shutdown_timeout(Duration::from_millis(10)) {
                    return ExitCause::Shutdown;
                }
                if let Ok(cause) = crashes.lock().expect("crash receiver lock").try_recv() {
                    return cause;
                }
            }
        })
        .map(Started::new)
        .map_err(|err| json!(err.to_string()))
    }

    fn stop(&self, _state: Value) {}
}
