//! End-to-end scenarios across the driver-remote boundary: in-process
//! remotes through the spawner seam, and the real `viewlet-headless`
//! binary for the full process lifecycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use viewlet::{
    Driver, DriverConfig, DriverError, HeadlessWidget, ProcessSpawner, Readiness, RemoteLaunch,
    RemoteProc, RemoteSpawner, SelectorKind, SpawnError, run_remote,
};

const HEADLESS_BIN: &str = env!("CARGO_BIN_EXE_viewlet-headless");
const START_URL: &str = "http://localhost:8000/";

async fn wait_until(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Remote handle backed by a tokio task instead of an OS process.
struct TaskProc {
    handle: JoinHandle<()>,
}

impl RemoteProc for TaskProc {
    fn is_alive(&mut self) -> bool {
        !self.handle.is_finished()
    }

    fn kill(&mut self) {
        self.handle.abort();
    }

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Runs the remote in-process, optionally delaying its connection so
/// commands pile up in the driver's queue first.
struct TaskSpawner {
    ops: Arc<Mutex<Vec<String>>>,
    connect_delay: Duration,
}

impl TaskSpawner {
    fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            connect_delay: Duration::ZERO,
        }
    }

    fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn ops(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.ops)
    }
}

impl RemoteSpawner for TaskSpawner {
    fn spawn(&self, launch: &RemoteLaunch) -> Result<Box<dyn RemoteProc>, SpawnError> {
        let config = launch.config.clone();
        let delay = self.connect_delay;
        let ops = Arc::clone(&self.ops);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let readiness = Readiness::new();
            let widget = HeadlessWidget::new(readiness.clone()).with_ops(ops);
            if let Err(e) = run_remote(widget, config, readiness).await {
                eprintln!("in-process remote failed: {e}");
            }
        });
        Ok(Box::new(TaskProc { handle }))
    }
}

/// Connects to the driver like a remote would, but only records whatever
/// bytes arrive.
struct SpySpawner {
    seen: Arc<Mutex<Vec<u8>>>,
}

impl RemoteSpawner for SpySpawner {
    fn spawn(&self, launch: &RemoteLaunch) -> Result<Box<dyn RemoteProc>, SpawnError> {
        let port = launch.config.connection_port;
        let seen = Arc::clone(&self.seen);
        let handle = tokio::spawn(async move {
            let Ok(mut stream) = tokio::net::TcpStream::connect(("127.0.0.1", port)).await else {
                return;
            };
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.lock().unwrap().extend_from_slice(&buf[..n]),
                }
            }
        });
        Ok(Box::new(TaskProc { handle }))
    }
}

async fn launch_in_process() -> (Driver, Arc<Mutex<Vec<String>>>) {
    let spawner = TaskSpawner::new();
    let ops = spawner.ops();
    let driver = Driver::launch(DriverConfig::new(START_URL).with_spawner(Arc::new(spawner)))
        .await
        .unwrap();
    (driver, ops)
}

#[tokio::test]
async fn current_url_roundtrips_in_process() {
    let (driver, _ops) = launch_in_process().await;
    assert_eq!(driver.current_url().await.unwrap(), START_URL);
}

#[tokio::test]
async fn close_ends_the_remote_and_fails_later_calls() {
    let (driver, _ops) = launch_in_process().await;

    driver.close().await.unwrap();
    assert!(wait_until(|| !driver.remote_alive(), Duration::from_secs(10)).await);

    assert!(matches!(
        driver.current_url().await,
        Err(DriverError::RemoteExited)
    ));
}

#[tokio::test]
async fn end_to_end_with_a_real_process() {
    let driver = Driver::launch(
        DriverConfig::new(START_URL).with_spawner(Arc::new(ProcessSpawner::new(HEADLESS_BIN))),
    )
    .await
    .unwrap();

    assert_eq!(driver.current_url().await.unwrap(), START_URL);

    driver.close().await.unwrap();
    assert!(wait_until(|| !driver.remote_alive(), Duration::from_secs(10)).await);
}

#[tokio::test]
async fn rejected_urls_send_no_bytes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let driver = Driver::launch(DriverConfig::new(START_URL).with_spawner(Arc::new(SpySpawner {
        seen: Arc::clone(&seen),
    })))
    .await
    .unwrap();

    for bad in ["my purse", "ftp://x", "http//missing-colon"] {
        assert!(
            matches!(driver.open(bad).await, Err(DriverError::InvalidUrl(_))),
            "{bad:?} should be rejected"
        );
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn killing_the_remote_fails_inflight_and_future_executes() {
    // Held not-ready: the command is accepted but never executes, so it
    // is still in flight when the process dies.
    let spawner = ProcessSpawner::new(HEADLESS_BIN).with_env("VIEWLET_HEADLESS_HOLD", "1");
    let driver = Arc::new(
        Driver::launch(DriverConfig::new(START_URL).with_spawner(Arc::new(spawner)))
            .await
            .unwrap(),
    );

    let inflight = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.current_url().await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    driver.terminate_remote();

    let result = tokio::time::timeout(Duration::from_secs(5), inflight)
        .await
        .expect("in-flight execute must fail within bounded time")
        .unwrap();
    assert!(matches!(result, Err(DriverError::RemoteExited)));

    assert!(matches!(
        driver.current_url().await,
        Err(DriverError::RemoteExited)
    ));
}

#[tokio::test]
async fn queued_commands_run_in_submission_order() {
    let spawner = TaskSpawner::new().with_connect_delay(Duration::from_millis(400));
    let ops = spawner.ops();
    let driver = Arc::new(
        Driver::launch(DriverConfig::new(START_URL).with_spawner(Arc::new(spawner)))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let driver = Arc::clone(&driver);
        handles.push(tokio::spawn(async move { driver.set_page(name).await }));
        // Stagger submissions so the queue order is deterministic.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let ops = ops.lock().unwrap();
    let pages: Vec<&str> = ops
        .iter()
        .filter(|op| op.starts_with("page "))
        .map(|op| op.as_str())
        .collect();
    assert_eq!(pages, ["page alpha", "page beta", "page gamma"]);
}

#[tokio::test]
async fn identical_concurrent_commands_each_get_a_result() {
    let (driver, _ops) = launch_in_process().await;

    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(driver.current_url(), driver.current_url())
    })
    .await
    .expect("neither caller may hang");

    assert_eq!(a.unwrap(), START_URL);
    assert_eq!(b.unwrap(), START_URL);
}

#[tokio::test]
async fn scripts_roundtrip_and_clean_up_their_file() {
    let (driver, ops) = launch_in_process().await;

    let result = driver.execute_script("return 1;").await.unwrap();
    assert_eq!(result, "return 1;");

    let path = {
        let ops = ops.lock().unwrap();
        ops.iter()
            .find_map(|op| op.strip_prefix("js ").map(str::to_string))
            .expect("script ran on the widget")
    };
    assert!(!std::path::Path::new(&path).exists());
}

#[tokio::test]
async fn script_faults_surface_as_typed_errors() {
    let (driver, _ops) = launch_in_process().await;

    match driver.execute_script("throw boom").await {
        Err(DriverError::ScriptExecutionFault { output, .. }) => {
            assert!(output.contains("boom"), "{output:?}");
        }
        other => panic!("expected script fault, got {other:?}"),
    }
}

#[tokio::test]
async fn clicks_resolve_positions_for_both_selector_kinds() {
    let (driver, ops) = launch_in_process().await;

    driver.click("#button", SelectorKind::Css).await.unwrap();
    driver.click("//button", SelectorKind::Xpath).await.unwrap();

    let ops = ops.lock().unwrap();
    assert!(ops.iter().any(|op| op == "lookup css #button"));
    assert!(ops.iter().any(|op| op == "lookup xpath //button"));
    assert_eq!(ops.iter().filter(|op| op.starts_with("click ")).count(), 2);
}

#[tokio::test]
async fn clicking_a_missing_element_is_a_remote_fault() {
    let (driver, _ops) = launch_in_process().await;

    assert!(matches!(
        driver.click("#missing", SelectorKind::Css).await,
        Err(DriverError::RemoteFault(_))
    ));
}

#[tokio::test]
async fn show_without_hide_is_a_warned_noop() {
    let (driver, ops) = launch_in_process().await;

    // Let the remote finish its startup show first.
    assert_eq!(driver.current_url().await.unwrap(), START_URL);

    driver.show_window().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let startup_shows = ops.lock().unwrap().iter().filter(|op| *op == "show").count();
    assert_eq!(startup_shows, 1, "only the startup show may have run");

    driver.hide_window().await.unwrap();
    driver.show_window().await.unwrap();

    let ops = ops.lock().unwrap();
    assert!(ops.iter().any(|op| op == "hide"));
    assert_eq!(ops.iter().filter(|op| *op == "show").count(), 2);
}
