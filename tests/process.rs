//! Runs the real executable: a master that re-executes itself as worker
//! processes, each adopting connections over an inherited control channel.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

mod common;

struct GatewayProcess {
    child: Child,
    port: u16,
    config_path: PathBuf,
}

impl GatewayProcess {
    fn start(backend: SocketAddr, workers: usize) -> Self {
        let port = free_port();
        let config_path =
            std::env::temp_dir().join(format!("sticky-gateway-{}-{}.toml", std::process::id(), port));
        let config = format!(
            r#"
[listener]
host = "127.0.0.1"

[observability]
log_level = "warn"

[[routes]]
path_prefix = "/"
target = "http://{backend}/"
"#
        );
        std::fs::write(&config_path, config).unwrap();

        let child = Command::new(env!("CARGO_BIN_EXE_sticky-gateway"))
            .arg("--config")
            .arg(&config_path)
            .env("PORT", port.to_string())
            .env("WORKERS", workers.to_string())
            .env_remove("ENVIRONMENT")
            .env_remove("RUST_LOG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start gateway binary");

        Self {
            child,
            port,
            config_path,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Worker processes currently parented by the master.
    fn workers(&self) -> HashSet<u32> {
        children_of(self.child.id())
    }
}

impl Drop for GatewayProcess {
    fn drop(&mut self) {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.config_path);
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Scan `/proc` for processes whose parent is `pid`.
fn children_of(pid: u32) -> HashSet<u32> {
    let mut children = HashSet::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return children;
    };
    for entry in entries.flatten() {
        let Ok(child) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // After the parenthesised command name: state, then ppid.
        let ppid = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().nth(1))
            .and_then(|ppid| ppid.parse::<u32>().ok());
        if ppid == Some(pid) {
            children.insert(child);
        }
    }
    children
}

async fn get_text(client: &reqwest::Client, url: String) -> Option<String> {
    let res = client.get(url).send().await.ok()?;
    if !res.status().is_success() {
        return None;
    }
    res.text().await.ok()
}

#[tokio::test]
async fn test_worker_processes_serve_and_respawn() {
    let backend = common::start_mock_backend("127.0.0.1:0".parse().unwrap(), "users").await;
    let gateway = GatewayProcess::start(backend, 2);
    let client = common::client();
    let (gateway, client) = (&gateway, &client);

    let body = common::eventually(Duration::from_secs(15), || async move {
        get_text(client, gateway.url("/hello")).await
    })
    .await;
    assert_eq!(body, "users /hello");

    let original = common::eventually(Duration::from_secs(5), || async move {
        let workers = gateway.workers();
        (workers.len() == 2).then_some(workers)
    })
    .await;

    for pid in &original {
        unsafe {
            libc::kill(*pid as libc::pid_t, libc::SIGKILL);
        }
    }

    let original = &original;
    common::eventually(Duration::from_secs(15), || async move {
        let workers = gateway.workers();
        (workers.len() == 2 && workers.is_disjoint(original)).then_some(())
    })
    .await;

    let body = common::eventually(Duration::from_secs(15), || async move {
        get_text(client, gateway.url("/again")).await
    })
    .await;
    assert_eq!(body, "users /again");
}
