use std::{
    collections::HashSet,
    fs,
    process::{Command, Output, Stdio},
};

use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_snowdrift");

const ENV_VARS: [&str; 8] = [
    "SNOWDRIFT_DATACENTER_ID",
    "SNOWDRIFT_WORKER_ID",
    "SNOWDRIFT_EPOCH_MS",
    "SNOWDRIFT_RESOLVER",
    "SNOWDRIFT_LOCK_DIR",
    "SNOWDRIFT_STORE_URL",
    "SNOWDRIFT_ROLLBACK_TOLERANCE_MS",
    "SNOWDRIFT_TIMEOUT_MS",
];

fn snowdrift(args: &[&str]) -> Command {
    let mut command = Command::new(BIN);
    for var in ENV_VARS {
        command.env_remove(var);
    }
    command
        .env("RUST_LOG", "warn")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn ids(output: &Output) -> Vec<u64> {
    assert!(
        output.status.success(),
        "snowdrift failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect()
}

/// Runs several `snowdrift generate` processes with the same instance id and
/// `resolver_args`, and checks no ID is handed out twice.
fn run_processes_never_collide(resolver_args: &[&str]) {
    const PROCESSES: usize = 4;
    const PER_PROCESS: usize = 3_000;

    let count = PER_PROCESS.to_string();
    let children: Vec<_> = (0..PROCESSES)
        .map(|_| {
            let mut args = vec![
                "generate",
                "--count",
                count.as_str(),
                "--threads",
                "2",
                "--datacenter-id",
                "1",
                "--worker-id",
                "1",
            ];
            args.extend_from_slice(resolver_args);
            snowdrift(&args).spawn().unwrap()
        })
        .collect();

    let mut seen = HashSet::with_capacity(PROCESSES * PER_PROCESS);
    for child in children {
        let output = child.wait_with_output().unwrap();
        let ids = ids(&output);
        assert_eq!(ids.len(), PER_PROCESS);
        for id in ids {
            assert!(seen.insert(id), "duplicate ID across processes: {id}");
        }
    }
    assert_eq!(seen.len(), PROCESSES * PER_PROCESS);
}

#[test]
fn processes_sharing_lock_dir_never_collide() {
    let dir = tempdir().unwrap();
    let lock_dir = dir.path().to_str().unwrap();
    run_processes_never_collide(&["--resolver", "file-lock", "--lock-dir", lock_dir]);

    // Every lock file is stale once generation is over.
    let output = snowdrift(&["cleanup", "--lock-dir", lock_dir, "--all"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let removed: usize = String::from_utf8(output.stdout)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(removed > 0);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Runs only when `SNOWDRIFT_TEST_REDIS_URL` points at a Redis server.
#[test]
fn processes_sharing_redis_never_collide() {
    let Ok(url) = std::env::var("SNOWDRIFT_TEST_REDIS_URL") else {
        return;
    };
    run_processes_never_collide(&["--resolver", "atomic-store", "--store-url", &url]);
}

#[test]
fn unreachable_store_fails() {
    let output = snowdrift(&[
        "generate",
        "--resolver",
        "atomic-store",
        "--store-url",
        "redis://127.0.0.1:9/",
    ])
    .output()
    .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn generated_ids_decode_to_instance() {
    let output = snowdrift(&[
        "generate",
        "--count",
        "5",
        "--datacenter-id",
        "4",
        "--worker-id",
        "9",
    ])
    .output()
    .unwrap();
    let ids = ids(&output);
    assert_eq!(ids.len(), 5);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 5);

    let first = ids[0].to_string();
    let output = snowdrift(&["decode", &first]).output().unwrap();
    assert!(output.status.success());
    let line = String::from_utf8(output.stdout).unwrap();
    assert!(line.starts_with(&format!("id={first} ")), "{line}");
    assert!(line.contains(" datacenter_id=4 "), "{line}");
    assert!(line.contains(" worker_id=9 "), "{line}");
}

#[test]
fn invalid_worker_id_fails() {
    let output = snowdrift(&["generate", "--worker-id", "32"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SNOWDRIFT_WORKER_ID"), "{stderr}");
}

#[test]
fn decode_rejects_sign_bit() {
    let output = snowdrift(&["decode", &u64::MAX.to_string()])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
