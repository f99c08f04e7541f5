use std::{
    fs,
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

const START_TIMEOUT: Duration = Duration::from_secs(15);

fn choose_port() -> u16 {
    if let Some(p) = std::env::var("SFU_RELAY_TEST_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        return p;
    }
    48080 + (std::process::id() as u16 % 1000)
}

fn write_config(dir: &Path, file_name: &str, body: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(&config_path, body).expect("write config");
    config_path
}

fn valid_config(port: u16) -> String {
    format!(
        r#"
name = "relay-cli-test"
env = "dev"
location_tag = "local,test,cli"

[bind.http]
domain_name = "localhost"
ip = "127.0.0.1"
port = {port}

[media]
announced_ip = "127.0.0.1"
rtc_min_port = 40000
rtc_max_port = 40100

[[media.codecs]]
kind = "audio"
mime_type = "audio/opus"
clock_rate = 48000
channels = 2

[[media.codecs]]
kind = "video"
mime_type = "video/VP8"
clock_rate = 90000

[observability.log]
output = "console"
"#
    )
}

/// 生产环境 + 控制台日志 + 回环 announced_ip：只有警告
fn warning_only_config() -> &'static str {
    r#"
name = "relay-cli-warning-test"
env = "prod"

[bind.http]
ip = "127.0.0.1"
port = 39998

[media]
announced_ip = "127.0.0.1"

[observability.log]
output = "console"
"#
}

/// 端口范围颠倒
fn validation_error_config() -> &'static str {
    r#"
name = "relay-cli-validation-error-test"
env = "dev"

[bind.http]
ip = "127.0.0.1"
port = 39997

[media]
rtc_min_port = 45000
rtc_max_port = 44000
"#
}

fn run_relay(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_sfu-relay")));
    cmd.args(args);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run sfu-relay command")
}

#[test]
fn test_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(temp.path(), "valid.toml", &valid_config(39999));
    let output = run_relay(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_config(temp.path(), "config.toml", &valid_config(39999));
    let output = run_relay(&["test"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_relay(&["test", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Provided config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_relay(&["test"], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = write_config(temp.path(), "bad.toml", "name = \"broken\"\nenv = [\n");
    let output = run_relay(&["test", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置解析失败"), "unexpected stderr: {stderr}");
}

#[test]
fn test_command_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "validation-error.toml",
        validation_error_config(),
    );
    let output = run_relay(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("配置验证失败"), "unexpected stderr: {stderr}");
}

#[test]
fn test_command_succeeds_with_warning_only_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(temp.path(), "warning.toml", warning_only_config());
    let output = run_relay(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "warning-only config should succeed, stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_relay(&[], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn run_mode_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = write_config(temp.path(), "bad-run.toml", "name = \"broken\"\nenv = [\n");
    let output = run_relay(&["--config", bad_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(stderr.contains("配置加载失败"), "unexpected stderr: {stderr}");
}

#[test]
fn run_mode_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "run-validation-error.toml",
        validation_error_config(),
    );
    let output = run_relay(
        &["--config", config_path.to_str().expect("utf8 path")],
        None,
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "run mode should fail");
    assert!(
        stderr.contains("Invalid RTC port range 45000-44000"),
        "unexpected stderr: {stderr}"
    );
}

fn get_health(port: u16) -> Option<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .ok()?;
    stream
        .write_all(
            b"GET /signaling/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .ok()?;
    let mut response = String::new();
    stream.read_to_string(&mut response).ok()?;
    Some(response)
}

#[test]
fn run_mode_serves_signaling_health() {
    let temp = tempfile::tempdir().expect("temp dir");
    let port = choose_port();
    let config_path = write_config(temp.path(), "config.toml", &valid_config(port));

    let mut child = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_sfu-relay")))
        .args(["--config", config_path.to_str().expect("utf8 path")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sfu-relay");

    let deadline = Instant::now() + START_TIMEOUT;
    let mut response = None;
    while Instant::now() < deadline {
        if let Some(body) = get_health(port) {
            response = Some(body);
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    let _ = child.kill();
    let _ = child.wait();

    let response = response.expect("server did not become healthy");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("OK ("), "{response}");
}
