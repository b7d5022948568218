use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn linecheck_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_linecheck").expect("linecheck test binary not built")
}

#[test]
fn linecheck_help_mentions_name() {
    let output = Command::new(linecheck_bin())
        .arg("--help")
        .output()
        .expect("run linecheck --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("Linecheck"));
    assert!(combined.contains("--audio-source"));
}

#[test]
fn linecheck_list_input_devices_uses_test_override() {
    let output = Command::new(linecheck_bin())
        .arg("--list-input-devices")
        .env("LINECHECK_TEST_DEVICES", "USB Audio, Line In")
        .output()
        .expect("run linecheck --list-input-devices");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available audio input devices:"));
    assert!(stdout.contains("  - USB Audio"));
    assert!(stdout.contains("  - Line In"));
}

#[test]
fn linecheck_rejects_bad_channel() {
    let output = Command::new(linecheck_bin())
        .args(["--esp32-channel", "3", "0961234567"])
        .output()
        .expect("run linecheck with a bad channel");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--esp32-channel must be 1 or 2"));
}

#[test]
fn linecheck_rejects_malformed_number() {
    let output = Command::new(linecheck_bin())
        .arg("09six")
        .output()
        .expect("run linecheck with a malformed number");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("may only contain digits"));
}

#[test]
fn linecheck_fails_without_usable_ports() {
    let output = Command::new(linecheck_bin())
        .args(["--port", "/nonexistent/linecheck-modem", "0961234567"])
        .output()
        .expect("run linecheck against a missing port");
    assert!(!output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("0 of 1 ports answered"));
    assert!(combined.contains("no usable modem"));
    assert!(output.stdout.is_empty());
}

#[test]
fn linecheck_doctor_prints_sections() {
    let output = Command::new(linecheck_bin())
        .args(["--doctor", "--template-dir", "/nonexistent/templates"])
        .output()
        .expect("run linecheck --doctor");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Linecheck Doctor"));
    assert!(stdout.contains("Templates:"));
    assert!(stdout.contains("template_so_khong_dung.wav: missing"));
}
