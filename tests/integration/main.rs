//! Integration tests: make recordings with `xst_synth`, then image them with
//! `xst_realtime`.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use tempfile::TempDir;

fn xst_realtime() -> Command {
    Command::cargo_bin("xst_realtime").unwrap()
}

fn xst_synth() -> Command {
    Command::cargo_bin("xst_synth").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// Write `records` records of a source at zenith, at subband 167 in mode 3
/// (32.6 MHz).
fn make_recording(dir: &Path, records: usize, header: bool) -> PathBuf {
    let dat = dir.join("20170720_095816_xst.dat");
    let mut cmd = xst_synth();
    cmd.arg(&dat)
        .args(["--subband", "167", "--records", &records.to_string()]);
    if header {
        cmd.arg("--header");
    }
    let (stdout, stderr) = get_cmd_output(cmd.ok());
    assert!(dat.exists(), "stdout: {stdout}\nstderr: {stderr}");
    dat
}

fn pngs_in(dir: &Path) -> Vec<PathBuf> {
    let mut pngs = match fs::read_dir(dir) {
        Ok(d) => d
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect::<Vec<_>>(),
        Err(_) => vec![],
    };
    pngs.sort();
    pngs
}

fn small_image_args() -> [&'static str; 5] {
    ["--npix", "21", "--scale", "1", "--no-progress-bars"]
}

#[test]
fn test_same_frequency_images_every_record() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 5, false);
    let out = tmp.path().join("out");

    let cmd = xst_realtime()
        .arg(&dat)
        .args(["--freq", "32.6", "--continue", "same", "--no-interactive"])
        .args(small_image_args())
        .arg("--output")
        .arg(&out)
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stdout: {stdout}\nstderr: {stderr}");

    let pngs = pngs_in(&out.join("32.6MHz"));
    assert_eq!(pngs.len(), 5, "{stdout}");
    let first = pngs[0].file_name().unwrap().to_str().unwrap();
    assert_eq!(
        first,
        "20170720_095816_LV614_SB167_sky_calibrated_32.6MHz.png"
    );
}

#[test]
fn test_fixed_frequency_without_input_stops_after_one_image() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 4, false);
    let out = tmp.path().join("out");

    let cmd = xst_realtime()
        .arg(&dat)
        .args(["--freq", "32.6", "--no-interactive"])
        .args(small_image_args())
        .arg("--output")
        .arg(&out)
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stdout: {stdout}\nstderr: {stderr}");
    assert_eq!(pngs_in(&out.join("32.6MHz")).len(), 1);
}

#[test]
fn test_pinned_recording_needs_no_frequency() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 3, true);

    // Without --output, frames go next to the data.
    let cmd = xst_realtime()
        .arg(&dat)
        .arg("--no-interactive")
        .args(small_image_args())
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stdout: {stdout}\nstderr: {stderr}");

    let frames = tmp
        .path()
        .join("2017-07-20_realtime_observation")
        .join("32.6MHz");
    assert_eq!(pngs_in(&frames).len(), 3, "{stdout}");
}

#[test]
fn test_frequency_outside_band_makes_no_images() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 2, false);
    let out = tmp.path().join("out");

    let cmd = xst_realtime()
        .arg(&dat)
        .args(["--subbands", "150:200", "--freq", "10", "--no-interactive"])
        .args(small_image_args())
        .arg("--output")
        .arg(&out)
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("Ignoring --freq"), "{stdout}");
    assert!(pngs_in(&out.join("10.0MHz")).is_empty());
}

#[test]
fn test_realtime_max_frames() {
    let tmp = TempDir::new().unwrap();
    make_recording(tmp.path(), 5, false);
    let out = tmp.path().join("out");

    // Real-time runs never reach the end of the data, so this must stop by
    // itself after three frames.
    let cmd = xst_realtime()
        .arg(tmp.path())
        .args(["--realtime", "--freq", "32.6", "--continue", "same"])
        .args(["--no-interactive", "--max-frames", "3"])
        .args(["--poll-interval-ms", "10"])
        .args(small_image_args())
        .arg("--output")
        .arg(&out)
        .timeout(std::time::Duration::from_secs(60))
        .ok();
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stdout: {stdout}\nstderr: {stderr}");
    assert_eq!(pngs_in(&out.join("32.6MHz")).len(), 3);
}

#[test]
fn test_missing_data_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cmd = xst_realtime()
        .arg(tmp.path().join("nothing_here.dat"))
        .arg("--no-interactive")
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("nothing_here.dat"), "{stderr}");
}

#[test]
fn test_bad_subband_range_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 1, false);
    let cmd = xst_realtime()
        .arg(&dat)
        .args(["--subbands", "200-100", "--no-interactive"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("200-100"), "{stderr}");
}

#[test]
fn test_empty_directory_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cmd = xst_realtime()
        .arg(tmp.path())
        .arg("--no-interactive")
        .ok();
    assert!(cmd.is_err());
}

#[test]
fn test_bad_stall_timeouts_are_errors() {
    let tmp = TempDir::new().unwrap();
    let dat = make_recording(tmp.path(), 1, false);
    for timeout in ["0", "inf", "-1", "0.05"] {
        let cmd = xst_realtime()
            .arg(&dat)
            .args(["--realtime", "--freq", "32.6", "--no-interactive"])
            .args(["--poll-interval-ms", "100"])
            .arg(format!("--stall-timeout={timeout}"))
            .args(small_image_args())
            .arg("--output")
            .arg(tmp.path().join("out"))
            .timeout(std::time::Duration::from_secs(30))
            .ok();
        assert!(cmd.is_err(), "--stall-timeout {timeout} was accepted");
        let (_, stderr) = get_cmd_output(cmd);
        assert!(stderr.contains("stall timeout"), "{stderr}");
    }
}
