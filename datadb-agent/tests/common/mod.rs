//! Shared fixtures: profiles on temp dirs, stub tar/rsync scripts and an executor
//! pointed at a wiremock datadb API.

#![allow(dead_code)]

use datadb_agent::config::{DatadbUri, Profile, ProfileHooks, Settings};
use datadb_agent::fs::MARKER_FILE;
use datadb_agent::utils::binaries::Toolchain;
use datadb_agent::Executor;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use wiremock::MockServer;

/// Write an executable `/bin/sh` script
pub fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stub that records its arguments, one per line, into `args_file` before running `body`
pub fn write_recording_stub(dir: &Path, name: &str, args_file: &Path, body: &str) -> PathBuf {
    let script = format!("printf '%s\\n' \"$@\" > '{}'\n{}", args_file.display(), body);
    write_stub(dir, name, &script)
}

pub fn read_args(args_file: &Path) -> Vec<String> {
    std::fs::read_to_string(args_file)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn profile(name: &str, uri: &str, dir: &Path) -> Profile {
    Profile {
        name: name.to_string(),
        uri: DatadbUri::parse(uri).unwrap(),
        dir: dir.to_path_buf(),
        keep: 5,
        excludes: vec![],
        inplace: false,
        hooks: ProfileHooks::default(),
    }
}

pub fn mark_available(dir: &Path) {
    std::fs::write(dir.join(MARKER_FILE), b"").unwrap();
}

pub fn settings(server: &MockServer) -> Settings {
    Settings::from_lookup(|key| (key == "DATADB_KEYPATH").then(|| "/etc/datadb/test.key".to_string()))
        .unwrap()
        .with_api_url(&format!("{}/cgi-bin/", server.uri()))
}

pub fn executor(server: &MockServer, toolchain: Toolchain) -> Executor {
    Executor::new(settings(server), toolchain).unwrap()
}

pub fn mode_of(dir: &Path) -> u32 {
    std::fs::metadata(dir).unwrap().permissions().mode() & 0o7777
}
