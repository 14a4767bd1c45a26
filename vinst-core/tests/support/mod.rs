// Shared fixtures for vinst-core integration tests.
#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use vinst_common::config::Config;
use vinst_common::manifest::ReleaseSpec;

pub const APP: &str = "zyng";

/// Writes `{app}-{version}/{src/main.py,data/info.txt,requirements.txt}` as a tar.gz.
pub fn release_archive(dir: &Path, version: &str, marker: &str) -> PathBuf {
    let path = dir.join(format!("{APP}-{version}-{marker}.tar.gz"));
    let enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    let top = format!("{APP}-{version}");
    let files: [(String, Vec<u8>); 3] = [
        (format!("{top}/src/main.py"), format!("print('{marker}')\n").into_bytes()),
        (format!("{top}/data/info.txt"), marker.as_bytes().to_vec()),
        (format!("{top}/requirements.txt"), b"requests\n".to_vec()),
    ];
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, &name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

pub fn manifest(version: &str, archive: &Path, extra_source: &str) -> ReleaseSpec {
    let raw = format!(
        r#"
name = "{APP}"
version = "{version}"
entrypoint = "src/main.py"

[source]
type = "local"
location = "{}"
{extra_source}
"#,
        archive.display()
    );
    ReleaseSpec::from_toml_str(&raw).unwrap()
}

pub fn config(sandbox: &Path) -> Config {
    let mut config = Config::new(sandbox.join("root"));
    config.scratch_parent = Some(sandbox.join("scratch"));
    config.lock_timeout = Duration::from_secs(5);
    config
}

/// Marker written into `data/info.txt` of whatever `current` resolves to.
pub fn current_marker(root: &Path) -> String {
    fs::read_to_string(root.join(format!("{APP}-current")).join("data/info.txt")).unwrap()
}

pub fn archive_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(root.join("archives")) {
        Ok(rd) => rd
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
