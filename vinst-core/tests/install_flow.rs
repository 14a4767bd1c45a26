mod support;

use std::fs;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use support::{archive_names, config, current_marker, manifest, release_archive, APP};
use tempfile::TempDir;
use vinst_common::error::VinstError;
use vinst_common::manifest::SourceDescriptor;
use vinst_common::model::SourceArtifact;
use vinst_common::Result;
use vinst_core::checksum::compute_sha256;
use vinst_core::{
    Fetcher, InstallOptions, Installer, PostInstallContext, PostInstallHook, RollbackSelector,
};

async fn install(sandbox: &Path, version: &str, marker: &str) -> vinst_core::InstallReport {
    let archive = release_archive(sandbox, version, marker);
    let installer = Installer::new(manifest(version, &archive, ""), config(sandbox)).unwrap();
    installer.install(&InstallOptions::default()).await.unwrap()
}

fn root(sandbox: &Path) -> PathBuf {
    sandbox.join("root")
}

#[tokio::test]
async fn first_install_points_current_at_version_dir() {
    let sandbox = TempDir::new().unwrap();
    let report = install(sandbox.path(), "1.0.0", "one").await;
    let root = root(sandbox.path());

    assert_eq!(report.installed, root.join("zyng-1.0.0"));
    assert_eq!(report.archived_previous, None);
    let pointer = root.join("zyng-current");
    assert_eq!(fs::read_link(&pointer).unwrap(), PathBuf::from("zyng-1.0.0"));
    assert_eq!(current_marker(&root), "one");
    assert!(pointer.join("src/main.py").is_file());
    assert!(pointer.join("requirements.txt").is_file());
    assert!(archive_names(&root).is_empty());
    assert!(report.warnings.is_empty());

    // The only other things in the root are the lock file and nothing staged.
    let mut names: Vec<String> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec![".vinst.lock", "zyng-1.0.0", "zyng-current"]);
}

#[tokio::test]
async fn reinstall_of_same_version_archives_first_copy() {
    let sandbox = TempDir::new().unwrap();
    install(sandbox.path(), "1.0.0", "first").await;
    let report = install(sandbox.path(), "1.0.0", "second").await;
    let root = root(sandbox.path());

    let archived = archive_names(&root);
    assert_eq!(archived.len(), 1, "{archived:?}");
    assert!(archived[0].starts_with("zyng-1.0.0-"));
    let archived_path = report.archived_previous.unwrap();
    assert_eq!(fs::read_to_string(archived_path.join("data/info.txt")).unwrap(), "first");
    assert_eq!(current_marker(&root), "second");
}

#[tokio::test]
async fn rollback_round_trip_retires_failed_version() {
    let sandbox = TempDir::new().unwrap();
    install(sandbox.path(), "1.0.0", "alpha").await;
    install(sandbox.path(), "2.0.0", "beta").await;
    let root = root(sandbox.path());
    assert_eq!(current_marker(&root), "beta");

    let archive = release_archive(sandbox.path(), "2.0.0", "beta");
    let installer = Installer::new(manifest("2.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let candidates = installer.rollback_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].version, "1.0.0");

    let outcome = installer
        .rollback(&RollbackSelector::Version("1.0.0".into()))
        .await
        .unwrap();
    assert_eq!(outcome.current, root.join("zyng-1.0.0"));
    assert_eq!(current_marker(&root), "alpha");

    let retired = outcome.retired.unwrap();
    let retired_name = retired.file_name().unwrap().to_string_lossy().to_string();
    assert!(retired_name.starts_with("zyng-2.0.0-"), "{retired_name}");
    assert!(retired_name.contains("-failed-"), "{retired_name}");
    assert_eq!(fs::read_to_string(retired.join("data/info.txt")).unwrap(), "beta");
    assert!(!root.join("zyng-2.0.0").exists());

    // The failed version is now itself a candidate; nothing was deleted.
    let candidates = installer.rollback_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].is_failed());
    let outcome = installer.rollback(&RollbackSelector::Index(0)).await.unwrap();
    assert_eq!(current_marker(&root), "beta");
    assert!(outcome.current.starts_with(root.join("archives")));
    let retired_name = outcome
        .retired
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(retired_name.starts_with("zyng-1.0.0-") && retired_name.contains("-failed-"));
}

#[tokio::test]
async fn rollback_that_cannot_retire_previous_target_is_inconsistent() {
    let sandbox = TempDir::new().unwrap();
    install(sandbox.path(), "1.0.0", "alpha").await;
    install(sandbox.path(), "2.0.0", "beta").await;
    let root = root(sandbox.path());
    let _ = fs::remove_dir_all(root.join("archives"));
    fs::write(root.join("archives"), b"not a directory").unwrap();

    let archive = release_archive(sandbox.path(), "2.0.0", "beta");
    let installer = Installer::new(manifest("2.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let err = installer
        .rollback(&RollbackSelector::Version("1.0.0".into()))
        .await
        .unwrap_err();
    match &err {
        VinstError::DeploymentInconsistent(msg) => {
            assert!(msg.contains("zyng-2.0.0"), "{msg}");
            assert!(msg.contains("zyng-1.0.0"), "{msg}");
        }
        other => panic!("expected DeploymentInconsistent, got {other:?}"),
    }
    assert_eq!(current_marker(&root), "alpha");
    assert_eq!(
        fs::read_to_string(root.join("zyng-2.0.0/data/info.txt")).unwrap(),
        "beta"
    );
}

#[tokio::test]
async fn rollback_without_candidates_is_no_such_version() {
    let sandbox = TempDir::new().unwrap();
    let report = install(sandbox.path(), "1.0.0", "only").await;
    let root = root(sandbox.path());
    let archive = release_archive(sandbox.path(), "1.0.0", "only");
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(sandbox.path())).unwrap();

    let err = installer.rollback(&RollbackSelector::Index(0)).await.unwrap_err();
    assert!(matches!(err, VinstError::NoSuchVersion(_)), "{err:?}");
    let err = installer
        .rollback(&RollbackSelector::Version("9.9".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, VinstError::NoSuchVersion(_)));
    assert_eq!(
        fs::read_link(root.join("zyng-current")).unwrap(),
        PathBuf::from(report.installed.file_name().unwrap())
    );

    let empty = TempDir::new().unwrap();
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(empty.path())).unwrap();
    assert!(matches!(
        installer.rollback(&RollbackSelector::Index(0)).await,
        Err(VinstError::NoSuchVersion(_))
    ));
    assert!(!empty.path().join("root").exists());
}

#[tokio::test]
async fn prune_keeps_the_most_recent_archives() {
    let sandbox = TempDir::new().unwrap();
    let mut archived = Vec::new();
    for i in 0..5 {
        let report = install(sandbox.path(), "1.0.0", &format!("build{i}")).await;
        archived.extend(report.archived_previous);
    }
    let root = root(sandbox.path());
    assert_eq!(archive_names(&root).len(), 4);

    let archive = release_archive(sandbox.path(), "1.0.0", "x");
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let removed = installer.prune(2).await.unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = archive_names(&root);
    assert_eq!(remaining.len(), 2);
    for newest in &archived[2..] {
        assert!(newest.exists(), "{} should survive", newest.display());
    }
    for oldest in &archived[..2] {
        assert!(!oldest.exists(), "{} should be pruned", oldest.display());
    }
    assert_eq!(current_marker(&root), "build4");
}

#[tokio::test]
async fn auto_clean_prunes_during_install() {
    let sandbox = TempDir::new().unwrap();
    for i in 0..3 {
        install(sandbox.path(), "1.0.0", &format!("b{i}")).await;
    }
    let archive = release_archive(sandbox.path(), "1.0.0", "last");
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let report = installer
        .install(&InstallOptions {
            auto_clean_archives: true,
            keep: 1,
        })
        .await
        .unwrap();
    assert_eq!(report.pruned.len(), 2);
    assert_eq!(archive_names(&root(sandbox.path())).len(), 1);
}

#[tokio::test]
async fn digest_mismatch_aborts_before_touching_root() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "one");
    let wrong = "0".repeat(64);
    let spec = manifest("1.0.0", &archive, &format!("sha256 = \"{wrong}\""));
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::Integrity(_)), "{err:?}");
    assert!(!root(sandbox.path()).exists());

    let right = compute_sha256(&archive).unwrap().to_ascii_uppercase();
    let spec = manifest("1.0.0", &archive, &format!("sha256 = \"{right}\""));
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    installer.install(&InstallOptions::default()).await.unwrap();
}

#[tokio::test]
async fn digest_mismatch_keeps_existing_deployment() {
    let sandbox = TempDir::new().unwrap();
    install(sandbox.path(), "1.0.0", "good").await;
    let archive = release_archive(sandbox.path(), "2.0.0", "bad");
    let spec = manifest("2.0.0", &archive, &format!("sha256 = \"{}\"", "a".repeat(64)));
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    assert!(installer.install(&InstallOptions::default()).await.is_err());

    let root = root(sandbox.path());
    assert_eq!(current_marker(&root), "good");
    assert!(!root.join("zyng-2.0.0").exists());
    assert!(archive_names(&root).is_empty());
}

#[tokio::test]
async fn pointer_that_is_not_a_symlink_is_invalid_store() {
    let sandbox = TempDir::new().unwrap();
    let root = root(sandbox.path());
    fs::create_dir_all(root.join("zyng-current")).unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "one");
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::InvalidStore(_)), "{err:?}");
    assert!(!root.join("zyng-1.0.0").exists());
}

#[tokio::test]
async fn invalid_layout_and_missing_entrypoint_are_rejected() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "one");
    let raw = format!(
        "name = \"{APP}\"\nversion = \"1.0.0\"\nentrypoint = \"bin/run\"\nsource = {{ type = \"local\", location = \"{}\" }}\n",
        archive.display()
    );
    let spec = vinst_common::ReleaseSpec::from_toml_str(&raw).unwrap();
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::InvalidLayout(_)), "{err:?}");

    let raw = format!(
        "name = \"{APP}\"\nversion = \"1.0.0\"\nsource = {{ type = \"local\", location = \"{}\" }}\n[layout]\nrequired = [\"src\", \"assets\"]\n",
        archive.display()
    );
    let spec = vinst_common::ReleaseSpec::from_toml_str(&raw).unwrap();
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::InvalidLayout(ref m) if m.contains("assets")));
    assert!(!root(sandbox.path()).exists());
}

#[tokio::test]
async fn stale_staging_entries_are_cleaned() {
    let sandbox = TempDir::new().unwrap();
    let root = root(sandbox.path());
    fs::create_dir_all(root.join(".incoming-zyng-0.9-deadbeef/src")).unwrap();
    install(sandbox.path(), "1.0.0", "one").await;
    assert!(!root.join(".incoming-zyng-0.9-deadbeef").exists());
}

#[tokio::test]
async fn uninstall_one_version_and_remove_all() {
    let sandbox = TempDir::new().unwrap();
    install(sandbox.path(), "1.0.0", "a").await;
    install(sandbox.path(), "1.0.0", "b").await;
    install(sandbox.path(), "2.0.0", "c").await;
    let root = root(sandbox.path());
    fs::write(root.join("unrelated.txt"), b"keep me").unwrap();

    let archive = release_archive(sandbox.path(), "2.0.0", "c");
    let installer = Installer::new(manifest("2.0.0", &archive, ""), config(sandbox.path())).unwrap();
    let removed = installer.uninstall(false).await.unwrap();
    assert_eq!(removed, vec![root.join("zyng-2.0.0")]);
    assert!(root.join("zyng-current").symlink_metadata().is_err());
    assert!(root.join("zyng-1.0.0").is_dir());
    assert!(matches!(
        installer.uninstall(false).await,
        Err(VinstError::NoSuchVersion(_))
    ));

    installer.uninstall(true).await.unwrap();
    assert!(!root.join("zyng-1.0.0").exists());
    assert!(!root.join("archives").exists());
    assert!(root.join("unrelated.txt").is_file(), "foreign files survive");

    fs::remove_file(root.join("unrelated.txt")).unwrap();
    install(sandbox.path(), "3.0.0", "d").await;
    installer.uninstall(true).await.unwrap();
    assert!(!root.exists(), "empty root is removed");
}

struct FailingHook;

impl PostInstallHook for FailingHook {
    fn name(&self) -> &str {
        "desktop-entry"
    }

    fn run<'a>(&'a self, ctx: &'a PostInstallContext<'a>) -> BoxFuture<'a, Result<()>> {
        async move {
            assert!(ctx.install_dir.join("src/main.py").is_file());
            Err(VinstError::Generic("no desktop".into()))
        }
        .boxed()
    }
}

#[tokio::test]
async fn hook_failure_is_reported_but_deployment_stays() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "hooked");
    let installer = Installer::new(manifest("1.0.0", &archive, ""), config(sandbox.path()))
        .unwrap()
        .add_hook(Box::new(FailingHook));
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::PostInstallFailed(ref n, _) if n == "desktop-entry"));
    assert_eq!(current_marker(&root(sandbox.path())), "hooked");
}

/// Serves a fixed file and advertises a digest, like a release asset would.
struct AdvertisingFetcher {
    file: PathBuf,
    digest: String,
}

impl Fetcher for AdvertisingFetcher {
    async fn fetch(&self, _source: &SourceDescriptor, scratch: &Path) -> Result<SourceArtifact> {
        let dest = scratch.join("asset.tar.gz");
        fs::copy(&self.file, &dest)?;
        let mut artifact = SourceArtifact::new(dest, "https://example.invalid/asset.tar.gz");
        artifact.advertised_sha256 = Some(self.digest.clone());
        Ok(artifact)
    }

    async fn fetch_reference(&self, reference: &str, _scratch: &Path) -> Result<PathBuf> {
        Ok(PathBuf::from(reference))
    }
}

#[tokio::test]
async fn advertised_digest_is_verified_when_manifest_has_none() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "adv");
    let spec = manifest("1.0.0", &archive, "");

    let bad = AdvertisingFetcher {
        file: archive.clone(),
        digest: "f".repeat(64),
    };
    let installer = Installer::with_fetcher(spec.clone(), config(sandbox.path()), bad);
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::Integrity(_)));

    let good = AdvertisingFetcher {
        digest: compute_sha256(&archive).unwrap(),
        file: archive,
    };
    let installer = Installer::with_fetcher(spec, config(sandbox.path()), good);
    installer.install(&InstallOptions::default()).await.unwrap();
    assert_eq!(current_marker(&root(sandbox.path())), "adv");
}

#[tokio::test]
async fn key_without_signature_is_signature_missing() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "1.0.0", "one");
    let key = sandbox.path().join("key.asc");
    fs::write(&key, b"KEY").unwrap();
    let spec = manifest("1.0.0", &archive, &format!("gpg_key = \"{}\"", key.display()));
    let installer = Installer::new(spec, config(sandbox.path())).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::SignatureMissing(_)), "{err:?}");
    assert!(!root(sandbox.path()).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn signature_checked_with_configured_tool() {
    use std::os::unix::fs::PermissionsExt;

    let sandbox = TempDir::new().unwrap();
    let tool = sandbox.path().join("fake-gpg");
    // Accepts a signature file containing GOOD; insists on a private homedir.
    fs::write(
        &tool,
        "#!/bin/sh\n[ \"$1\" = \"--homedir\" ] && [ \"$2\" = \"$GNUPGHOME\" ] || exit 2\nshift 3\ncase \"$1\" in\n  --import) exit 0 ;;\n  --verify) grep -q GOOD \"$2\" ;;\n  *) exit 3 ;;\nesac\n",
    )
    .unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

    let archive = release_archive(sandbox.path(), "1.0.0", "signed");
    let key = sandbox.path().join("key.asc");
    let good = sandbox.path().join("good.asc");
    let bad = sandbox.path().join("bad.asc");
    fs::write(&key, b"KEY").unwrap();
    fs::write(&good, b"GOOD").unwrap();
    fs::write(&bad, b"EVIL").unwrap();

    let mut cfg = config(sandbox.path());
    cfg.signing_tool = Some(tool);

    let spec = manifest(
        "1.0.0",
        &archive,
        &format!("gpg_key = \"{}\"\ngpg_signature = \"{}\"", key.display(), bad.display()),
    );
    let err = Installer::new(spec, cfg.clone())
        .unwrap()
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VinstError::SignatureInvalid(_)), "{err:?}");
    assert!(!root(sandbox.path()).exists());

    let spec = manifest(
        "1.0.0",
        &archive,
        &format!("gpg_key = \"{}\"\ngpg_signature = \"{}\"", key.display(), good.display()),
    );
    Installer::new(spec, cfg)
        .unwrap()
        .install(&InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(current_marker(&root(sandbox.path())), "signed");
}
