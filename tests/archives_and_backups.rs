use std::path::Path;
use std::sync::Arc;

use hbnb_deploy::Error;
use hbnb_deploy::adapters::{RecordedCall, SimulatedExecutor};
use hbnb_deploy::config::{DeployPaths, TargetConfig, TargetRole};
use hbnb_deploy::core::{Archiver, BackupManager};
use tempfile::tempdir;

fn site(root: &Path) -> std::path::PathBuf {
    let site = root.join("web_static");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(site.join("0-index.html"), b"<h1>Holberton School</h1>").unwrap();
    site
}

fn web_01() -> TargetConfig {
    TargetConfig::new("web-01", "10.0.0.1", TargetRole::Web)
}

#[tokio::test]
async fn consecutive_packs_get_distinct_archives() {
    let temp = tempdir().unwrap();
    let source = site(temp.path());
    let archiver = Archiver::new(temp.path().join("versions"));

    let first = archiver.pack(&source).await.unwrap();
    let second = archiver.pack(&source).await.unwrap();

    assert_ne!(first.name, second.name);
    assert_ne!(first.archive_path, second.archive_path);
    assert!(first.archive_path.is_file());
    assert!(second.archive_path.is_file());
    assert!(first.name.starts_with("web_static_"));
    assert_eq!(first.content_root, "web_static");
}

#[tokio::test]
async fn packed_archive_can_be_reopened() {
    let temp = tempdir().unwrap();
    let source = site(temp.path());
    let archiver = Archiver::new(temp.path().join("versions"));

    let packed = archiver.pack(&source).await.unwrap();
    let opened = archiver.open(&packed.archive_path).await.unwrap();

    assert_eq!(opened.name, packed.name);
    assert_eq!(opened.content_root, "web_static");
}

#[tokio::test]
async fn packing_a_missing_directory_fails() {
    let temp = tempdir().unwrap();
    let archiver = Archiver::new(temp.path().join("versions"));

    let result = archiver.pack(&temp.path().join("nope")).await;

    assert!(matches!(result, Err(Error::Pack { .. })));
}

#[test]
fn cleanup_keeps_the_newest_backups() {
    let temp = tempdir().unwrap();
    for i in 1..=5 {
        std::fs::write(
            temp.path().join(format!("backup_web-01_2024010100000{}.tgz", i)),
            b"x",
        )
        .unwrap();
    }
    std::fs::write(temp.path().join("notes.txt"), b"unrelated").unwrap();

    let manager = BackupManager::new(
        Arc::new(SimulatedExecutor::new()),
        DeployPaths::default(),
        temp.path(),
        true,
    );
    let removed = manager.cleanup_old_backups(2).unwrap();

    assert_eq!(removed.len(), 3);
    let mut left: Vec<String> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    left.sort();
    assert_eq!(
        left,
        vec![
            "backup_web-01_20240101000004.tgz",
            "backup_web-01_20240101000005.tgz",
            "notes.txt",
        ]
    );
}

#[test]
fn cleanup_across_targets_removes_the_oldest_first() {
    let temp = tempdir().unwrap();
    for i in 1..=3 {
        for (target, year) in [("web-01", 2024), ("web-02", 2023)] {
            std::fs::write(
                temp.path()
                    .join(format!("backup_{}_{}010100000{}.tgz", target, year, i)),
                b"x",
            )
            .unwrap();
        }
    }

    let manager = BackupManager::new(
        Arc::new(SimulatedExecutor::new()),
        DeployPaths::default(),
        temp.path(),
        true,
    );
    let removed = manager.cleanup_old_backups(3).unwrap();

    assert_eq!(removed.len(), 3);
    assert!(removed.iter().all(|p| {
        p.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("backup_web-02_2023")
    }));
    assert_eq!(
        manager.latest_backup("web-01").unwrap(),
        Some(temp.path().join("backup_web-01_20240101000003.tgz"))
    );
    assert_eq!(manager.latest_backup("web-02").unwrap(), None);
}

#[test]
fn cleanup_of_missing_directory_is_a_no_op() {
    let temp = tempdir().unwrap();
    let manager = BackupManager::new(
        Arc::new(SimulatedExecutor::new()),
        DeployPaths::default(),
        temp.path().join("backups"),
        true,
    );

    assert!(manager.cleanup_old_backups(2).unwrap().is_empty());
}

#[tokio::test]
async fn restore_replaces_tree_with_nginx_stopped() {
    let temp = tempdir().unwrap();
    let backup = temp.path().join("backup_web-01_20240101000000.tgz");
    std::fs::write(&backup, b"x").unwrap();
    let sim = SimulatedExecutor::new();
    let manager = BackupManager::new(
        Arc::new(sim.clone()),
        DeployPaths::default(),
        temp.path(),
        true,
    );

    manager.restore_backup(&web_01(), &backup).await.unwrap();

    assert!(matches!(
        sim.calls_for("web-01").first(),
        Some(RecordedCall::Upload { .. })
    ));
    assert_eq!(
        sim.commands_for("web-01"),
        vec![
            "sudo service nginx stop",
            "sudo rm -rf /data/web_static",
            "sudo tar -xzf /tmp/backup_web-01_20240101000000.tgz -C /",
            "sudo chown -R ubuntu:ubuntu /data/web_static",
            "sudo service nginx start",
            "rm -f /tmp/backup_web-01_20240101000000.tgz",
        ]
    );
}

#[tokio::test]
async fn restore_of_missing_backup_touches_nothing() {
    let temp = tempdir().unwrap();
    let sim = SimulatedExecutor::new();
    let manager = BackupManager::new(
        Arc::new(sim.clone()),
        DeployPaths::default(),
        temp.path(),
        true,
    );

    let result = manager
        .restore_backup(&web_01(), &temp.path().join("backup_web-01_missing.tgz"))
        .await;

    assert!(matches!(result, Err(Error::Restore { .. })));
    assert!(sim.calls().is_empty());
}

#[tokio::test]
async fn failed_restore_step_is_reported() {
    let temp = tempdir().unwrap();
    let backup = temp.path().join("backup_web-01_20240101000000.tgz");
    std::fs::write(&backup, b"x").unwrap();
    let sim = SimulatedExecutor::new();
    sim.fail_when("web-01", "rm -rf");
    let manager = BackupManager::new(
        Arc::new(sim.clone()),
        DeployPaths::default(),
        temp.path(),
        true,
    );

    let result = manager.restore_backup(&web_01(), &backup).await;

    assert!(matches!(result, Err(Error::Restore { .. })));
    assert!(
        !sim.commands_for("web-01")
            .iter()
            .any(|c| c.contains("tar -xzf"))
    );
}
