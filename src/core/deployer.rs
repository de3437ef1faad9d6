use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::TargetConfig;
use crate::context::AppContext;
use crate::core::archiver::Archiver;
use crate::core::backup::BackupManager;
use crate::core::models::{
    BackupRecord, DeployReport, DeployStep, Release, RollbackOutcome, TargetOutcome, TargetReport,
};
use crate::core::notifications::{DeployEvent, dispatch};
use crate::core::proxy::ProxyConfigurator;
use crate::core::remote::{privileged, run_checked};
use crate::error::{Error, Result};

type StepResult<T = ()> = std::result::Result<T, (DeployStep, Error)>;

/// Ships a release to every web target, one target at a time.
///
/// Per target the steps run strictly in [`DeployStep`] order. The first
/// failing target is rolled back to its pre-deploy backup and ends the run;
/// targets already done keep the new release.
pub struct Deployer {
    ctx: AppContext,
    archiver: Archiver,
    backups: BackupManager,
    proxy: ProxyConfigurator,
}

impl Deployer {
    pub fn new(ctx: AppContext) -> Self {
        let config = &ctx.config;
        let use_sudo = config.deployment.use_sudo;

        let archiver = Archiver::new(&config.versions_dir);
        let backups = BackupManager::new(
            ctx.executor.clone(),
            config.paths.clone(),
            &config.backups_dir,
            use_sudo,
        );
        let proxy = ProxyConfigurator::new(
            ctx.executor.clone(),
            config.proxy.clone(),
            config.paths.clone(),
            use_sudo,
        );

        Self {
            ctx,
            archiver,
            backups,
            proxy,
        }
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn proxy(&self) -> &ProxyConfigurator {
        &self.proxy
    }

    /// Pack the configured source directory once and deploy it.
    pub async fn deploy(&self) -> Result<DeployReport> {
        let release = self.archiver.pack(&self.ctx.config.source_dir).await?;
        Ok(self.deploy_release(&release).await)
    }

    /// Deploy an archive produced by an earlier `pack`.
    pub async fn deploy_archive(&self, archive_path: &Path) -> Result<DeployReport> {
        let release = self.archiver.open(archive_path).await?;
        Ok(self.deploy_release(&release).await)
    }

    pub async fn deploy_release(&self, release: &Release) -> DeployReport {
        let deploy_id = Uuid::now_v7().to_string();
        let targets: Vec<&TargetConfig> = self.ctx.config.web_targets().collect();

        info!(
            deploy_id = %deploy_id,
            release = %release.name,
            targets = targets.len(),
            "Starting deploy"
        );

        let mut report = DeployReport {
            deploy_id: deploy_id.clone(),
            release: release.clone(),
            targets: Vec::with_capacity(targets.len()),
            planned: targets.len(),
        };

        for target in targets {
            let span = info_span!("deploy_target", target = %target.name, deploy_id = %deploy_id);
            let outcome = self
                .deploy_target(&deploy_id, release, target)
                .instrument(span)
                .await;

            let failed = outcome != TargetOutcome::Done;
            report.targets.push(TargetReport {
                target: target.name.clone(),
                outcome,
            });

            if failed {
                error!(deploy_id = %deploy_id, target = %target.name, "Deploy aborted");
                return report;
            }
        }

        match self
            .backups
            .cleanup_old_backups(self.ctx.config.deployment.keep_releases)
        {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = removed.len(), "Pruned old backups")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune old backups"),
        }

        info!(deploy_id = %deploy_id, release = %release.name, "Deploy complete");
        report
    }

    async fn deploy_target(
        &self,
        deploy_id: &str,
        release: &Release,
        target: &TargetConfig,
    ) -> TargetOutcome {
        info!(version = %release.archive_file_name(), "Starting deployment");
        let started = Instant::now();

        dispatch(
            self.ctx.notifier.as_ref(),
            DeployEvent::Started {
                deploy_id: deploy_id.to_string(),
                target: target.name.clone(),
                release: release.name.clone(),
            },
        )
        .await;

        let mut backup = None;
        let (step, error) = match self.run_steps(release, target, &mut backup).await {
            Ok(()) => {
                info!(version = %release.archive_file_name(), "Deployment successful");
                dispatch(
                    self.ctx.notifier.as_ref(),
                    DeployEvent::Completed {
                        deploy_id: deploy_id.to_string(),
                        target: target.name.clone(),
                        release: release.name.clone(),
                        duration_secs: started.elapsed().as_secs(),
                    },
                )
                .await;
                return TargetOutcome::Done;
            }
            Err(failure) => failure,
        };

        error!(step = %step, error = %error, "Deployment failed");

        let rollback = match backup {
            Some(record) => self.rollback(target, &record).await,
            None => RollbackOutcome::NotAttempted,
        };

        dispatch(
            self.ctx.notifier.as_ref(),
            DeployEvent::Failed {
                deploy_id: deploy_id.to_string(),
                target: target.name.clone(),
                step,
                error: error.to_string(),
                rolled_back: matches!(rollback, RollbackOutcome::Restored(_)),
            },
        )
        .await;

        TargetOutcome::Failed {
            step,
            error: error.to_string(),
            rollback,
        }
    }

    async fn run_steps(
        &self,
        release: &Release,
        target: &TargetConfig,
        backup: &mut Option<BackupRecord>,
    ) -> StepResult {
        let config = &self.ctx.config;
        let paths = &config.paths;
        let settings = &config.deployment;
        let executor = self.ctx.executor.as_ref();
        let sudo = |command: String| privileged(settings.use_sudo, &command);
        let at = |step: DeployStep| move |e: Error| (step, e);

        let release_dir = format!("{}/{}", paths.releases.trim_end_matches('/'), release.name);
        let content_dir = format!("{}/{}", release_dir, release.content_root);
        let remote_archive = format!(
            "{}/{}",
            paths.remote_tmp.trim_end_matches('/'),
            release.archive_file_name()
        );
        let current = paths.current.trim_end_matches('/');

        if settings.backup_before_deploy {
            let record = self
                .backups
                .create_backup(target)
                .await
                .map_err(at(DeployStep::Backup))?;
            *backup = Some(record);
        }

        info!(step = %DeployStep::Upload, archive = %release.archive_path.display(), "Uploading archive");
        executor
            .upload(target, &release.archive_path, &paths.remote_tmp)
            .await
            .map_err(at(DeployStep::Upload))?;

        info!(step = %DeployStep::Unpack, release_dir = %release_dir, "Unpacking release");
        for command in [
            sudo(format!("mkdir -p {}", release_dir)),
            sudo(format!("tar -xzf {} -C {}", remote_archive, release_dir)),
            sudo(format!("rm -f {}", remote_archive)),
        ] {
            run_checked(executor, target, &command)
                .await
                .map_err(at(DeployStep::Unpack))?;
        }

        for command in [
            sudo(format!("cp -a {}/. {}/", content_dir, release_dir)),
            sudo(format!("rm -rf {}", content_dir)),
        ] {
            run_checked(executor, target, &command)
                .await
                .map_err(at(DeployStep::RelocateContent))?;
        }

        // Rename a fresh link over `current` so it never dangles or goes missing
        info!(step = %DeployStep::SwapSymlink, current = %current, "Switching current release");
        for command in [
            sudo(format!("ln -sfn {} {}.next", release_dir, current)),
            sudo(format!("mv -Tf {}.next {}", current, current)),
        ] {
            run_checked(executor, target, &command)
                .await
                .map_err(at(DeployStep::SwapSymlink))?;
        }

        run_checked(
            executor,
            target,
            &sudo(format!("chown -R {} {}", target.owner(), paths.web_static)),
        )
        .await
        .map_err(at(DeployStep::FixPermissions))?;

        if config.proxy.enabled {
            self.proxy
                .apply(target)
                .await
                .map_err(at(DeployStep::ReconfigureProxy))?;
        }

        let base_url = target.base_url();
        let healthy = self
            .ctx
            .health
            .wait_until_healthy(
                &base_url,
                settings.health_check_attempts,
                Duration::from_secs(settings.health_check_delay_secs),
            )
            .await;
        if !healthy {
            return Err((
                DeployStep::HealthWait,
                Error::HealthCheck {
                    url: base_url,
                    attempts: settings.health_check_attempts,
                },
            ));
        }

        Ok(())
    }

    async fn rollback(&self, target: &TargetConfig, record: &BackupRecord) -> RollbackOutcome {
        info!(path = %record.path.display(), "Attempting to restore backup");

        match self.backups.restore_backup(target, &record.path).await {
            Ok(()) => RollbackOutcome::Restored(record.path.clone()),
            Err(e) => {
                error!(error = %e, "Rollback failed");
                RollbackOutcome::Failed(e.to_string())
            }
        }
    }
}
