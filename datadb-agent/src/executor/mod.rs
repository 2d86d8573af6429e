//! Backup/restore executor - guards, coordinates and drives one transfer.
//!
//! Every operation starts with the marker check, which is the only thing standing
//! between a restore and live local data (or a backup and a good remote copy). A
//! failed check returns before any filesystem or network side effect.

use crate::config::{Profile, Scheme, Settings};
use crate::fs::{status, PermissionSnapshot, SyncStatus};
use crate::hooks::{self, HookPolicy};
use crate::remote::DatadbClient;
use crate::transfer::archive;
use crate::transfer::rsync::RsyncTransport;
use crate::utils::binaries::Toolchain;
use crate::utils::errors::{AgentError, Result};
use tracing::{info, warn};

/// How a restore ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Data was transferred and directory permissions were put back
    Restored,
    /// The server has no backup for this profile; nothing was touched
    RemoteMissing,
}

/// Process exit code for a restore that found no backup on the server. Distinct
/// from a usage error (2).
pub const EXIT_REMOTE_MISSING: u8 = 3;

impl RestoreOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RestoreOutcome::Restored => 0,
            RestoreOutcome::RemoteMissing => EXIT_REMOTE_MISSING,
        }
    }
}

pub struct Executor {
    settings: Settings,
    toolchain: Toolchain,
    client: DatadbClient,
}

impl Executor {
    pub fn new(settings: Settings, toolchain: Toolchain) -> Result<Self> {
        let client = DatadbClient::new(&settings)?;
        Ok(Self {
            settings,
            toolchain,
            client,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current local status of a profile
    pub fn status(&self, profile: &Profile) -> SyncStatus {
        status(&profile.dir)
    }

    /// Restore data from datadb into the profile directory
    pub async fn restore(&self, profile: &Profile, force: bool) -> Result<RestoreOutcome> {
        // If the marker exists the data is assumed to be there already, and syncing
        // again would wipe out local changes.
        if !(self.status(profile) == SyncStatus::DataMissing || force) {
            return Err(AgentError::Precondition("Data already exists".to_string()));
        }

        let original_perms = PermissionSnapshot::capture(&profile.dir)?;
        let scheme = profile.uri.scheme;

        if !self.client.probe_exists(scheme, &profile.name).await? {
            warn!(
                "Connected to datadb, but datasource '{}' doesn't exist. Exiting",
                profile.name
            );
            return Ok(RestoreOutcome::RemoteMissing);
        }

        info!("Restoring '{}' via {} into {}", profile.name, scheme, profile.dir.display());

        match scheme {
            Scheme::Rsync => {
                let source = self.client.prepare_restore(&profile.name).await?;
                RsyncTransport::new(&self.settings, &self.toolchain)
                    .pull(profile, &source)
                    .await?;
            }
            Scheme::Archive => {
                archive::restore(&self.client, &self.toolchain, profile).await?;
            }
        }

        original_perms.apply(&profile.dir)?;

        info!("Restore of '{}' complete", profile.name);
        Ok(RestoreOutcome::Restored)
    }

    /// Back up the profile directory to datadb
    pub async fn backup(&self, profile: &Profile, force: bool) -> Result<()> {
        // Without the marker the local data is assumed missing, and syncing would
        // wipe out the backup.
        if !(self.status(profile) == SyncStatus::DataAvailable || force) {
            return Err(AgentError::Precondition("Data is missing".to_string()));
        }

        info!("Backing up '{}' via {} from {}", profile.name, profile.uri.scheme, profile.dir.display());

        match profile.uri.scheme {
            Scheme::Rsync => self.backup_rsync(profile).await?,
            Scheme::Archive => archive::backup(&self.client, &self.toolchain, profile).await?,
        }

        info!("Backup of '{}' complete", profile.name);
        Ok(())
    }

    /// Restore between the profile's restore hooks. The post-hook only runs when the
    /// restore returned normally, which includes a missing remote.
    pub async fn restore_with_hooks(
        &self,
        profile: &Profile,
        force: bool,
        policy: HookPolicy,
    ) -> Result<RestoreOutcome> {
        let workdir = &self.settings.hook_workdir;

        hooks::run_optional(profile.hooks.restore_preexec.as_deref(), policy.pre, workdir).await;
        let outcome = self.restore(profile, force).await?;
        hooks::run_optional(profile.hooks.restore_postexec.as_deref(), policy.post, workdir).await;

        Ok(outcome)
    }

    /// Backup between the profile's export hooks. The post-hook runs whether or not
    /// the backup succeeded, so services stopped by the pre-hook come back up.
    pub async fn backup_with_hooks(&self, profile: &Profile, force: bool, policy: HookPolicy) -> Result<()> {
        let workdir = &self.settings.hook_workdir;

        hooks::run_optional(profile.hooks.export_preexec.as_deref(), policy.pre, workdir).await;
        let result = self.backup(profile, force).await;
        hooks::run_optional(profile.hooks.export_postexec.as_deref(), policy.post, workdir).await;

        result
    }

    async fn backup_rsync(&self, profile: &Profile) -> Result<()> {
        let handle = self
            .client
            .prepare_backup(&profile.name, profile.keep, profile.inplace)
            .await?;

        RsyncTransport::new(&self.settings, &self.toolchain)
            .push(profile, &handle.path)
            .await?;

        // In-place backups are live on the server as soon as the bytes land.
        if !profile.inplace {
            self.client
                .confirm_backup(&profile.name, &handle.token, profile.keep)
                .await?;
        }

        Ok(())
    }
}
