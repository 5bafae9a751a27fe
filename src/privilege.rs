//! User and group resolution and the one-way identity switch performed
//! before the service callback runs.
use nix::{
    errno::Errno,
    unistd::{self, Gid, Group, Uid, User},
};
use tracing::{debug, info};

use crate::config::{Configuration, Identity};
use crate::error::ConfigurationError;

/// Target uid/gid pair derived from a configuration.
///
/// Either half may be absent, in which case that part of the identity is
/// left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// User to switch to.
    pub uid: Option<Uid>,
    /// Group to switch to.
    pub gid: Option<Gid>,
}

impl ProcessIdentity {
    /// Looks up the configured user and group without changing anything.
    ///
    /// Numeric values are used directly; names go through the system
    /// databases. Unknown names are reported as configuration errors. When
    /// only a user is configured, its primary group from the user database
    /// becomes the group, so the process does not keep the caller's gid.
    pub fn resolve(config: &Configuration) -> Result<Self, ConfigurationError> {
        let user = config.user.as_ref().map(resolve_user).transpose()?;
        let gid = match config.group.as_ref() {
            Some(group) => Some(resolve_group(group)?),
            None => user.and_then(|(_, primary)| primary),
        };
        Ok(Self {
            uid: user.map(|(uid, _)| uid),
            gid,
        })
    }

    /// Returns whether applying this identity would change anything.
    pub fn is_unchanged(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

/// The system calls used to switch identity.
///
/// Split out so the group-before-user ordering can be observed without root.
pub trait IdentitySwitch {
    /// Switches the process group.
    fn set_group(&mut self, gid: Gid) -> Result<(), Errno>;
    /// Switches the process user.
    fn set_user(&mut self, uid: Uid) -> Result<(), Errno>;
}

/// Switches the real, effective and saved ids of the running process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentitySwitch for SystemIdentity {
    fn set_group(&mut self, gid: Gid) -> Result<(), Errno> {
        clear_supplementary_groups(gid)?;
        unistd::setgid(gid)
    }

    fn set_user(&mut self, uid: Uid) -> Result<(), Errno> {
        unistd::setuid(uid)
    }
}

/// Root's supplementary groups would otherwise survive the drop.
#[cfg(target_os = "linux")]
fn clear_supplementary_groups(gid: Gid) -> Result<(), Errno> {
    if unistd::geteuid().is_root() {
        unistd::setgroups(&[gid])?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn clear_supplementary_groups(_gid: Gid) -> Result<(), Errno> {
    Ok(())
}

/// Resolves configured identities and drops privileges.
#[derive(Debug, Default)]
pub struct PrivilegeManager<S = SystemIdentity> {
    switch: S,
}

impl PrivilegeManager<SystemIdentity> {
    /// Manager acting on the current process.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: IdentitySwitch> PrivilegeManager<S> {
    /// Manager acting through a custom switch.
    pub fn with_switch(switch: S) -> Self {
        Self { switch }
    }

    /// Consumes the manager, returning its switch.
    pub fn into_switch(self) -> S {
        self.switch
    }

    /// Switches to `identity`: group first, while the process still holds the
    /// privilege to change it, then user.
    ///
    /// Irreversible when the process starts as root.
    pub fn apply(&mut self, identity: &ProcessIdentity) -> Result<(), Errno> {
        if identity.is_unchanged() {
            debug!("No user or group configured; keeping current identity");
            return Ok(());
        }

        if let Some(gid) = identity.gid {
            self.switch.set_group(gid)?;
            info!("Switched process group to gid {gid}");
        }

        if let Some(uid) = identity.uid {
            self.switch.set_user(uid)?;
            info!("Switched process user to uid {uid}");
        }

        Ok(())
    }
}

fn resolve_group(group: &Identity) -> Result<Gid, ConfigurationError> {
    if let Some(gid) = group.numeric() {
        return Ok(Gid::from_raw(gid));
    }

    let name = group.to_string();
    match Group::from_name(&name) {
        Ok(Some(found)) => Ok(found.gid),
        Ok(None) => Err(ConfigurationError::UnknownGroup(name)),
        Err(source) => Err(ConfigurationError::Lookup { name, source }),
    }
}

/// Resolves a user to its uid and, when the user database knows it, its
/// primary gid.
fn resolve_user(user: &Identity) -> Result<(Uid, Option<Gid>), ConfigurationError> {
    if let Some(uid) = user.numeric() {
        let uid = Uid::from_raw(uid);
        return match User::from_uid(uid) {
            Ok(found) => Ok((uid, found.map(|found| found.gid))),
            Err(source) => Err(ConfigurationError::Lookup {
                name: user.to_string(),
                source,
            }),
        };
    }

    let name = user.to_string();
    match User::from_name(&name) {
        Ok(Some(found)) => Ok((found.uid, Some(found.gid))),
        Ok(None) => Err(ConfigurationError::UnknownUser(name)),
        Err(source) => Err(ConfigurationError::Lookup { name, source }),
    }
}
