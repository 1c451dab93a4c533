/*!
 * Restore admission: whether a restore may write into its target volume
 */

use tracing::{info, warn};

use crate::error::{BackupError, Result};
use crate::volume::VolumeStore;

/// What a restore does with its target volume before any bytes are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Volume is absent: create it
    Create,
    /// Volume is present and overwrite was requested: wipe it
    Overwrite,
    /// Volume is present and overwrite was not requested
    Reject,
}

impl Admission {
    pub fn decide(exists: bool, overwrite: bool) -> Admission {
        match (exists, overwrite) {
            (false, _) => Admission::Create,
            (true, true) => Admission::Overwrite,
            (true, false) => Admission::Reject,
        }
    }
}

/// Decide and prepare the target volume. On success the volume exists and
/// is empty (or freshly created); on error nothing was written.
pub fn admit(store: &dyn VolumeStore, volume: &str, overwrite: bool) -> Result<Admission> {
    let admission = Admission::decide(store.exists(volume)?, overwrite);
    match admission {
        Admission::Create => {
            store.create(volume)?;
        }
        Admission::Overwrite => {
            warn!("Clearing existing contents of volume {}", volume);
            store.clear(volume)?;
            if !store.is_empty(volume)? {
                return Err(BackupError::ClearIncomplete(volume.to_string()));
            }
        }
        Admission::Reject => {
            return Err(BackupError::VolumeAlreadyExists(volume.to_string()));
        }
    }
    info!("Restore admitted into {} ({:?})", volume, admission);
    Ok(admission)
}
