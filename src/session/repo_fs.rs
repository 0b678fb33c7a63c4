//! Filesystem-backed store that hands out working areas under `sessions_root`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::common::config::AppCfg;
use crate::common::error::{FlowError, FlowResult};
use crate::common::ids::SessionKey;
use crate::inference::domain::ModelFamily;

use super::domain::{
    ActiveKeys, SessionLease, WorkingArea, DATA_CONFIG_FILE, META_FILE, MIN_POINTS_FILE,
    TEMPLATE_DIR, TRANSFORMS_FILE,
};

/// Creates working areas and tracks which keys are in flight.
#[derive(Clone, Debug)]
pub struct FsSessionStore {
    sessions_root: PathBuf,
    assets_root: PathBuf,
    active: ActiveKeys,
}

impl FsSessionStore {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::with_roots(&cfg.sessions_root, &cfg.assets_root)
    }

    pub fn with_roots(sessions_root: &Path, assets_root: &Path) -> Self {
        Self {
            sessions_root: sessions_root.to_path_buf(),
            assets_root: assets_root.to_path_buf(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn sessions_root(&self) -> &Path {
        &self.sessions_root
    }

    /// Directory a key's area lives in, whether or not it exists.
    pub fn area_path(&self, key: &SessionKey) -> PathBuf {
        self.sessions_root.join(key.as_str())
    }

    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.active.lock().contains(key.as_str())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Reserve `key` and allocate its tree.
    ///
    /// The in-memory check runs first, so a conflicting key never touches the
    /// filesystem. A directory left on disk by someone else is also a conflict
    /// and is not removed.
    pub fn create(&self, key: &SessionKey) -> FlowResult<WorkingArea> {
        let lease = SessionLease::acquire(&self.active, key)?;

        fs::create_dir_all(&self.sessions_root)
            .map_err(|err| FlowError::io("create sessions root", err))?;
        let root = self.area_path(key);
        match fs::create_dir(&root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(FlowError::conflict(format!(
                    "working area {} already exists on disk",
                    root.display()
                )));
            }
            Err(err) => return Err(FlowError::io("create working area", err)),
        }

        // From here on a failure drops `area`, which removes the partial tree.
        let area = WorkingArea::new(lease, root);
        self.populate(&area)?;
        Ok(area)
    }

    fn populate(&self, area: &WorkingArea) -> FlowResult<()> {
        let assets = area.assets_dir();
        copy_tree(
            &self.assets_root.join(TEMPLATE_DIR),
            &assets.join(TEMPLATE_DIR),
        )?;
        copy_file(
            &self.assets_root.join(DATA_CONFIG_FILE),
            &assets.join(DATA_CONFIG_FILE),
        )?;

        let mesh_dir = area.mesh_dir();
        fs::create_dir_all(&mesh_dir).map_err(|err| FlowError::io("create mesh dir", err))?;
        copy_file(
            &self.assets_root.join(TRANSFORMS_FILE),
            &mesh_dir.join(TRANSFORMS_FILE),
        )?;

        fs::create_dir_all(area.data_dir()).map_err(|err| FlowError::io("create data dir", err))
    }

    /// Copy the family's point counts and normalization ranges next to the case.
    pub fn install_family_metadata(
        &self,
        area: &WorkingArea,
        family: ModelFamily,
    ) -> FlowResult<()> {
        let family_dir = self.assets_root.join(family.asset_dir());
        let split_dir = area.split_dir();
        fs::create_dir_all(&split_dir).map_err(|err| FlowError::io("create split dir", err))?;
        copy_file(
            &family_dir.join(MIN_POINTS_FILE),
            &area.data_dir().join(MIN_POINTS_FILE),
        )?;
        copy_file(&family_dir.join(META_FILE), &split_dir.join(META_FILE))
    }
}

fn copy_file(from: &Path, to: &Path) -> FlowResult<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|err| FlowError::io(&format!("copy {}", from.display()), err))
}

/// Recursive copy of `src` into `dst`, creating `dst`.
pub fn copy_tree(src: &Path, dst: &Path) -> FlowResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry
            .map_err(|err| FlowError::internal(format!("walk {}: {err}", src.display())))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| FlowError::internal(format!("walk {}: {err}", src.display())))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| FlowError::io(&format!("create {}", target.display()), err))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::domain::AreaState;

    fn assets(root: &Path) {
        fs::create_dir_all(root.join(TEMPLATE_DIR).join("system")).unwrap();
        fs::write(root.join(TEMPLATE_DIR).join("system/controlDict"), "app simpleFoam;").unwrap();
        fs::write(root.join(DATA_CONFIG_FILE), r#"{"cfd params": {}}"#).unwrap();
        fs::write(root.join(TRANSFORMS_FILE), "{}").unwrap();
        fs::create_dir_all(root.join("pipn")).unwrap();
        fs::write(root.join("pipn").join(MIN_POINTS_FILE), r#"{"internal":1,"boundary":1}"#)
            .unwrap();
        fs::write(root.join("pipn").join(META_FILE), "{}").unwrap();
    }

    #[test]
    fn create_lays_out_session_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let assets_root = tmp.path().join("assets");
        assets(&assets_root);
        let store = FsSessionStore::with_roots(&tmp.path().join("sessions"), &assets_root);

        let key = SessionKey::parse("a1").unwrap();
        let area = store.create(&key).unwrap();
        assert_eq!(area.state(), AreaState::Created);
        assert!(area
            .assets_dir()
            .join(TEMPLATE_DIR)
            .join("system/controlDict")
            .is_file());
        assert!(area.assets_dir().join(DATA_CONFIG_FILE).is_file());
        assert!(area.mesh_dir().join(TRANSFORMS_FILE).is_file());
        assert!(area.data_dir().is_dir());
        assert!(store.is_active(&key));

        store.install_family_metadata(&area, ModelFamily::Pipn).unwrap();
        assert!(area.data_dir().join(MIN_POINTS_FILE).is_file());
        assert!(area.split_dir().join(META_FILE).is_file());

        let root = area.root().to_path_buf();
        drop(area);
        assert!(!root.exists());
        assert!(!store.is_active(&key));
    }

    #[test]
    fn duplicate_key_conflicts_without_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let assets_root = tmp.path().join("assets");
        assets(&assets_root);
        let store = FsSessionStore::with_roots(&tmp.path().join("sessions"), &assets_root);

        let key = SessionKey::parse("a1").unwrap();
        let first = store.create(&key).unwrap();
        let marker = first.root().join("marker");
        fs::write(&marker, "mine").unwrap();

        let err = store.create(&key).unwrap_err();
        assert!(matches!(err, FlowError::SessionConflict(_)));
        assert!(marker.is_file(), "first area must be untouched");
    }

    #[test]
    fn stale_directory_is_a_conflict_and_survives() {
        let tmp = tempfile::tempdir().unwrap();
        let assets_root = tmp.path().join("assets");
        assets(&assets_root);
        let sessions = tmp.path().join("sessions");
        fs::create_dir_all(sessions.join("a1")).unwrap();
        let store = FsSessionStore::with_roots(&sessions, &assets_root);

        let key = SessionKey::parse("a1").unwrap();
        assert!(matches!(
            store.create(&key),
            Err(FlowError::SessionConflict(_))
        ));
        assert!(sessions.join("a1").is_dir());
        assert!(!store.is_active(&key));
    }

    #[test]
    fn missing_template_cleans_partial_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            FsSessionStore::with_roots(&tmp.path().join("sessions"), &tmp.path().join("nothing"));

        let key = SessionKey::parse("a1").unwrap();
        assert!(store.create(&key).is_err());
        assert!(!store.area_path(&key).exists());
        assert_eq!(store.active_count(), 0);
    }
}
