//! File Lifecycle Manager
//!
//! Images live as files in three directories, one per [`ImageState`].
//! Claiming and releasing are a single `rename`. Terminal moves never replace
//! an existing file, and the image is unlinked from the pending side as soon
//! as it is linked into its terminal directory. Directories are created on
//! demand, so [`FileLifecycleManager::ensure_dirs`] is a bootstrap
//! convenience rather than a precondition.
//!
//! Layout:
//! ```text
//! <pending>/frame_0001.jpg            discovered, unclaimed
//! <pending>/.inflight/frame_0002.jpg  claimed by a worker (still pending)
//! <processed>/frame_0003.jpg
//! <failed>/frame_0004.jpg
//! ```
//!
//! Claiming is a rename into `.inflight`; the loser of a race sees
//! [`LifecycleError::FileMissing`].

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::domain::{ImageId, ImageRecord, ImageState, LifecycleError};

/// Subdirectory of the pending directory holding claimed images.
pub const INFLIGHT_DIR: &str = ".inflight";

type Result<T> = std::result::Result<T, LifecycleError>;

/// Per-state image totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleCounts {
    /// Unclaimed images waiting in the pending directory
    pub pending: usize,
    /// Claimed images currently being processed
    pub in_flight: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Directory-backed image state machine.
#[derive(Debug, Clone)]
pub struct FileLifecycleManager {
    pending_dir: PathBuf,
    inflight_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl FileLifecycleManager {
    pub fn new(
        pending_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        failed_dir: impl Into<PathBuf>,
    ) -> Self {
        let pending_dir = pending_dir.into();
        Self {
            inflight_dir: pending_dir.join(INFLIGHT_DIR),
            pending_dir,
            processed_dir: processed_dir.into(),
            failed_dir: failed_dir.into(),
        }
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    /// Create all lifecycle directories if missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.pending_dir,
            &self.inflight_dir,
            &self.processed_dir,
            &self.failed_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| LifecycleError::io(dir, e))?;
        }
        Ok(())
    }

    /// List unclaimed pending images, oldest first. Does not claim anything.
    ///
    /// Skips hidden files, non-image extensions and zero-length files (a
    /// capture may still be writing them).
    pub async fn acquire_pending(&self) -> Result<Vec<ImageRecord>> {
        let mut found: Vec<ImageRecord> = Vec::new();
        for (id, meta) in list_images(&self.pending_dir).await? {
            if meta.len() == 0 {
                debug!(image = %id, "skipping empty pending file");
                continue;
            }
            let discovered_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            found.push(ImageRecord {
                id,
                state: ImageState::Pending,
                discovered_at,
            });
        }
        found.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }

    /// Take exclusive ownership of a pending image.
    #[instrument(skip(self, record), fields(image = %record.id))]
    pub async fn claim(&self, record: &ImageRecord) -> Result<()> {
        let from = self.pending_dir.join(record.id.as_str());
        let to = self.inflight_dir.join(record.id.as_str());
        tokio::fs::create_dir_all(&self.inflight_dir)
            .await
            .map_err(|e| LifecycleError::io(&self.inflight_dir, e))?;
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LifecycleError::FileMissing(record.id.to_string()))
            }
            Err(e) => Err(LifecycleError::io(&from, e)),
        }
    }

    /// Read the bytes of a claimed (or unclaimed) pending image.
    pub async fn read_image(&self, id: &ImageId) -> Result<Vec<u8>> {
        let path = self.current_pending_path(id).await?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LifecycleError::FileMissing(id.to_string()),
            _ => LifecycleError::io(&path, e),
        })
    }

    /// Move an image to the processed directory.
    pub async fn mark_processed(&self, id: &ImageId) -> Result<()> {
        self.finish(id, &self.processed_dir, ImageState::Processed).await
    }

    /// Move an image to the failed directory.
    pub async fn mark_failed(&self, id: &ImageId) -> Result<()> {
        self.finish(id, &self.failed_dir, ImageState::Failed).await
    }

    /// Move without ever replacing an existing target.
    ///
    /// `rename(2)` overwrites, so the move is a hard link (which fails on an
    /// existing target) followed by unlinking the source. The target directory
    /// is created on demand.
    #[instrument(skip(self, target_dir), fields(image = %id))]
    async fn finish(&self, id: &ImageId, target_dir: &Path, state: ImageState) -> Result<()> {
        let from = self.current_pending_path(id).await?;
        let to = target_dir.join(id.as_str());
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| LifecycleError::io(target_dir, e))?;

        match tokio::fs::hard_link(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LifecycleError::FileSystem {
                    path: to.display().to_string(),
                    reason: format!("an image named {id} already exists in {state}"),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !path_exists(&from).await => {
                return Err(LifecycleError::FileMissing(id.to_string()));
            }
            Err(e) => return Err(LifecycleError::io(&to, e)),
        }

        if let Err(e) = tokio::fs::remove_file(&from).await {
            // Undo the link so the image stays in exactly one place.
            if let Err(undo) = tokio::fs::remove_file(&to).await {
                warn!(path = %to.display(), error = %undo, "could not undo partial move");
            }
            return Err(match e.kind() {
                std::io::ErrorKind::NotFound => LifecycleError::FileMissing(id.to_string()),
                _ => LifecycleError::io(&from, e),
            });
        }
        debug!(%state, "image moved");
        Ok(())
    }

    /// Return a claimed image to the unclaimed pending set.
    pub async fn release(&self, id: &ImageId) -> Result<()> {
        let from = self.inflight_dir.join(id.as_str());
        let to = self.pending_dir.join(id.as_str());
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LifecycleError::FileMissing(id.to_string()))
            }
            Err(e) => Err(LifecycleError::io(&from, e)),
        }
    }

    /// Release every claimed image left behind by a previous process.
    ///
    /// Only safe before any worker starts claiming.
    pub async fn recover_inflight(&self) -> Result<Vec<ImageId>> {
        let mut recovered = Vec::new();
        for (id, _) in list_images(&self.inflight_dir).await? {
            match self.release(&id).await {
                Ok(()) => recovered.push(id),
                Err(e) => warn!(image = %id, error = %e, "could not recover claimed image"),
            }
        }
        Ok(recovered)
    }

    /// Atomically write a new pending image.
    ///
    /// Without a name the image is stored as `manual_<YYYYmmdd_HHMMSS>.jpg`.
    /// An existing pending file with the same name is never replaced.
    pub async fn submit(&self, name: Option<&str>, bytes: Vec<u8>) -> Result<ImageId> {
        let name = match name {
            Some(name) => name.to_string(),
            None => manual_image_name(Utc::now()),
        };
        let id = ImageId::new(name)?;
        if !id.has_image_extension() {
            return Err(LifecycleError::InvalidName(id.to_string()));
        }

        let dir = self.pending_dir.clone();
        let target = dir.join(id.as_str());
        let write_target = target.clone();
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            // Temp files are dot-prefixed, so discovery ignores them until persisted.
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist_noclobber(&write_target).map_err(|e| e.error)?;
            Ok(())
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(id),
            Ok(Err(e)) => Err(LifecycleError::io(&target, e)),
            Err(join) => Err(LifecycleError::FileSystem {
                path: target.display().to_string(),
                reason: join.to_string(),
            }),
        }
    }

    /// Current state of an image, or `None` if it is nowhere.
    pub async fn state_of(&self, id: &ImageId) -> Option<ImageState> {
        let exists = |p: PathBuf| async move { tokio::fs::try_exists(p).await.unwrap_or(false) };
        if exists(self.processed_dir.join(id.as_str())).await {
            Some(ImageState::Processed)
        } else if exists(self.failed_dir.join(id.as_str())).await {
            Some(ImageState::Failed)
        } else if exists(self.inflight_dir.join(id.as_str())).await
            || exists(self.pending_dir.join(id.as_str())).await
        {
            Some(ImageState::Pending)
        } else {
            None
        }
    }

    /// Whether the image is currently claimed by a worker.
    pub async fn is_claimed(&self, id: &ImageId) -> bool {
        tokio::fs::try_exists(self.inflight_dir.join(id.as_str()))
            .await
            .unwrap_or(false)
    }

    pub async fn counts(&self) -> Result<LifecycleCounts> {
        Ok(LifecycleCounts {
            pending: list_images(&self.pending_dir).await?.len(),
            in_flight: list_images(&self.inflight_dir).await?.len(),
            processed: list_images(&self.processed_dir).await?.len(),
            failed: list_images(&self.failed_dir).await?.len(),
        })
    }

    /// Location of a pending image: the claim directory first, then pending.
    async fn current_pending_path(&self, id: &ImageId) -> Result<PathBuf> {
        let claimed = self.inflight_dir.join(id.as_str());
        if tokio::fs::try_exists(&claimed).await.unwrap_or(false) {
            return Ok(claimed);
        }
        let unclaimed = self.pending_dir.join(id.as_str());
        if tokio::fs::try_exists(&unclaimed).await.unwrap_or(false) {
            return Ok(unclaimed);
        }
        Err(LifecycleError::FileMissing(id.to_string()))
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Name for an image supplied without one.
pub fn manual_image_name(at: DateTime<Utc>) -> String {
    format!("manual_{}.jpg", at.format("%Y%m%d_%H%M%S"))
}

/// Regular image files directly inside `dir`. A missing directory is empty.
async fn list_images(dir: &Path) -> Result<Vec<(ImageId, std::fs::Metadata)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LifecycleError::io(dir, e)),
    };

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LifecycleError::io(dir, e))?
    {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(dir = %dir.display(), name = ?raw, "ignoring file with non-UTF-8 name");
                continue;
            }
        };
        let Ok(id) = ImageId::new(name) else {
            continue;
        };
        if !id.has_image_extension() {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            // Moved by another actor between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(LifecycleError::io(&entry.path(), e)),
        };
        if meta.is_file() {
            images.push((id, meta));
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_manager() -> (tempfile::TempDir, FileLifecycleManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLifecycleManager::new(
            dir.path().join("input"),
            dir.path().join("processed"),
            dir.path().join("failed"),
        );
        (dir, manager)
    }

    fn put(manager: &FileLifecycleManager, name: &str, bytes: &[u8]) {
        std::fs::create_dir_all(manager.pending_dir()).unwrap();
        std::fs::write(manager.pending_dir().join(name), bytes).unwrap();
    }

    fn id(name: &str) -> ImageId {
        ImageId::new(name).unwrap()
    }

    #[tokio::test]
    async fn acquire_filters_non_images_hidden_and_empty() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        put(&m, "a.jpg", b"img");
        put(&m, "b.PNG", b"img");
        put(&m, "notes.txt", b"text");
        put(&m, ".partial.jpg", b"img");
        put(&m, "empty.jpg", b"");

        let names: Vec<String> = m
            .acquire_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.jpg".to_string()));
        assert!(names.contains(&"b.PNG".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn acquire_skips_non_utf8_names_without_failing() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        let raw = OsStr::from_bytes(b"frame_\xff.jpg");
        // Some filesystems refuse non-UTF-8 names outright.
        if std::fs::write(m.pending_dir().join(raw), b"img").is_err() {
            return;
        }

        let pending = m.acquire_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id("a.jpg"));
        assert_eq!(m.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn acquire_on_missing_dir_is_empty() {
        let (_dir, m) = make_manager();
        assert!(m.acquire_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acquire_does_not_claim() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        m.acquire_pending().await.unwrap();
        assert_eq!(m.acquire_pending().await.unwrap().len(), 1);
        assert!(!m.is_claimed(&id("a.jpg")).await);
    }

    #[tokio::test]
    async fn claim_hides_image_from_discovery() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();

        assert!(m.acquire_pending().await.unwrap().is_empty());
        assert!(m.is_claimed(&record.id).await);
        assert_eq!(m.state_of(&record.id).await, Some(ImageState::Pending));
    }

    #[tokio::test]
    async fn second_claim_loses_with_file_missing() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();
        match m.claim(&record).await {
            Err(LifecycleError::FileMissing(name)) => assert_eq!(name, "a.jpg"),
            other => panic!("expected FileMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_processed_moves_claimed_image() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        put(&m, "a.jpg", b"img");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();

        m.mark_processed(&record.id).await.unwrap();
        assert!(m.processed_dir().join("a.jpg").exists());
        assert_eq!(m.state_of(&record.id).await, Some(ImageState::Processed));
        assert!(!m.is_claimed(&record.id).await);
    }

    #[tokio::test]
    async fn mark_failed_moves_unclaimed_image() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        put(&m, "a.jpg", b"img");
        m.mark_failed(&id("a.jpg")).await.unwrap();
        assert_eq!(m.state_of(&id("a.jpg")).await, Some(ImageState::Failed));
    }

    #[tokio::test]
    async fn terminal_move_of_moved_image_is_file_missing() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        put(&m, "a.jpg", b"img");
        m.mark_processed(&id("a.jpg")).await.unwrap();
        let err = m.mark_failed(&id("a.jpg")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::FileMissing(_)));
        // Still only in processed.
        assert_eq!(m.state_of(&id("a.jpg")).await, Some(ImageState::Processed));
    }

    #[tokio::test]
    async fn target_collision_is_not_overwritten() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        std::fs::write(m.processed_dir().join("a.jpg"), b"old").unwrap();
        put(&m, "a.jpg", b"new");

        let err = m.mark_processed(&id("a.jpg")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::FileSystem { .. }));
        assert_eq!(std::fs::read(m.processed_dir().join("a.jpg")).unwrap(), b"old");
        assert!(m.pending_dir().join("a.jpg").exists());
    }

    #[tokio::test]
    async fn terminal_moves_create_missing_target_dirs() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        put(&m, "b.jpg", b"img");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();

        m.mark_processed(&record.id).await.unwrap();
        m.mark_failed(&id("b.jpg")).await.unwrap();

        assert_eq!(m.state_of(&record.id).await, Some(ImageState::Processed));
        assert_eq!(m.state_of(&id("b.jpg")).await, Some(ImageState::Failed));
        let counts = m.counts().await.unwrap();
        assert_eq!((counts.pending, counts.in_flight), (0, 0));
    }

    #[tokio::test]
    async fn collision_leaves_claimed_image_in_place() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        std::fs::write(m.failed_dir().join("a.jpg"), b"old").unwrap();
        put(&m, "a.jpg", b"new");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();

        let err = m.mark_failed(&record.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::FileSystem { .. }));
        assert_eq!(std::fs::read(m.failed_dir().join("a.jpg")).unwrap(), b"old");
        assert!(m.is_claimed(&record.id).await);
        assert_eq!(m.read_image(&record.id).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn release_and_recover_return_claims_to_pending() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"img");
        put(&m, "b.jpg", b"img");
        for record in m.acquire_pending().await.unwrap() {
            m.claim(&record).await.unwrap();
        }
        m.release(&id("a.jpg")).await.unwrap();
        assert_eq!(m.acquire_pending().await.unwrap().len(), 1);

        let recovered = m.recover_inflight().await.unwrap();
        assert_eq!(recovered, vec![id("b.jpg")]);
        assert_eq!(m.acquire_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn read_image_prefers_claimed_location() {
        let (_dir, m) = make_manager();
        put(&m, "a.jpg", b"frame-bytes");
        let record = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&record).await.unwrap();
        assert_eq!(m.read_image(&record.id).await.unwrap(), b"frame-bytes");

        let err = m.read_image(&id("gone.jpg")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::FileMissing(_)));
    }

    #[tokio::test]
    async fn submit_writes_pending_image_without_clobbering() {
        let (_dir, m) = make_manager();
        let submitted = m.submit(Some("lap.png"), b"png".to_vec()).await.unwrap();
        assert_eq!(submitted, id("lap.png"));
        assert_eq!(m.acquire_pending().await.unwrap().len(), 1);

        let err = m.submit(Some("lap.png"), b"other".to_vec()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::FileSystem { .. }));
        assert_eq!(std::fs::read(m.pending_dir().join("lap.png")).unwrap(), b"png");
    }

    #[tokio::test]
    async fn submit_rejects_unsafe_and_non_image_names() {
        let (_dir, m) = make_manager();
        assert!(matches!(
            m.submit(Some("../escape.jpg"), b"x".to_vec()).await,
            Err(LifecycleError::InvalidName(_))
        ));
        assert!(matches!(
            m.submit(Some("notes.txt"), b"x".to_vec()).await,
            Err(LifecycleError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn submit_without_name_uses_manual_prefix() {
        let (_dir, m) = make_manager();
        let submitted = m.submit(None, b"jpg".to_vec()).await.unwrap();
        assert!(submitted.as_str().starts_with("manual_"));
        assert!(submitted.as_str().ends_with(".jpg"));
    }

    #[test]
    fn manual_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 26, 14, 3, 9).unwrap();
        assert_eq!(manual_image_name(at), "manual_20240526_140309.jpg");
    }

    #[tokio::test]
    async fn counts_report_each_location() {
        let (_dir, m) = make_manager();
        m.ensure_dirs().await.unwrap();
        put(&m, "a.jpg", b"img");
        put(&m, "b.jpg", b"img");
        put(&m, "c.jpg", b"img");
        let first = m.acquire_pending().await.unwrap().remove(0);
        m.claim(&first).await.unwrap();
        m.mark_processed(&id("b.jpg")).await.ok();
        m.mark_failed(&id("c.jpg")).await.ok();

        let counts = m.counts().await.unwrap();
        assert_eq!(counts.pending + counts.in_flight, 1);
        assert_eq!(counts.processed + counts.failed, 2);
    }
}
