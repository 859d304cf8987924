//! Recursive change watcher over the source tree.
//!
//! The OS watch runs on its own thread and forwards qualifying events on an
//! unbounded channel. Only `*.conf` files that are not dot-prefixed and that
//! match the configured glob get through.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};

const WATCHED_EXTENSION: &str = "conf";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOp {
    Create,
    Write,
    Rename,
    Other,
}

impl WatchOp {
    fn triggers_rebuild(self) -> bool {
        !matches!(self, WatchOp::Other)
    }

    fn may_add_dirs(self) -> bool {
        matches!(self, WatchOp::Create | WatchOp::Rename)
    }
}

impl fmt::Display for WatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchOp::Create => "create",
            WatchOp::Write => "write",
            WatchOp::Rename => "rename",
            WatchOp::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub op: WatchOp,
}

#[derive(Clone, Debug)]
pub struct WatchFilter {
    glob: GlobMatcher,
}

impl WatchFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = Glob::new(pattern)
            .with_context(|| format!("invalid watch glob `{pattern}`"))?
            .compile_matcher();
        Ok(Self { glob })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.glob.is_match(path)
    }

    pub fn accepts(&self, event: &WatchEvent) -> bool {
        let Some(name) = event.path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        if event.path.extension().and_then(|ext| ext.to_str()) != Some(WATCHED_EXTENSION) {
            return false;
        }
        self.matches(&event.path) && event.op.triggers_rebuild()
    }
}

/// Running watcher thread. Dropping the handle asks the thread to stop;
/// [`WatchHandle::stop`] also waits for it to exit, which releases the
/// event sender.
#[derive(Debug)]
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Blocks for up to one poll interval.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("change watcher thread panicked");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(target_os = "linux")]
pub use inotify_backend::spawn;

#[cfg(not(target_os = "linux"))]
pub fn spawn(
    _root: &Path,
    _filter: WatchFilter,
    _events: tokio::sync::mpsc::UnboundedSender<WatchEvent>,
) -> Result<WatchHandle> {
    anyhow::bail!("change watching is only supported on Linux; use --raw on this platform")
}

#[cfg(target_os = "linux")]
mod inotify_backend {
    use std::collections::HashMap;
    use std::os::fd::AsFd;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::{Context, Result};
    use nix::errno::Errno;
    use nix::poll::{PollFd, PollFlags, poll};
    use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
    use tokio::sync::mpsc::UnboundedSender;
    use tracing::{debug, error, info, trace, warn};
    use walkdir::WalkDir;

    use super::{WatchEvent, WatchFilter, WatchHandle, WatchOp};

    /// How often a blocked watcher re-checks its stop flag.
    const POLL_INTERVAL_MS: u16 = 200;

    fn watch_mask() -> AddWatchFlags {
        AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_MODIFY
            | AddWatchFlags::IN_CLOSE_WRITE
            | AddWatchFlags::IN_DELETE
            | AddWatchFlags::IN_MOVED_FROM
            | AddWatchFlags::IN_MOVED_TO
    }

    pub(super) fn op_from_mask(mask: AddWatchFlags) -> WatchOp {
        if mask.contains(AddWatchFlags::IN_CREATE) {
            WatchOp::Create
        } else if mask.intersects(AddWatchFlags::IN_MODIFY | AddWatchFlags::IN_CLOSE_WRITE) {
            WatchOp::Write
        } else if mask.intersects(AddWatchFlags::IN_MOVED_FROM | AddWatchFlags::IN_MOVED_TO) {
            WatchOp::Rename
        } else {
            WatchOp::Other
        }
    }

    struct WatchSet {
        inotify: Inotify,
        filter: WatchFilter,
        dirs: HashMap<WatchDescriptor, PathBuf>,
    }

    impl WatchSet {
        /// Watches `start` and every directory below it that matches the glob.
        fn add_tree(&mut self, start: &Path, include_start: bool) -> Result<()> {
            for entry in WalkDir::new(start).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(error = %err, "skipping unreadable path while adding watches");
                        continue;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                let dir = entry.path();
                let is_start = entry.depth() == 0;
                if !(is_start && include_start) && !self.filter.matches(dir) {
                    continue;
                }
                let wd = self
                    .inotify
                    .add_watch(dir, watch_mask())
                    .with_context(|| format!("failed to watch {}", dir.display()))?;
                trace!(dir = %dir.display(), "watching directory");
                self.dirs.insert(wd, dir.to_path_buf());
            }
            Ok(())
        }

        fn readable(&self) -> nix::Result<bool> {
            let mut fds = [PollFd::new(self.inotify.as_fd(), PollFlags::POLLIN)];
            Ok(poll(&mut fds, POLL_INTERVAL_MS)? > 0)
        }

        fn run(mut self, events: UnboundedSender<WatchEvent>, stop: &AtomicBool) {
            while !stop.load(Ordering::Acquire) {
                match self.readable() {
                    Ok(true) => {}
                    Ok(false) | Err(Errno::EINTR) => continue,
                    Err(err) => {
                        error!(error = %err, "inotify poll failed, change watching stopped");
                        return;
                    }
                }
                let batch = match self.inotify.read_events() {
                    Ok(batch) => batch,
                    Err(Errno::EINTR) => continue,
                    Err(err) => {
                        error!(error = %err, "inotify read failed, change watching stopped");
                        return;
                    }
                };
                for raw in batch {
                    if raw.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                        warn!("inotify queue overflow, some changes may have been missed");
                        continue;
                    }
                    if raw.mask.contains(AddWatchFlags::IN_IGNORED) {
                        self.dirs.remove(&raw.wd);
                        continue;
                    }
                    let Some(dir) = self.dirs.get(&raw.wd) else {
                        continue;
                    };
                    let path = match &raw.name {
                        Some(name) => dir.join(name),
                        None => dir.clone(),
                    };
                    let op = op_from_mask(raw.mask);

                    if op.may_add_dirs()
                        && raw.mask.contains(AddWatchFlags::IN_ISDIR)
                        && let Err(err) = self.add_tree(&path, false)
                    {
                        warn!(path = %path.display(), error = %err, "failed to watch new directory");
                    }

                    let event = WatchEvent { path, op };
                    if !self.filter.accepts(&event) {
                        trace!(path = %event.path.display(), op = %event.op, "ignoring change");
                        continue;
                    }
                    if events.send(event).is_err() {
                        debug!("watch receiver dropped, stopping watcher");
                        return;
                    }
                }
            }
            debug!("change watcher stopped");
        }
    }

    pub fn spawn(
        root: &Path,
        filter: WatchFilter,
        events: UnboundedSender<WatchEvent>,
    ) -> Result<WatchHandle> {
        let inotify =
            Inotify::init(InitFlags::IN_CLOEXEC).context("failed to initialise inotify")?;
        let mut watches = WatchSet {
            inotify,
            filter,
            dirs: HashMap::new(),
        };
        watches.add_tree(root, true)?;
        info!(root = %root.display(), dirs = watches.dirs.len(), "watching for config changes");

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("trailsc-watcher".into())
            .spawn(move || watches.run(events, &thread_stop))
            .context("failed to spawn watcher thread")?;
        Ok(WatchHandle {
            stop,
            thread: Some(thread),
        })
    }
}
