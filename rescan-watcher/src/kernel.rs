//! inotify-backed watch registration and event stream.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;

use futures::StreamExt;
use futures::stream::BoxStream;
use inotify::{Event, Inotify, WatchDescriptor, WatchMask, Watches};
use tracing::debug;

use crate::event::RawEvent;
use crate::tree::{WatchBackend, WatchHandle};

/// Stream of decoded notifications from the kernel queue.
pub type KernelEvents = BoxStream<'static, io::Result<RawEvent>>;

/// Notifications requested for every watched directory.
///
/// Without `follow_symlinks` a symlink is never resolved, so a link to a
/// directory is refused instead of watched.
pub fn watch_mask(follow_symlinks: bool) -> WatchMask {
    let mask = WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::CLOSE_WRITE
        | WatchMask::ONLYDIR;
    if follow_symlinks {
        mask
    } else {
        mask | WatchMask::DONT_FOLLOW
    }
}

/// Open an inotify instance, returning its watch registry and event stream.
pub fn open(
    buffer_bytes: usize,
    follow_symlinks: bool,
) -> io::Result<(InotifyBackend, KernelEvents)> {
    let inotify = Inotify::init()?;
    let watches = inotify.watches();
    let events = inotify
        .into_event_stream(vec![0u8; buffer_bytes])?
        .map(|event| event.map(RawEvent::from))
        .boxed();
    Ok((InotifyBackend::new(watches, watch_mask(follow_symlinks)), events))
}

impl From<Event<OsString>> for RawEvent {
    fn from(event: Event<OsString>) -> Self {
        Self {
            mask: event.mask,
            name: event.name,
            handle: WatchHandle::new(event.wd.get_watch_descriptor_id()),
            cookie: event.cookie,
        }
    }
}

/// Watch registry of a live inotify instance.
pub struct InotifyBackend {
    watches: Option<Watches>,
    mask: WatchMask,
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
}

impl InotifyBackend {
    fn new(watches: Watches, mask: WatchMask) -> Self {
        Self {
            watches: Some(watches),
            mask,
            descriptors: HashMap::new(),
        }
    }

    fn watches(&mut self) -> io::Result<&mut Watches> {
        self.watches
            .as_mut()
            .ok_or_else(|| io::Error::other("inotify instance closed"))
    }
}

impl WatchBackend for InotifyBackend {
    fn add_watch(&mut self, path: &Path) -> io::Result<WatchHandle> {
        let mask = self.mask;
        let descriptor = self.watches()?.add(path, mask)?;
        let handle = WatchHandle::new(descriptor.get_watch_descriptor_id());
        self.descriptors.insert(handle, descriptor);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> io::Result<()> {
        let descriptor = self.descriptors.remove(&handle).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no descriptor for {handle}"))
        })?;
        self.watches()?.remove(descriptor)
    }

    fn forget(&mut self, handle: WatchHandle) {
        self.descriptors.remove(&handle);
    }

    fn close(&mut self) -> io::Result<()> {
        debug!(watches = self.descriptors.len(), "closing inotify instance");
        self.descriptors.clear();
        // The descriptor closes once the event stream is dropped as well.
        self.watches = None;
        Ok(())
    }
}
