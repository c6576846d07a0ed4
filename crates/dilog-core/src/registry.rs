//! Process-wide channel registry.
//!
//! Channels are created lazily on first lookup by name and persist for
//! the registry's lifetime (for the global registry, the process
//! lifetime). The registry mutex guards only lookup and insertion; after
//! a handle is returned, per-channel state has its own lock and the
//! per-channel thread-affinity check takes over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dilog_error::Result;

use crate::channel::{Channel, ChannelOptions, ChannelShared};
use crate::codec;

/// Maps channel names to their shared state and owns the trace root
/// directory.
pub struct Registry {
    root: PathBuf,
    channels: Mutex<HashMap<String, Arc<ChannelShared>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry writing `<channel>.dilog` files into the current
    /// working directory, like the global one.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(".")
    }

    /// A registry rooted at an explicit directory. Tests use this to run
    /// hermetically inside a temp dir.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// The directory trace files live in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up or create the channel `name` with default options.
    pub fn channel(&self, name: &str) -> Result<Channel> {
        self.channel_with(name, ChannelOptions::default())
    }

    /// Look up or create the channel `name`.
    ///
    /// Creation decides the mode: if `<name>.dilog` under the registry
    /// root can be opened for reading the channel replays it, otherwise
    /// the file is created and the channel records. Lookup is idempotent;
    /// the options apply to the returned handle only.
    pub fn channel_with(&self, name: &str, options: ChannelOptions) -> Result<Channel> {
        codec::validate_channel_name(name)?;
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let shared = match channels.get(name) {
            Some(shared) => Arc::clone(shared),
            None => {
                let path = self.root.join(format!("{name}.dilog"));
                let shared = ChannelShared::create(name, &path)?;
                channels.insert(name.to_owned(), Arc::clone(&shared));
                shared
            }
        };
        Ok(Channel::new(shared, options))
    }
}

/// The process-wide registry, rooted at the current working directory.
pub fn global() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(Registry::new)
}

/// Look up or create a channel in the global registry.
pub fn channel(name: &str) -> Result<Channel> {
    global().channel(name)
}

/// Look up or create a channel in the global registry with options.
pub fn channel_with(name: &str, options: ChannelOptions) -> Result<Channel> {
    global().channel_with(name, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = Registry::with_root(dir.path());
        let a = registry.channel("same").expect("first lookup");
        a.emit("one").expect("record");
        let b = registry.channel("same").expect("second lookup");
        // Both handles drive the same underlying channel state.
        b.emit("two").expect("record through second handle");
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_channel_name_validation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = Registry::with_root(dir.path());
        assert!(registry.channel("ok-name.2").is_ok());
        assert!(registry.channel("").is_err());
        assert!(registry.channel("a/b").is_err());
        assert!(registry.channel("a[b").is_err());
    }

    #[test]
    fn test_trace_file_lands_under_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = Registry::with_root(dir.path());
        registry.channel("located").expect("create");
        assert!(dir.path().join("located.dilog").exists());
    }
}
