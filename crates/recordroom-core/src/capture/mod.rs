//! Capture sources and their install/uninstall lifecycle.
//!
//! Sources are owned by one recorder instance. Each is installed at most once
//! no matter how many records are attached, and uninstalling restores whatever
//! the source replaced.

mod breadcrumb;
mod console;
mod network;

pub use breadcrumb::{BreadcrumbCapture, MASKED_VALUE};
pub use console::{ConsoleCapture, ConsoleLayer};
pub use network::{
    BodySource, CapturedResponse, HeaderSource, InstrumentedClient, NetworkCapture, RequestSpan,
    UNREADABLE_BODY,
};

use crate::config::RecorderConfig;
use crate::emitter::Emitter;
use crate::storage::lock;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Console,
    Network,
    Breadcrumb,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Console => "console",
            SourceKind::Network => "network",
            SourceKind::Breadcrumb => "breadcrumb",
        }
    }
}

/// The capture sources of one recorder.
pub struct CaptureSources {
    console: ConsoleCapture,
    network: NetworkCapture,
    breadcrumbs: BreadcrumbCapture,
    installed: Mutex<HashSet<SourceKind>>,
}

impl CaptureSources {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            console: ConsoleCapture::new(emitter.clone()),
            network: NetworkCapture::new(emitter.clone()),
            breadcrumbs: BreadcrumbCapture::new(emitter),
            installed: Mutex::new(HashSet::new()),
        }
    }

    /// Install every source enabled in `config` that is not installed yet.
    ///
    /// Returns the sources installed by this call; empty on every call after
    /// the first with the same flags.
    pub fn ensure_installed(&self, config: &RecorderConfig) -> Vec<SourceKind> {
        let mut installed = lock(&self.installed);
        let wanted = [
            (SourceKind::Console, config.patch_console),
            (SourceKind::Network, config.patch_network),
            (SourceKind::Breadcrumb, config.patch_breadcrumb),
        ];

        let mut fresh = Vec::new();
        for (kind, enabled) in wanted {
            if !enabled || installed.contains(&kind) {
                continue;
            }
            match kind {
                SourceKind::Console => self.console.install(),
                SourceKind::Network => self.network.install(),
                SourceKind::Breadcrumb => self.breadcrumbs.install(config),
            }
            installed.insert(kind);
            debug!(target: "recordroom::capture", "Installed {} capture", kind.as_str());
            fresh.push(kind);
        }
        fresh
    }

    pub fn is_installed(&self, kind: SourceKind) -> bool {
        lock(&self.installed).contains(&kind)
    }

    /// Uninstall every installed source, restoring what each replaced.
    pub fn uninstall_all(&self) {
        let mut installed = lock(&self.installed);
        for kind in installed.drain() {
            match kind {
                SourceKind::Console => self.console.uninstall(),
                SourceKind::Network => self.network.uninstall(),
                SourceKind::Breadcrumb => self.breadcrumbs.uninstall(),
            }
            debug!(target: "recordroom::capture", "Uninstalled {} capture", kind.as_str());
        }
    }

    pub fn console(&self) -> &ConsoleCapture {
        &self.console
    }

    pub fn network(&self) -> &NetworkCapture {
        &self.network
    }

    pub fn breadcrumbs(&self) -> &BreadcrumbCapture {
        &self.breadcrumbs
    }
}
