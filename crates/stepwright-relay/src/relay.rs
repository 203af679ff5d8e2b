//! Relay state: the loaded page, its replayer and the recording being built.

use anyhow::{bail, Context};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use stepwright::xpath;
use stepwright::{
    lock, share, Dom, EngineConfig, NodeId, PollConfig, Recording, RecordingSession, Replayer,
    SharedDom, Snapshot, Step, StepEvent, StepNotice,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

struct LoadedPage {
    url: String,
    dom: SharedDom,
    replayer: Arc<Replayer>,
}

/// Everything the relay keeps between tool calls.
pub struct Relay {
    config: EngineConfig,
    page: Option<LoadedPage>,
    session: RecordingSession,
    notices: Arc<Mutex<Vec<StepNotice>>>,
}

impl Relay {
    pub fn new(config: EngineConfig) -> Self {
        let mut session = RecordingSession::new("relay");
        session.start();
        Self {
            config,
            page: None,
            session,
            notices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load a page snapshot from disk.
    pub fn load_page(&mut self, path: &Path) -> anyhow::Result<String> {
        let snapshot = Snapshot::load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        Ok(self.load_snapshot(&snapshot))
    }

    /// Replace the current page. Records a navigation step and returns the url.
    ///
    /// Must be called inside a tokio runtime: step notices are collected by a
    /// spawned task.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> String {
        let dom = share(snapshot.to_dom());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notices = Arc::clone(&self.notices);
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                notices
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(notice);
            }
        });

        let replayer = Replayer::new(dom.clone(), self.config.clone()).with_notifications(tx);
        self.session.record_open(&snapshot.url);
        info!("Loaded {}", snapshot.url);
        self.page = Some(LoadedPage {
            url: snapshot.url.clone(),
            dom,
            replayer: Arc::new(replayer),
        });
        snapshot.url.clone()
    }

    fn page(&self) -> anyhow::Result<&LoadedPage> {
        match &self.page {
            Some(page) => Ok(page),
            None => bail!("No page loaded. Use load_page first."),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.url.as_str())
    }

    /// The current page's replayer, for calls that outlive the relay lock.
    pub fn replayer(&self) -> anyhow::Result<Arc<Replayer>> {
        Ok(Arc::clone(&self.page()?.replayer))
    }

    /// Record an interaction with the element `path` selects.
    pub fn capture(
        &mut self,
        path: &str,
        event: StepEvent,
        value: Option<&str>,
    ) -> anyhow::Result<Step> {
        if event == StepEvent::Open {
            bail!("navigation is recorded by load_page");
        }
        let shared = self.page()?.dom.clone();
        let dom = lock(&shared);
        let Some(target) = locate(&dom, path) else {
            bail!("no element matches {}", path);
        };
        debug!("Capturing {:?} on {}", event, target);
        Ok(self.session.record(&dom, target, event, value).clone())
    }

    /// Drop captured steps and start numbering labels again.
    pub fn start_recording(&mut self, name: &str) {
        self.session = RecordingSession::new(name);
        self.session.start();
        if let Some(url) = self.url().map(str::to_string) {
            self.session.record_open(&url);
        }
    }

    /// The recording so far. Capturing can continue afterwards.
    pub fn export_recording(&self, path: Option<&Path>) -> anyhow::Result<Recording> {
        let recording = self.session.clone().finish();
        if let Some(path) = path {
            recording
                .save(path)
                .with_context(|| format!("writing recording {}", path.display()))?;
        }
        Ok(recording)
    }

    /// Step notices received since the last call.
    pub fn drain_notices(&self) -> Vec<StepNotice> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Poller settings with the page defaults filled in.
    pub fn poll_config(
        &self,
        search_terms: Option<Vec<String>>,
        idle_timeout_seconds: Option<u64>,
        poll_interval_ms: Option<u64>,
    ) -> PollConfig {
        let defaults = &self.config.poller;
        PollConfig::new(
            search_terms.unwrap_or_else(|| defaults.search_terms.clone()),
            idle_timeout_seconds.unwrap_or(defaults.idle_timeout_secs),
            poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        )
    }
}

/// First element `path` selects in the top document, then in same-origin
/// frames and open shadow roots.
fn locate(dom: &Dom, path: &str) -> Option<NodeId> {
    let mut contexts = Vec::new();
    collect_contexts(dom, dom.root(), &mut contexts);
    contexts
        .into_iter()
        .find_map(|context| xpath::evaluate(dom, context, path))
}

fn collect_contexts(dom: &Dom, scope: NodeId, out: &mut Vec<NodeId>) {
    out.push(scope);
    for node in dom.deep_descendants(scope) {
        if let Some(root) = dom.shadow_root(node) {
            out.push(root);
        }
        if let Some(doc) = dom.content_document(node) {
            collect_contexts(dom, doc, out);
        }
    }
}
