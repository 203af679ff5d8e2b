//! Live page capture through Chrome.

use crate::Result;
use eoka::{Browser, Page, StealthConfig};
use stepwright::Snapshot;
use tracing::{debug, info, warn};

/// Serialises the live DOM into the snapshot format: open shadow roots and
/// same-origin frames inline, cross-origin frames as empty stubs.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'LINK', 'META']);
  const rectOf = (el) => {
    const r = el.getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height };
  };
  const styleOf = (el) => {
    const s = el.ownerDocument.defaultView.getComputedStyle(el);
    return {
      displayNone: s.display === 'none',
      visibilityHidden: s.visibility === 'hidden',
      opacity: parseFloat(s.opacity) || 0,
    };
  };
  const children = (parent) => {
    const out = [];
    for (const node of parent.childNodes) {
      if (node.nodeType === Node.TEXT_NODE) {
        if (node.textContent.trim()) out.push({ text: node.textContent });
      } else if (node.nodeType === Node.ELEMENT_NODE && !SKIP.has(node.tagName)) {
        out.push(element(node));
      }
    }
    return out;
  };
  const element = (el) => {
    const attrs = {};
    for (const a of el.attributes) attrs[a.name] = a.value;
    const out = { tag: el.tagName.toLowerCase(), attrs, rect: rectOf(el), style: styleOf(el) };
    if ('value' in el && typeof el.value === 'string') out.value = el.value;
    if (el.checked === true) out.checked = true;
    if (el.shadowRoot) out.shadow = { mode: el.shadowRoot.mode, children: children(el.shadowRoot) };
    if (el.tagName === 'IFRAME' || el.tagName === 'FRAME') {
      let doc = null;
      try { doc = el.contentDocument; } catch (e) { doc = null; }
      out.frame = doc
        ? { url: doc.location.href, crossOrigin: false, children: children(doc) }
        : { url: el.src || '', crossOrigin: true, children: [] };
    }
    out.children = children(el);
    return out;
  };
  return JSON.stringify({ url: location.href, shadowInterceptor: false, children: children(document) });
})()
"#;

/// How to launch Chrome for a capture.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub headless: bool,
    /// Longest wait for the network to go quiet before serialising.
    pub settle_ms: u64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            headless: true,
            settle_ms: 5000,
        }
    }
}

pub(crate) async fn launch(options: &CaptureOptions) -> Result<Browser> {
    let stealth = StealthConfig {
        headless: options.headless,
        ..Default::default()
    };
    debug!("Launching browser (headless: {})", options.headless);
    Ok(Browser::launch_with_config(stealth).await?)
}

/// Open `url` in Chrome and serialise the rendered page.
pub async fn capture_page(url: &str, options: &CaptureOptions) -> Result<Snapshot> {
    let browser = launch(options).await?;

    let captured = open_and_serialise(&browser, url, options).await;
    if let Err(e) = browser.close().await {
        warn!("Failed to close browser: {}", e);
    }
    let json = captured?;

    let snapshot = Snapshot::from_json(&json)?;
    info!("Captured {} ({} bytes)", snapshot.url, json.len());
    Ok(snapshot)
}

async fn open_and_serialise(browser: &Browser, url: &str, options: &CaptureOptions) -> Result<String> {
    let page = browser.new_page(url).await?;
    wait_for_quiet(&page, options.settle_ms).await;
    serialise(&page).await
}

/// Let the network go quiet, or give up after `settle_ms`.
pub(crate) async fn wait_for_quiet(page: &Page, settle_ms: u64) {
    if let Err(e) = page.wait_for_network_idle(500, settle_ms).await {
        debug!("Network did not settle: {}", e);
    }
}

/// The page as it is right now, in snapshot JSON.
pub(crate) async fn serialise(page: &Page) -> Result<String> {
    let json: String = page.evaluate(SNAPSHOT_JS).await?;
    Ok(json)
}
