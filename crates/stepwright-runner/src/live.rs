//! Replay against a live Chrome page.
//!
//! Every step resolves its bundle on a fresh snapshot of the page, turns the
//! match into frame and shadow hops plus a path the page can walk itself, then
//! acts through page script. Widgets that ignore scripted edits get real
//! keystrokes from Chrome instead.

use crate::capture::{launch, serialise, wait_for_quiet, CaptureOptions};
use crate::{Error, Result};
use eoka::{Browser, Page};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use stepwright::executor::{category, Category};
use stepwright::replay::{StepReport, TargetPath};
use stepwright::{
    xpath_of, Action, ActionKind, Bundle, Dom, EngineConfig, NodeId, Recording, ReplayReport,
    Resolution, Resolver, Snapshot, Step, StepOutcome, Technique,
};
use tracing::{debug, info, warn};

/// One boundary to cross on the way down from the top-level document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum Hop {
    /// Enter the open shadow root of the host at this path.
    Shadow(String),
    /// Enter the document of the frame at this path.
    Frame(String),
}

/// Where an element sits in the live page: hops outermost first, then its
/// path within the last tree entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locator {
    pub hops: Vec<Hop>,
    pub xpath: String,
}

/// Build the locator for `el` from the snapshot it was resolved on.
pub fn locate(dom: &Dom, el: NodeId) -> Locator {
    let mut hops = Vec::new();
    let mut cur = el;
    loop {
        let root = dom.root_node(cur);
        if let Some(host) = dom.shadow_host(root) {
            hops.push(Hop::Shadow(xpath_of(dom, host)));
            cur = host;
        } else if let Some(frame) = dom.frame_element(root) {
            hops.push(Hop::Frame(xpath_of(dom, frame)));
            cur = frame;
        } else {
            break;
        }
    }
    hops.reverse();
    Locator {
        hops,
        xpath: xpath_of(dom, el),
    }
}

/// Resolves a locator to its element, or `null`.
const LOCATE_FN: &str = r#"(loc) => {
  const walk = (root, path) => {
    let cur = root;
    for (const seg of path.split('/').filter(Boolean)) {
      const m = /^([^\[]+)(?:\[(\d+)\])?$/.exec(seg);
      if (!m || !cur) return null;
      const same = Array.from(cur.children).filter((c) => c.localName.toLowerCase() === m[1]);
      cur = same[(m[2] ? parseInt(m[2], 10) : 1) - 1] || null;
    }
    return cur;
  };
  let root = document;
  for (const hop of loc.hops) {
    const el = walk(root, hop.path);
    if (!el) return null;
    try {
      root = hop.kind === 'shadow' ? el.shadowRoot : el.contentDocument;
    } catch (e) {
      return null;
    }
    if (!root) return null;
  }
  return walk(root, loc.xpath);
}"#;

/// Picks the `<option>` whose value, or case-insensitive text, matches.
const SELECT_FN: &str = r#"(el, value) => {
  const wanted = String(value).trim().toLowerCase();
  const opt = Array.from(el.options).find((o) => o.value === value)
    || Array.from(el.options).find((o) => o.text.trim().toLowerCase() === wanted);
  if (!opt) return { status: 'option_not_found' };
  el.value = opt.value;
  const win = el.ownerDocument.defaultView || window;
  el.dispatchEvent(new win.Event('input', { bubbles: true }));
  el.dispatchEvent(new win.Event('change', { bubbles: true }));
  return { status: 'ok', technique: 'select_option' };
}"#;

const CLICK_FN: &str = r#"(el, value) => {
  if (!el) return { status: 'not_found' };
  if (el.localName === 'select' && value) return select(el, value);
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const win = el.ownerDocument.defaultView || window;
  const r = el.getBoundingClientRect();
  const init = {
    bubbles: true, cancelable: true, composed: true, view: win, button: 0,
    clientX: r.x + r.width / 2, clientY: r.y + r.height / 2,
  };
  const Pointer = win.PointerEvent || win.MouseEvent;
  el.dispatchEvent(new win.MouseEvent('mouseover', init));
  el.dispatchEvent(new win.MouseEvent('mousemove', init));
  el.dispatchEvent(new Pointer('pointerdown', init));
  el.dispatchEvent(new win.MouseEvent('mousedown', init));
  if (typeof el.focus === 'function') el.focus();
  el.dispatchEvent(new Pointer('pointerup', init));
  el.dispatchEvent(new win.MouseEvent('mouseup', init));
  el.dispatchEvent(new win.MouseEvent('click', init));
  return { status: 'ok', technique: 'pointer_sequence' };
}"#;

/// Tries the scripted techniques for the widget kind, in cascade order, and
/// keeps the first that changed the content to show the text.
const TYPE_FN: &str = r#"(el, text, kind) => {
  if (!el) return { status: 'not_found' };
  if (kind === 'select') return select(el, text);
  const win = el.ownerDocument.defaultView || window;
  const doc = el.ownerDocument;
  const content = () => ['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName)
    ? el.value : (el.textContent || '');
  const before = content();
  const landed = () => {
    const after = content();
    return after === text || (after !== before && after.includes(text));
  };
  const fire = (type) => el.dispatchEvent(new win.Event(type, { bubbles: true, composed: true }));
  const nativeSet = () => {
    const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
    if (!desc || !desc.set) return false;
    desc.set.call(el, text);
    fire('input');
    fire('change');
    return true;
  };
  const selectAll = () => {
    const range = doc.createRange();
    range.selectNodeContents(el);
    const sel = win.getSelection();
    sel.removeAllRanges();
    sel.addRange(range);
    return range;
  };
  const viaRange = () => {
    try {
      const range = selectAll();
      range.deleteContents();
      range.insertNode(doc.createTextNode(text));
      fire('input');
      return true;
    } catch (e) {
      return false;
    }
  };
  const viaExec = () => { selectAll(); return doc.execCommand('insertText', false, text); };
  el.focus();
  if (kind === 'terminal') return { status: 'unchanged', before };
  const steps = kind === 'standard' ? [['native_setter', nativeSet]]
    : kind === 'editable' ? [['selection_range', viaRange], ['exec_command', viaExec]]
    : [['exec_command', viaExec], ['selection_range', viaRange], ['value_assign', () => 'value' in el && nativeSet()]];
  for (const [technique, apply] of steps) {
    if (apply() && landed()) return { status: 'ok', technique };
  }
  if (kind !== 'standard') selectAll();
  return { status: 'unchanged', before };
}"#;

/// Whether keystrokes typed after the scripted techniques landed.
const LANDED_FN: &str = r#"(el, text, before) => {
  if (!el) return { status: 'not_found' };
  const after = ['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName) ? el.value : (el.textContent || '');
  const ok = after === text || (after !== before && after.includes(text));
  return { status: ok ? 'ok' : 'unchanged', technique: 'key_events' };
}"#;

const FOCUS_FN: &str = r#"(el) => {
  if (!el) return { status: 'not_found' };
  el.focus();
  return { status: 'ok' };
}"#;

/// Wrap `action` so it runs on the element `locator` names. `args` follow the
/// element in the call; the result comes back as a JSON string.
fn action_script(action: &str, locator: &Locator, args: &[Value]) -> Result<String> {
    let mut call = vec![format!("locate({})", serde_json::to_string(locator)?)];
    for arg in args {
        call.push(serde_json::to_string(arg)?);
    }
    Ok(format!(
        "(() => {{ const locate = {}; const select = {}; return JSON.stringify(({})({})); }})()",
        LOCATE_FN,
        SELECT_FN,
        action,
        call.join(", ")
    ))
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    status: String,
    #[serde(default)]
    technique: Option<String>,
    #[serde(default)]
    before: Option<String>,
}

/// Name the page script uses for a widget category.
fn kind_of(category: Category) -> &'static str {
    match category {
        Category::Terminal => "terminal",
        Category::Select => "select",
        Category::Standard => "standard",
        Category::ContentEditable => "editable",
        Category::ComplexEditor => "editor",
    }
}

fn technique_named(name: &str) -> Option<Technique> {
    Some(match name {
        "pointer_sequence" => Technique::PointerSequence,
        "select_option" => Technique::SelectOption,
        "native_setter" => Technique::NativeSetter,
        "exec_command" => Technique::ExecCommand,
        "selection_range" => Technique::SelectionRange,
        "key_events" => Technique::KeyEvents,
        "value_assign" => Technique::ValueAssign,
        _ => return None,
    })
}

/// A resolved step target.
struct Target {
    resolution: Resolution,
    locator: Locator,
    category: Category,
}

/// A Chrome tab that recordings are replayed on.
pub struct LivePage {
    browser: Browser,
    page: Page,
    config: EngineConfig,
    resolver: Resolver,
    settle_ms: u64,
}

impl LivePage {
    /// Launch Chrome and open `url`.
    pub async fn open(url: &str, options: &CaptureOptions, config: EngineConfig) -> Result<Self> {
        let browser = launch(options).await?;
        info!("Navigating to: {}", url);
        let page = browser.new_page(url).await?;
        wait_for_quiet(&page, options.settle_ms).await;
        Ok(Self {
            browser,
            page,
            resolver: Resolver::new(config.resolver.clone()),
            config,
            settle_ms: options.settle_ms,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn snapshot(&self) -> Result<Dom> {
        let json = serialise(&self.page).await?;
        Ok(Snapshot::from_json(&json)?.to_dom())
    }

    /// Resolve on fresh snapshots until the resolver's timeout is spent.
    async fn resolve(&self, bundle: &Bundle) -> Result<Target> {
        let deadline = Instant::now() + self.config.resolver.timeout();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let dom = self.snapshot().await?;
            if let Some(mut resolution) = self.resolver.resolve_once(&dom, bundle) {
                resolution.attempts = attempts;
                return Ok(Target {
                    locator: locate(&dom, resolution.element),
                    category: category(&dom, resolution.element),
                    resolution,
                });
            }
            if Instant::now() >= deadline {
                return Err(stepwright::Error::NotFound(format!(
                    "<{}> {} after {} attempts",
                    bundle.tag, bundle.xpath, attempts
                ))
                .into());
            }
            tokio::time::sleep(self.config.resolver.retry_interval()).await;
        }
    }

    async fn run_script(&self, script: String) -> Result<ScriptOutcome> {
        let json: String = self.page.evaluate(&script).await?;
        Ok(serde_json::from_str(&json)?)
    }

    fn settled(&self, outcome: ScriptOutcome, locator: &Locator) -> Result<Technique> {
        match outcome.status.as_str() {
            "ok" => outcome
                .technique
                .as_deref()
                .and_then(technique_named)
                .ok_or_else(|| Error::Config(format!("unknown technique {:?}", outcome.technique))),
            "not_found" => {
                Err(stepwright::Error::NotFound(format!("{} is gone from the page", locator.xpath)).into())
            }
            other => Err(stepwright::Error::ActionFailed(format!(
                "{} on {}",
                other.replace('_', " "),
                locator.xpath
            ))
            .into()),
        }
    }

    async fn click(&self, target: &Target, value: Option<&str>) -> Result<Technique> {
        let value = Value::from(value.filter(|v| !v.is_empty()));
        let outcome = self
            .run_script(action_script(CLICK_FN, &target.locator, &[value])?)
            .await?;
        self.settled(outcome, &target.locator)
    }

    async fn type_text(&self, target: &Target, text: &str) -> Result<Technique> {
        let kind = kind_of(target.category);
        let script = action_script(TYPE_FN, &target.locator, &[Value::from(text), Value::from(kind)])?;
        let outcome = self.run_script(script).await?;
        if outcome.status != "unchanged" {
            return self.settled(outcome, &target.locator);
        }

        // Focused with its content selected; typing replaces it.
        debug!("scripted edits ignored by {}, typing keys", target.locator.xpath);
        self.page.type_text(text).await?;
        self.page.wait(self.config.executor.settle_ms).await;
        if target.category == Category::Terminal {
            return Ok(Technique::TerminalKeys);
        }
        let before = outcome.before.unwrap_or_default();
        let script = action_script(LANDED_FN, &target.locator, &[Value::from(text), Value::from(before)])?;
        let outcome = self.run_script(script).await?;
        self.settled(outcome, &target.locator).map_err(|_| {
            Error::Engine(stepwright::Error::ActionFailed(format!(
                "no typing technique changed the content of {}",
                target.locator.xpath
            )))
        })
    }

    async fn press_enter(&self, target: &Target) -> Result<Technique> {
        let outcome = self
            .run_script(action_script(FOCUS_FN, &target.locator, &[])?)
            .await?;
        if outcome.status != "ok" {
            self.settled(outcome, &target.locator)?;
        }
        self.page.human().press_key("Enter").await?;
        Ok(Technique::EnterKeys)
    }

    async fn act(&self, target: &Target, action: &Action) -> Result<Technique> {
        match action.kind {
            ActionKind::Click => self.click(target, action.value.as_deref()).await,
            ActionKind::Input => {
                self.type_text(target, action.value.as_deref().unwrap_or_default())
                    .await
            }
            ActionKind::Enter => {
                if let Some(text) = action.value.as_deref().filter(|t| !t.is_empty()) {
                    self.type_text(target, text).await?;
                }
                self.press_enter(target).await
            }
        }
    }

    /// Replay one step on the page.
    pub async fn run_step(&self, step: &Step) -> Result<StepOutcome> {
        let Some(action) = Action::from_step(step) else {
            if let Some(url) = step.value.as_deref().filter(|u| !u.is_empty()) {
                info!("goto: {}", url);
                self.page.goto(url).await?;
                wait_for_quiet(&self.page, self.settle_ms).await;
            }
            return Ok(StepOutcome {
                path: None,
                resolution: None,
                technique: None,
            });
        };
        let bundle = step.bundle.as_ref().ok_or_else(|| {
            Error::Engine(stepwright::Error::NotFound(format!(
                "step '{}' has no bundle",
                step.label
            )))
        })?;

        // A re-render between snapshot and action costs one more resolve.
        let mut stale = None;
        for _ in 0..2 {
            let target = self.resolve(bundle).await?;
            match self.act(&target, &action).await {
                Ok(technique) => {
                    info!("{:?} on {} via {:?}", action.kind, target.locator.xpath, technique);
                    return Ok(StepOutcome {
                        path: Some(TargetPath::Resolved),
                        resolution: Some(target.resolution),
                        technique: Some(technique),
                    });
                }
                Err(Error::Engine(stepwright::Error::NotFound(e))) => {
                    debug!("step '{}' target went stale: {}", step.label, e);
                    stale = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(stepwright::Error::NotFound(stale.unwrap_or_default()).into())
    }

    /// Replay a recording in order.
    pub async fn run_recording(&self, recording: &Recording, abort_on_failure: bool) -> ReplayReport {
        let mut report = ReplayReport {
            name: recording.name.clone(),
            ..ReplayReport::default()
        };
        for step in &recording.steps {
            let delay = self.config.replay.step_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!("Step '{}' started", step.label);
            let (ok, outcome, error) = match self.run_step(step).await {
                Ok(outcome) => {
                    info!("Step '{}' done", step.label);
                    (true, Some(outcome), None)
                }
                Err(e) => {
                    warn!("Step '{}' failed: {}", step.label, e);
                    (false, None, Some(e.to_string()))
                }
            };
            report.steps.push(StepReport {
                label: step.label.clone(),
                event: step.event,
                ok,
                outcome,
                error,
            });
            if !ok && abort_on_failure {
                report.aborted = true;
                break;
            }
        }
        report
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright::dom::ShadowMode;
    use stepwright::{FrameDescriptor, ResolverConfig};

    const PAGE: &str = r#"{
        "url": "https://example.com",
        "shadowInterceptor": false,
        "children": [{"tag": "html", "children": [{"tag": "body", "children": [
            {"tag": "div"},
            {"tag": "div", "children": [{"tag": "input", "attrs": {"id": "q"}}]},
            {"tag": "iframe", "attrs": {"name": "pay"}, "frame": {
                "url": "https://example.com/pay",
                "children": [{"tag": "html", "children": [{"tag": "body", "children": [
                    {"tag": "x-card", "shadow": {"mode": "open", "children": [
                        {"tag": "input", "attrs": {"id": "card"}}
                    ]}}
                ]}]}]
            }}
        ]}]}]
    }"#;

    #[test]
    fn test_locate_top_level_element() {
        let dom = Snapshot::from_json(PAGE).unwrap().to_dom();
        let q = dom.get_by_id(dom.root(), "q")[0];
        let loc = locate(&dom, q);
        assert!(loc.hops.is_empty());
        assert_eq!(loc.xpath, "/html/body/div[2]/input");
    }

    #[test]
    fn test_resolved_element_in_frame_and_shadow_gets_hops() {
        let dom = Snapshot::from_json(PAGE).unwrap().to_dom();
        let bundle = Bundle {
            tag: "input".into(),
            id: Some("card".into()),
            xpath: "/input".into(),
            iframe_chain: vec![FrameDescriptor::Name("pay".into())],
            shadow_hosts: vec!["/html/body/x-card".into()],
            ..Bundle::default()
        };
        let resolution = Resolver::new(ResolverConfig::default())
            .resolve_once(&dom, &bundle)
            .unwrap();

        let loc = locate(&dom, resolution.element);
        assert_eq!(
            loc.hops,
            vec![
                Hop::Frame("/html/body/iframe".into()),
                Hop::Shadow("/html/body/x-card".into())
            ]
        );
        assert_eq!(loc.xpath, "/input");
        assert_eq!(category(&dom, resolution.element), Category::Standard);
    }

    #[test]
    fn test_closed_root_hop_is_still_recorded() {
        let mut dom = Dom::new("https://example.com");
        let body = dom.body(dom.root()).unwrap();
        let host = dom.append(body, "x-box", &[]);
        let root = dom.attach_shadow(host, ShadowMode::Closed).unwrap();
        let button = dom.append(root, "button", &[]);
        let loc = locate(&dom, button);
        assert_eq!(loc.hops, vec![Hop::Shadow("/html/body/x-box".into())]);
        assert_eq!(loc.xpath, "/button");
    }

    #[test]
    fn test_action_script_embeds_arguments_as_json() {
        let loc = Locator {
            hops: vec![Hop::Frame("/html/body/iframe".into())],
            xpath: "/html/body/input".into(),
        };
        let script = action_script(TYPE_FN, &loc, &[Value::from("say \"hi\""), Value::from("standard")]).unwrap();
        assert!(script.contains(
            r#"locate({"hops":[{"kind":"frame","path":"/html/body/iframe"}],"xpath":"/html/body/input"})"#
        ));
        assert!(script.contains(r#""say \"hi\"", "standard""#));
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn test_script_outcome_parses_optional_fields() {
        let o: ScriptOutcome = serde_json::from_str(r#"{"status":"unchanged","before":"ls -la"}"#).unwrap();
        assert_eq!(o.status, "unchanged");
        assert_eq!(o.before.as_deref(), Some("ls -la"));
        assert!(o.technique.is_none());
    }

    #[test]
    fn test_widget_kinds_and_technique_names() {
        assert_eq!(kind_of(Category::ContentEditable), "editable");
        assert_eq!(kind_of(Category::ComplexEditor), "editor");
        assert_eq!(technique_named("exec_command"), Some(Technique::ExecCommand));
        assert_eq!(technique_named("pointer_sequence"), Some(Technique::PointerSequence));
        assert_eq!(technique_named("teleport"), None);
    }
}
