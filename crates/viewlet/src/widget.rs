//! External widget collaborator contract.
//!
//! Rendering, JavaScript semantics and DOM resolution belong to the
//! hosting GUI toolkit; the remote only drives it through this trait.
//! Every method is called from the GUI-affine execution tick and must
//! return without blocking. Work that completes through a toolkit
//! callback is split into a `begin_*` call and a `poll_*` check re-tried
//! on later ticks.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use thiserror::Error;

use crate::bridge::protocol::SelectorKind;
use crate::config::WindowMode;
use crate::remote::Readiness;

#[derive(Debug, Error)]
pub enum WidgetError {
    /// The toolkit reported a runtime fault while executing a script.
    #[error("script fault: {message}; console: {console}")]
    ScriptFault { message: String, console: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("failed to install page {name:?}: {reason}")]
    SetPage { name: String, reason: String },

    #[error("widget operation failed: {0}")]
    Operation(String),
}

/// Finished script execution: the script's return value, if any.
pub type ScriptOutcome = Result<Option<String>, WidgetError>;

pub trait WidgetHost {
    /// Start loading a URL. Completion arrives through the load-lifecycle
    /// signals, not the return value.
    fn navigate(&mut self, url: &str) -> Result<(), WidgetError>;

    /// Start executing the script stored at `path`.
    fn begin_script(&mut self, path: &Path) -> Result<(), WidgetError>;

    /// Result of the script started by [`WidgetHost::begin_script`], once
    /// available.
    fn poll_script(&mut self) -> Option<ScriptOutcome>;

    /// Start resolving an element's on-screen position.
    fn begin_element_lookup(
        &mut self,
        kind: SelectorKind,
        selector: &str,
    ) -> Result<(), WidgetError>;

    /// Position resolved by [`WidgetHost::begin_element_lookup`], once
    /// available.
    fn poll_element_position(&mut self) -> Option<Result<(f64, f64), WidgetError>>;

    /// Post a native click at window coordinates.
    fn click_at(&mut self, x: f64, y: f64) -> Result<(), WidgetError>;

    fn hide(&mut self) -> Result<(), WidgetError>;

    fn show(&mut self, mode: WindowMode) -> Result<(), WidgetError>;

    /// Toolkit-specific window flags, passed through verbatim.
    fn apply_flags(&mut self, flags: &[String]) -> Result<(), WidgetError>;

    /// Swap the hosted page for a named one.
    fn set_page(&mut self, name: &str) -> Result<(), WidgetError>;

    fn current_url(&self) -> String;

    /// Release the GUI resource. Safe to call more than once.
    fn close(&mut self);
}

/// Widget stand-in with no GUI: records operations and answers with
/// canned results.
///
/// Backs the `viewlet-headless` harness binary and the integration
/// tests. Script bodies are echoed back as the script result; a body of
/// the form `throw <message>` produces a [`WidgetError::ScriptFault`],
/// and selectors containing `missing` fail element lookup.
pub struct HeadlessWidget {
    readiness: Readiness,
    hold_ready: bool,
    current_url: String,
    script: Option<ScriptOutcome>,
    element: Option<Result<(f64, f64), WidgetError>>,
    ops: Arc<StdMutex<Vec<String>>>,
}

impl HeadlessWidget {
    pub fn new(readiness: Readiness) -> Self {
        Self {
            readiness,
            hold_ready: false,
            current_url: String::new(),
            script: None,
            element: None,
            ops: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Never report load-finished: every received command stays deferred.
    pub fn with_hold_ready(mut self, hold: bool) -> Self {
        self.hold_ready = hold;
        self
    }

    /// Record operations into a log shared with the caller.
    pub fn with_ops(mut self, ops: Arc<StdMutex<Vec<String>>>) -> Self {
        self.ops = ops;
        self
    }

    pub fn ops_handle(&self) -> Arc<StdMutex<Vec<String>>> {
        Arc::clone(&self.ops)
    }

    fn record(&self, entry: String) {
        match self.ops.lock() {
            Ok(mut ops) => ops.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

impl WidgetHost for HeadlessWidget {
    fn navigate(&mut self, url: &str) -> Result<(), WidgetError> {
        self.record(format!("url {url}"));
        self.readiness.load_started();
        self.current_url = url.to_string();
        if !self.hold_ready {
            self.readiness.load_finished();
        }
        Ok(())
    }

    fn begin_script(&mut self, path: &Path) -> Result<(), WidgetError> {
        self.record(format!("js {}", path.display()));
        let body = std::fs::read_to_string(path)
            .map_err(|e| WidgetError::Operation(format!("script file unreadable: {e}")))?;
        let body = body.trim().to_string();
        self.script = Some(match body.strip_prefix("throw ") {
            Some(message) => Err(WidgetError::ScriptFault {
                message: message.to_string(),
                console: String::new(),
            }),
            None if body.is_empty() => Ok(None),
            None => Ok(Some(body)),
        });
        Ok(())
    }

    fn poll_script(&mut self) -> Option<ScriptOutcome> {
        self.script.take()
    }

    fn begin_element_lookup(
        &mut self,
        kind: SelectorKind,
        selector: &str,
    ) -> Result<(), WidgetError> {
        let kind_name = match kind {
            SelectorKind::Css => "css",
            SelectorKind::Xpath => "xpath",
        };
        self.record(format!("lookup {kind_name} {selector}"));
        self.element = Some(if selector.contains("missing") {
            Err(WidgetError::ElementNotFound {
                selector: selector.to_string(),
            })
        } else {
            Ok((32.0, 24.0))
        });
        Ok(())
    }

    fn poll_element_position(&mut self) -> Option<Result<(f64, f64), WidgetError>> {
        self.element.take()
    }

    fn click_at(&mut self, x: f64, y: f64) -> Result<(), WidgetError> {
        self.record(format!("click {x},{y}"));
        Ok(())
    }

    fn hide(&mut self) -> Result<(), WidgetError> {
        self.record("hide".to_string());
        Ok(())
    }

    fn show(&mut self, _mode: WindowMode) -> Result<(), WidgetError> {
        self.record("show".to_string());
        Ok(())
    }

    fn apply_flags(&mut self, flags: &[String]) -> Result<(), WidgetError> {
        if !flags.is_empty() {
            self.record(format!("flags {}", flags.join(",")));
        }
        Ok(())
    }

    fn set_page(&mut self, name: &str) -> Result<(), WidgetError> {
        if name.contains("missing") {
            return Err(WidgetError::SetPage {
                name: name.to_string(),
                reason: "no such page".to_string(),
            });
        }
        self.record(format!("page {name}"));
        Ok(())
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    fn close(&mut self) {
        self.record("close".to_string());
    }
}
