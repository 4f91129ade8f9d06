//! JT-015: Built-in trace collector.
//!
//! Serializes every event as one JSON line on the `jobtree::events` tracing
//! target. Records nothing and never forwards.

use super::{Collector, Event};
use crate::core::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCollector;

impl TraceCollector {
    pub fn render(event: &Event) -> String {
        event.to_value().to_native().to_string()
    }
}

impl Collector for TraceCollector {
    fn collect(&self, event: &Event) -> Result<Option<String>> {
        if tracing::enabled!(target: "jobtree::events", tracing::Level::TRACE) {
            tracing::trace!(target: "jobtree::events", "{}", Self::render(event));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::JobName;
    use crate::transport::CommandSpec;

    #[test]
    fn test_jt015_render_is_json_line() {
        let line = TraceCollector::render(&Event::exec(&CommandSpec::new("echo").arg("a")));
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["type"], "exec");
        assert_eq!(parsed["exec"]["args"][0], "a");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_jt015_never_records() {
        let event = Event::run(&JobName::parse("x"), &Default::default());
        assert_eq!(TraceCollector.collect(&event).unwrap(), None);
    }
}
