use std::sync::Arc;

use crate::{
    chain::{StreamChain, UnaryChain},
    stage::{Stage, StreamInterceptor, UnaryInterceptor},
};

/// Collects `(priority, stage)` pairs in whatever order configuration
/// produces them. Lower priorities run first (outermost).
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    priority: i32,
    stage: Stage,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, priority: i32, stage: Stage) {
        self.entries.push(Entry { priority, stage });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by priority, keeping registration order among equal
    /// priorities, and split the entries into the unary and streaming
    /// lanes.
    pub fn build(self) -> (Vec<Arc<dyn UnaryInterceptor>>, Vec<Arc<dyn StreamInterceptor>>) {
        let mut entries = self.entries;
        // `sort_by_key` is stable.
        entries.sort_by_key(|e| e.priority);

        let unary = entries
            .iter()
            .filter_map(|e| e.stage.unary_lane().cloned())
            .collect();
        let stream = entries
            .iter()
            .filter_map(|e| e.stage.stream_lane().cloned())
            .collect();

        (unary, stream)
    }

    /// Build and fold both lanes into their composed entry points.
    pub fn compose(self) -> (UnaryChain, StreamChain) {
        let (unary, stream) = self.build();
        (UnaryChain::new(unary), StreamChain::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::tests::{stream_handler, unary_handler, Log, Tag},
        stage::{MethodInfo, Payload},
    };
    use tonic::Request;

    fn tag(name: &'static str, log: &Log) -> Tag {
        Tag {
            name,
            log: log.clone(),
        }
    }

    async fn run_unary(registry: Registry, log: &Log) -> Vec<String> {
        let (unary, _) = registry.compose();
        let info = MethodInfo::unary("/svc.Service/Get");
        unary
            .call(Request::new(Box::new(()) as Payload), &info, unary_handler(log.clone()))
            .await
            .unwrap();
        log.lock().iter().filter(|e| !e.ends_with(":out")).cloned().collect()
    }

    #[tokio::test]
    async fn test_priority_determines_order() {
        let log = Log::default();
        let mut registry = Registry::new();
        registry.add(300, Stage::unary(tag("C", &log)));
        registry.add(100, Stage::unary(tag("A", &log)));
        registry.add(200, Stage::unary(tag("B", &log)));

        assert_eq!(run_unary(registry, &log).await, vec!["A:in", "B:in", "C:in", "handler"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let log = Log::default();
        let mut registry = Registry::new();
        registry.add(100, Stage::unary(tag("first", &log)));
        registry.add(100, Stage::unary(tag("second", &log)));
        registry.add(100, Stage::unary(tag("third", &log)));

        assert_eq!(
            run_unary(registry, &log).await,
            vec!["first:in", "second:in", "third:in", "handler"]
        );
    }

    #[tokio::test]
    async fn test_every_registration_order_yields_same_chain() {
        // (priority, name) with a tie at 20 whose relative order must follow
        // registration order.
        let specs: [(i32, &'static str); 4] = [(10, "a"), (20, "b1"), (20, "b2"), (30, "c")];
        let permutations = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 1, 0, 2],
            [0, 3, 2, 1],
        ];

        for order in permutations {
            let log = Log::default();
            let mut registry = Registry::new();
            for i in order {
                let (priority, name) = specs[i];
                registry.add(priority, Stage::unary(tag(name, &log)));
            }

            let b1_first = order.iter().position(|&i| i == 1) < order.iter().position(|&i| i == 2);
            let (x, y) = if b1_first { ("b1:in", "b2:in") } else { ("b2:in", "b1:in") };
            assert_eq!(
                run_unary(registry, &log).await,
                vec!["a:in", x, y, "c:in", "handler"],
                "registration order {order:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_lanes_are_filtered_independently() {
        let log = Log::default();
        let mut registry = Registry::new();
        registry.add(10, Stage::unary(tag("unary-only", &log)));
        registry.add(20, Stage::streaming(tag("stream-only", &log)));
        registry.add(30, Stage::both(tag("both", &log)));
        assert_eq!(registry.len(), 3);

        let (unary, stream) = registry.compose();
        assert_eq!(unary.len(), 2);
        assert_eq!(stream.len(), 2);

        let info = MethodInfo::streaming("/svc.Service/Watch");
        stream
            .call(Request::new(Box::new(()) as Payload), &info, stream_handler(log.clone()))
            .await
            .unwrap();
        assert_eq!(
            *log.lock(),
            vec!["stream-only:in", "both:in", "handler", "both:out", "stream-only:out"]
        );
    }

    #[test]
    fn test_empty_registry() {
        let (unary, stream) = Registry::new().compose();
        assert!(unary.is_empty());
        assert!(stream.is_empty());
    }
}
