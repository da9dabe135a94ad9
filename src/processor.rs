use crate::{models::Envelope, telemetry::ContextObjects};
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

/// Inspects or modifies envelopes before they are buffered.
///
/// Returning `false` drops the envelope. Implemented for closures:
///
/// ```
/// use appinsights_agent::{models::Envelope, ContextObjects};
///
/// let processor = |envelope: &mut Envelope, _: &ContextObjects| {
///     envelope.name.starts_with("Microsoft.ApplicationInsights.")
/// };
/// # fn check(_: impl appinsights_agent::TelemetryProcessor) {}
/// # check(processor);
/// ```
pub trait TelemetryProcessor: Send + Sync + 'static {
    /// Process one envelope. `context` holds the item's context objects.
    fn process(&self, envelope: &mut Envelope, context: &ContextObjects) -> bool;
}

impl<F> TelemetryProcessor for F
where
    F: Fn(&mut Envelope, &ContextObjects) -> bool + Send + Sync + 'static,
{
    fn process(&self, envelope: &mut Envelope, context: &ContextObjects) -> bool {
        self(envelope, context)
    }
}

/// Ordered list of processors. Each processor works on a copy of the envelope so a panic leaves
/// the envelope as the previous processors left it.
#[derive(Default)]
pub(crate) struct ProcessorPipeline {
    processors: RwLock<Vec<Arc<dyn TelemetryProcessor>>>,
}

impl ProcessorPipeline {
    pub(crate) fn add(&self, processor: Arc<dyn TelemetryProcessor>) {
        match self.processors.write() {
            Ok(mut processors) => processors.push(processor),
            Err(poisoned) => poisoned.into_inner().push(processor),
        }
    }

    pub(crate) fn clear(&self) {
        match self.processors.write() {
            Ok(mut processors) => processors.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Runs all processors in insertion order. Returns whether the envelope should be sent.
    pub(crate) fn run(&self, envelope: &mut Envelope, context: &ContextObjects) -> bool {
        // Snapshot so processors may register other processors without deadlocking.
        let processors = match self.processors.read() {
            Ok(processors) => processors.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for (index, processor) in processors.iter().enumerate() {
            let mut candidate = envelope.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| {
                processor.process(&mut candidate, context)
            })) {
                Ok(true) => *envelope = candidate,
                Ok(false) => {
                    tracing::debug!(processor = index, "Envelope dropped by telemetry processor");
                    return false;
                }
                Err(payload) => {
                    tracing::warn!(
                        processor = index,
                        reason = panic_message(payload.as_ref()),
                        "Telemetry processor panicked; continuing with the next one"
                    );
                }
            }
        }
        true
    }
}

impl fmt::Debug for ProcessorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.processors.read().map(|p| p.len()).unwrap_or_default();
        f.debug_struct("ProcessorPipeline")
            .field("processors", &len)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Data, EventData};
    use std::collections::BTreeMap;

    fn envelope() -> Envelope {
        Envelope {
            name: String::new(),
            time: "2020-06-21T10:40:00.000Z".into(),
            sample_rate: None,
            i_key: None,
            tags: BTreeMap::new(),
            data: Data::Event(EventData {
                ver: 2,
                name: "testEvent".into(),
                properties: None,
                measurements: None,
            }),
        }
    }

    fn append(suffix: &'static str) -> Arc<dyn TelemetryProcessor> {
        Arc::new(move |envelope: &mut Envelope, _: &ContextObjects| {
            envelope.name.push_str(suffix);
            true
        })
    }

    #[test]
    fn runs_in_insertion_order() {
        let pipeline = ProcessorPipeline::default();
        pipeline.add(append("First"));
        pipeline.add(append(", Second"));
        pipeline.add(append(", Third"));
        let mut envelope = envelope();
        assert!(pipeline.run(&mut envelope, &ContextObjects::new()));
        assert_eq!("First, Second, Third", envelope.name);
    }

    #[test]
    fn veto_stops_pipeline() {
        let pipeline = ProcessorPipeline::default();
        pipeline.add(Arc::new(|_: &mut Envelope, _: &ContextObjects| false));
        pipeline.add(append("never"));
        let mut envelope = envelope();
        assert!(!pipeline.run(&mut envelope, &ContextObjects::new()));
        assert_eq!("", envelope.name);
    }

    #[test]
    fn panic_discards_partial_changes() {
        let pipeline = ProcessorPipeline::default();
        pipeline.add(append("First"));
        pipeline.add(Arc::new(|envelope: &mut Envelope, _: &ContextObjects| -> bool {
            envelope.name.push_str(", Broken");
            panic!("telemetry processor failed")
        }));
        pipeline.add(append(", Third"));
        let mut envelope = envelope();
        assert!(pipeline.run(&mut envelope, &ContextObjects::new()));
        assert_eq!("First, Third", envelope.name);
    }

    #[test]
    fn context_objects_are_visible() {
        let pipeline = ProcessorPipeline::default();
        pipeline.add(Arc::new(|envelope: &mut Envelope, context: &ContextObjects| {
            if let Some(name) = context.get::<String>("name") {
                envelope.name = name.clone();
            }
            true
        }));
        let mut context = ContextObjects::new();
        context.insert("name", "from context".to_string());
        let mut envelope = envelope();
        pipeline.run(&mut envelope, &context);
        assert_eq!("from context", envelope.name);
    }

    #[test]
    fn clear_removes_processors() {
        let pipeline = ProcessorPipeline::default();
        pipeline.add(append("First"));
        pipeline.clear();
        let mut envelope = envelope();
        assert!(pipeline.run(&mut envelope, &ContextObjects::new()));
        assert_eq!("", envelope.name);
    }
}
